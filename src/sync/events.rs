//! Typed events emitted while a run progresses

use super::state::{LogLevel, Stage};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    StageChanged {
        project_id: String,
        stage: Stage,
    },
    Progress {
        project_id: String,
        progress: f64,
        files_completed: usize,
        files_total: usize,
        bytes_sent: u64,
    },
    FileStarted {
        project_id: String,
        path: String,
        size: u64,
        transfer_size: u64,
    },
    FileProgress {
        project_id: String,
        path: String,
        bytes_sent: u64,
        transfer_size: u64,
    },
    FileCompleted {
        project_id: String,
        path: String,
        bytes_sent: u64,
    },
    FileFailed {
        project_id: String,
        path: String,
        error: String,
    },
    RetryScheduled {
        project_id: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
    RetryCountdown {
        project_id: String,
        seconds_remaining: u64,
    },
    Log {
        project_id: String,
        level: LogLevel,
        message: String,
    },
    Finished {
        project_id: String,
        stage: Stage,
        files_completed: usize,
        files_failed: usize,
        bytes_sent: u64,
    },
}

impl SyncEvent {
    pub fn project_id(&self) -> &str {
        match self {
            SyncEvent::StageChanged { project_id, .. }
            | SyncEvent::Progress { project_id, .. }
            | SyncEvent::FileStarted { project_id, .. }
            | SyncEvent::FileProgress { project_id, .. }
            | SyncEvent::FileCompleted { project_id, .. }
            | SyncEvent::FileFailed { project_id, .. }
            | SyncEvent::RetryScheduled { project_id, .. }
            | SyncEvent::RetryCountdown { project_id, .. }
            | SyncEvent::Log { project_id, .. }
            | SyncEvent::Finished { project_id, .. } => project_id,
        }
    }
}

/// Receiver of run events, called in emission order
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SyncEvent) {}
}

impl EventSink for UnboundedSender<SyncEvent> {
    fn emit(&self, event: SyncEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.send(event);
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<SyncEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Stages in the order they were entered
    pub fn stages(&self) -> Vec<Stage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::StageChanged { stage, .. } => Some(stage),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl EventSink for EventRecorder {
    fn emit(&self, event: SyncEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_keeps_order() {
        let recorder = EventRecorder::new();
        for stage in [Stage::Connecting, Stage::Analyzing, Stage::Complete] {
            recorder.emit(SyncEvent::StageChanged {
                project_id: "p".into(),
                stage,
            });
        }
        assert_eq!(
            recorder.stages(),
            vec![Stage::Connecting, Stage::Analyzing, Stage::Complete]
        );
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.emit(SyncEvent::RetryCountdown {
            project_id: "p".into(),
            seconds_remaining: 3,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.project_id(), "p");

        drop(rx);
        tx.emit(SyncEvent::RetryCountdown {
            project_id: "p".into(),
            seconds_remaining: 2,
        });
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(SyncEvent::StageChanged {
            project_id: "p".into(),
            stage: Stage::Retrying,
        })
        .unwrap();
        assert_eq!(json["type"], "stage_changed");
        assert_eq!(json["stage"], "retrying");
    }
}
