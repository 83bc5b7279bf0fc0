//! One run per project, guarded by an attempt generation
//!
//! Every run carries a generation number. A [`RunHandle`] remembers the
//! generation it was created for; cancelling or resuming a run bumps the
//! number, after which every update or event through an older handle is
//! silently dropped. Both the bump and every update happen under the run's
//! state lock, so a late completion can never overwrite a cancellation.

use super::events::{EventSink, SyncEvent};
use super::state::{LogLevel, Stage, TransferState};
use crate::error::{Error, Result};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared record of one project's run
pub struct SyncRun {
    generation: AtomicU64,
    state: Mutex<TransferState>,
    cancel: Mutex<CancellationToken>,
    sink: Arc<dyn EventSink>,
}

impl SyncRun {
    fn lock(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn token(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn snapshot(&self) -> TransferState {
        self.lock().clone()
    }
}

/// Map of project id to its current run
#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<String, Arc<SyncRun>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh run in `Connecting`, rejecting if the project
    /// already has one
    ///
    /// A finished run blocks new ones until it is reset.
    pub fn begin(
        &self,
        project_id: &str,
        max_attempts: u32,
        sink: Arc<dyn EventSink>,
    ) -> Result<RunHandle> {
        let mut initial = TransferState::new(project_id, Uuid::new_v4().to_string(), max_attempts);
        initial.stage = Stage::Connecting;
        let run = Arc::new(SyncRun {
            generation: AtomicU64::new(1),
            state: Mutex::new(initial),
            cancel: Mutex::new(CancellationToken::new()),
            sink,
        });

        match self.runs.entry(project_id.to_string()) {
            Entry::Occupied(mut existing) => {
                let stage = existing.get().lock().stage;
                if stage != Stage::Idle {
                    return Err(Error::rejected(format!(
                        "project {} already has a {} run",
                        project_id, stage
                    )));
                }
                existing.insert(Arc::clone(&run));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&run));
            }
        }

        run.sink.emit(SyncEvent::StageChanged {
            project_id: project_id.to_string(),
            stage: Stage::Connecting,
        });
        let token = run.token().clone();
        Ok(RunHandle {
            run,
            generation: 1,
            token,
        })
    }

    /// Start a new attempt on a run that ended in `Error`
    ///
    /// `prepare` runs under the state lock before the stage moves to
    /// `Connecting`; returning an error leaves the run untouched.
    pub fn resume<T>(
        &self,
        project_id: &str,
        prepare: impl FnOnce(&mut TransferState) -> Result<T>,
    ) -> Result<(RunHandle, T)> {
        let run = self
            .runs
            .get(project_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| Error::rejected(format!("project {} has no run to retry", project_id)))?;

        let mut state = run.lock();
        if state.stage != Stage::Error {
            return Err(Error::rejected(format!(
                "project {} run is {}, not error",
                project_id, state.stage
            )));
        }

        let value = prepare(&mut state)?;

        let generation = run.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *run.token() = token.clone();

        state.stage = Stage::Connecting;
        state.finished_at = None;
        state.last_error = None;
        state.error_kind = None;
        state.retry.attempt = 0;
        state.retry.next_retry_at = None;
        run.sink.emit(SyncEvent::StageChanged {
            project_id: project_id.to_string(),
            stage: Stage::Connecting,
        });
        drop(state);

        Ok((
            RunHandle {
                run,
                generation,
                token,
            },
            value,
        ))
    }

    /// Cancel a running sync; false if nothing was running
    pub fn cancel(&self, project_id: &str) -> bool {
        let Some(run) = self.runs.get(project_id).map(|r| Arc::clone(r.value())) else {
            return false;
        };

        let mut state = run.lock();
        if !state.stage.is_active() {
            return false;
        }

        run.generation.fetch_add(1, Ordering::SeqCst);
        run.token().cancel();

        state.stage = Stage::Cancelled;
        state.finished_at = Some(Utc::now());
        state.current_file = None;
        state.log(LogLevel::Warn, "Sync cancelled");
        run.sink.emit(SyncEvent::StageChanged {
            project_id: project_id.to_string(),
            stage: Stage::Cancelled,
        });
        run.sink.emit(SyncEvent::Finished {
            project_id: project_id.to_string(),
            stage: Stage::Cancelled,
            files_completed: state.files_completed,
            files_failed: state.failed_files.len(),
            bytes_sent: state.bytes_sent,
        });
        tracing::info!(project = %project_id, "Sync cancelled");
        true
    }

    /// Forget a finished run so a new one can start
    pub fn reset(&self, project_id: &str) -> Result<()> {
        let removed = self.runs.remove_if(project_id, |_, run| !run.lock().stage.is_active());
        if removed.is_none() && self.runs.contains_key(project_id) {
            return Err(Error::rejected(format!(
                "project {} has a run in progress; cancel it first",
                project_id
            )));
        }
        Ok(())
    }

    pub fn state(&self, project_id: &str) -> Option<TransferState> {
        self.runs.get(project_id).map(|r| r.snapshot())
    }

    /// Projects with an active run
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .runs
            .iter()
            .filter(|r| r.value().lock().stage.is_active())
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Capability to mutate one generation of a run
#[derive(Clone)]
pub struct RunHandle {
    run: Arc<SyncRun>,
    generation: u64,
    token: CancellationToken,
}

impl RunHandle {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Still the live generation and not cancelled
    pub fn is_current(&self) -> bool {
        self.run.generation.load(Ordering::SeqCst) == self.generation && !self.token.is_cancelled()
    }

    pub fn snapshot(&self) -> TransferState {
        self.run.snapshot()
    }

    /// Apply `f` and emit the events it returns, if this handle is current
    ///
    /// Returns false when the update was discarded.
    pub fn update(&self, f: impl FnOnce(&mut TransferState) -> Vec<SyncEvent>) -> bool {
        let mut state = self.run.lock();
        if self.run.generation.load(Ordering::SeqCst) != self.generation || state.stage.is_terminal() {
            return false;
        }
        for event in f(&mut state) {
            self.run.sink.emit(event);
        }
        true
    }

    /// Emit a single event if current
    pub fn emit(&self, event: SyncEvent) -> bool {
        self.update(|_| vec![event])
    }

    /// Move to a non-terminal stage
    pub fn set_stage(&self, stage: Stage) -> bool {
        self.update(|state| {
            state.stage = stage;
            vec![SyncEvent::StageChanged {
                project_id: state.project_id.clone(),
                stage,
            }]
        })
    }

    /// Record a log line (and emit it)
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> bool {
        let message = message.into();
        self.update(|state| {
            state.log(level, message.clone());
            vec![SyncEvent::Log {
                project_id: state.project_id.clone(),
                level,
                message,
            }]
        })
    }

    /// Record a warning that does not fail the run
    pub fn warn(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        tracing::warn!(message = %message, "Sync warning");
        self.update(|state| {
            state.warn(message.clone());
            vec![SyncEvent::Log {
                project_id: state.project_id.clone(),
                level: LogLevel::Warn,
                message,
            }]
        })
    }

    /// Enter a terminal stage
    pub fn finish(&self, stage: Stage, f: impl FnOnce(&mut TransferState)) -> bool {
        self.update(|state| {
            f(state);
            state.stage = stage;
            state.current_file = None;
            state.finished_at = Some(Utc::now());
            if stage == Stage::Complete {
                state.progress = 100.0;
            }
            vec![
                SyncEvent::StageChanged {
                    project_id: state.project_id.clone(),
                    stage,
                },
                SyncEvent::Finished {
                    project_id: state.project_id.clone(),
                    stage,
                    files_completed: state.files_completed,
                    files_failed: state.failed_files.len(),
                    bytes_sent: state.bytes_sent,
                },
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::events::{EventRecorder, NullSink};

    #[test]
    fn test_second_begin_rejected_until_reset() {
        let registry = RunRegistry::new();
        let handle = registry.begin("p", 3, Arc::new(NullSink)).unwrap();
        assert_eq!(registry.state("p").unwrap().stage, Stage::Connecting);

        assert!(matches!(
            registry.begin("p", 3, Arc::new(NullSink)),
            Err(Error::Rejected { .. })
        ));
        assert!(registry.begin("other", 3, Arc::new(NullSink)).is_ok());

        handle.finish(Stage::Complete, |_| {});
        assert!(registry.begin("p", 3, Arc::new(NullSink)).is_err());

        registry.reset("p").unwrap();
        assert!(registry.begin("p", 3, Arc::new(NullSink)).is_ok());
    }

    #[test]
    fn test_cancel_invalidates_handle() {
        let registry = RunRegistry::new();
        let recorder = Arc::new(EventRecorder::new());
        let handle = registry.begin("p", 3, recorder.clone()).unwrap();
        handle.set_stage(Stage::Uploading);

        assert!(registry.cancel("p"));
        assert!(!handle.is_current());
        assert!(handle.token().is_cancelled());

        // Late completion is discarded
        assert!(!handle.finish(Stage::Complete, |s| s.files_completed = 99));
        let state = registry.state("p").unwrap();
        assert_eq!(state.stage, Stage::Cancelled);
        assert_eq!(state.files_completed, 0);
        assert_eq!(
            recorder.stages(),
            vec![Stage::Connecting, Stage::Uploading, Stage::Cancelled]
        );

        assert!(!registry.cancel("p"));
    }

    #[test]
    fn test_reset_rejects_active_run() {
        let registry = RunRegistry::new();
        let handle = registry.begin("p", 3, Arc::new(NullSink)).unwrap();
        handle.set_stage(Stage::Analyzing);
        assert!(registry.reset("p").is_err());
        assert!(registry.reset("missing").is_ok());
        assert_eq!(registry.active(), vec!["p"]);
    }

    #[test]
    fn test_resume_only_from_error() {
        let registry = RunRegistry::new();
        let handle = registry.begin("p", 3, Arc::new(NullSink)).unwrap();
        handle.set_stage(Stage::Uploading);
        assert!(registry.resume("p", |_| Ok(())).is_err());

        handle.finish(Stage::Error, |s| s.last_error = Some("boom".into()));
        let (resumed, ()) = registry.resume("p", |_| Ok(())).unwrap();
        assert!(resumed.is_current());
        assert!(!handle.is_current());
        assert_eq!(registry.state("p").unwrap().stage, Stage::Connecting);
    }
}
