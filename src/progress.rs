//! Terminal progress display driven by sync events

use crate::format::format_size;
use crate::sync::{EventSink, Stage, SyncEvent};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bars for one sync run
///
/// Implements [`EventSink`], so it can be handed straight to the engine.
pub struct ProgressTracker {
    multi: MultiProgress,
    /// Overall progress (percent)
    overall: ProgressBar,
    /// Current file (bytes)
    current: ProgressBar,
    /// Stage and retry messages
    status: ProgressBar,
    enabled: bool,
}

impl ProgressTracker {
    pub fn new(enabled: bool) -> Self {
        let multi = MultiProgress::new();

        let overall = if enabled {
            let pb = multi.add(ProgressBar::new(100));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };

        let current = if enabled {
            let pb = multi.add(ProgressBar::new(0));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("  {msg:.dim} [{bar:40.yellow/red}] {bytes}/{total_bytes} ({bytes_per_sec})")
            {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let status = if enabled {
            let pb = multi.add(ProgressBar::new_spinner());
            if let Ok(style) = ProgressStyle::default_spinner().template("  {msg}") {
                pb.set_style(style);
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        Self {
            multi,
            overall,
            current,
            status,
            enabled,
        }
    }

    /// Finish all progress bars
    pub fn finish(&self) {
        self.overall.finish();
        self.current.finish_and_clear();
        self.status.finish();
    }

    /// Print a message (works with progress bars)
    pub fn println(&self, msg: &str) {
        if self.enabled {
            self.multi.println(msg).ok();
        } else {
            println!("{}", msg);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EventSink for ProgressTracker {
    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::StageChanged { stage, .. } => {
                self.overall.set_message(stage.to_string());
                if stage == Stage::Complete {
                    self.overall.set_position(100);
                }
            }
            SyncEvent::Progress {
                progress,
                files_completed,
                files_total,
                bytes_sent,
                ..
            } => {
                self.overall.set_position(progress.clamp(0.0, 100.0) as u64);
                self.status.set_message(format!(
                    "{}/{} files, {} sent",
                    files_completed,
                    files_total,
                    format_size(bytes_sent)
                ));
            }
            SyncEvent::FileStarted {
                path,
                transfer_size,
                ..
            } => {
                self.current.set_length(transfer_size);
                self.current.set_position(0);
                self.current.set_message(truncate_filename(&path, 30));
            }
            SyncEvent::FileProgress { bytes_sent, .. } => {
                self.current.set_position(bytes_sent);
            }
            SyncEvent::FileCompleted { .. } => {
                self.current
                    .set_position(self.current.length().unwrap_or(0));
            }
            SyncEvent::FileFailed { path, error, .. } => {
                self.println(&format!("failed: {}: {}", path, error));
            }
            SyncEvent::RetryScheduled {
                attempt,
                max_attempts,
                error,
                ..
            } => {
                self.println(&format!(
                    "attempt {}/{} failed: {}",
                    attempt, max_attempts, error
                ));
            }
            SyncEvent::RetryCountdown {
                seconds_remaining, ..
            } => {
                self.status
                    .set_message(format!("retrying in {}s", seconds_remaining));
            }
            SyncEvent::Log { .. } => {}
            SyncEvent::Finished { .. } => self.finish(),
        }
    }
}

/// Truncate a filename for display, keeping the tail
fn truncate_filename(name: &str, max_len: usize) -> String {
    let count = name.chars().count();
    if count <= max_len {
        name.to_string()
    } else {
        let tail: String = name.chars().skip(count - max_len + 3).collect();
        format!("...{}", tail)
    }
}
