//! Observable state of a sync run

use super::queue::TransferItem;
use crate::delta::DeltaTransferStats;
use crate::error::ConnectErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress reported once analysis is done and uploading starts
pub const UPLOAD_PROGRESS_BASE: f64 = 20.0;

/// Share of the progress bar covered by uploading
pub const UPLOAD_PROGRESS_RANGE: f64 = 70.0;

/// Lifecycle stage of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Connecting,
    Analyzing,
    Uploading,
    Retrying,
    Complete,
    Error,
    Cancelled,
}

impl Stage {
    /// Complete, error and cancelled stick until the run is reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error | Stage::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != Stage::Idle
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Connecting => "connecting",
            Stage::Analyzing => "analyzing",
            Stage::Uploading => "uploading",
            Stage::Retrying => "retrying",
            Stage::Complete => "complete",
            Stage::Error => "error",
            Stage::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection retry bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryInfo {
    /// Connection attempts made so far in this run
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// A file that could not be uploaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,

    /// On-demand retries already spent on this file
    pub retry_count: u32,

    /// No retries left
    pub given_up: bool,

    /// What to send when the file is retried
    pub item: TransferItem,
}

/// Snapshot of a run, as exposed to callers and sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    pub project_id: String,
    pub run_id: String,
    pub stage: Stage,

    /// Overall progress, 0 to 100
    pub progress: f64,

    pub current_file: Option<String>,
    pub current_file_progress: f64,

    /// Files done, including unchanged files that needed no upload
    pub files_completed: usize,
    pub files_total: usize,
    pub bytes_sent: u64,
    pub bytes_total: u64,

    pub last_error: Option<String>,
    pub error_kind: Option<ConnectErrorKind>,
    pub retry: RetryInfo,
    pub logs: Vec<LogEntry>,
    pub failed_files: Vec<FailedFile>,

    /// Problems that did not fail the run (snapshot or cache writes)
    pub warnings: Vec<String>,

    pub snapshot_id: Option<String>,
    pub stats: Option<DeltaTransferStats>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferState {
    pub fn new(project_id: &str, run_id: String, max_attempts: u32) -> Self {
        Self {
            project_id: project_id.to_string(),
            run_id,
            stage: Stage::Idle,
            progress: 0.0,
            current_file: None,
            current_file_progress: 0.0,
            files_completed: 0,
            files_total: 0,
            bytes_sent: 0,
            bytes_total: 0,
            last_error: None,
            error_kind: None,
            retry: RetryInfo {
                max_attempts,
                ..Default::default()
            },
            logs: Vec::new(),
            failed_files: Vec::new(),
            warnings: Vec::new(),
            snapshot_id: None,
            stats: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.log(LogLevel::Warn, message.clone());
        self.warnings.push(message);
    }

    /// Files that reached an outcome, successful or not
    pub fn files_processed(&self) -> usize {
        self.files_completed + self.failed_files.len()
    }

    /// Recompute the overall progress from the file counters
    ///
    /// Never moves backwards.
    pub fn refresh_progress(&mut self) {
        let value = if self.files_total == 0 {
            UPLOAD_PROGRESS_BASE + UPLOAD_PROGRESS_RANGE
        } else {
            let done = self.files_processed().min(self.files_total) as f64;
            UPLOAD_PROGRESS_BASE + UPLOAD_PROGRESS_RANGE * done / self.files_total as f64
        };
        if value > self.progress {
            self.progress = value;
        }
    }

    pub fn failed_paths(&self) -> Vec<&str> {
        self.failed_files.iter().map(|f| f.path.as_str()).collect()
    }
}
