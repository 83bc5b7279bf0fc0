//! Connection test for an endpoint
//!
//! A probe races the connect attempt and the directory listing that follows
//! it against one deadline and a cancellation token. Each attempt takes a fresh number from a monotonic
//! counter; once a newer attempt starts or the probe is cancelled, results of
//! older attempts are thrown away.

use crate::error::{ConnectErrorKind, Error};
use crate::project::Endpoint;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where a probe currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Idle,
    Connecting,
    Success,
    Error,
    Timeout,
    Cancelled,
}

impl ProbeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProbeState::Idle | ProbeState::Connecting)
    }
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProbeState::Idle => "idle",
            ProbeState::Connecting => "connecting",
            ProbeState::Success => "success",
            ProbeState::Error => "error",
            ProbeState::Timeout => "timeout",
            ProbeState::Cancelled => "cancelled",
        })
    }
}

/// Outcome of one probe attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub state: ProbeState,

    /// Attempt number this report belongs to
    pub attempt: u64,

    pub message: Option<String>,
    pub error_kind: Option<ConnectErrorKind>,

    /// Top-level remote directories, when listing worked
    pub directories: Vec<String>,

    pub elapsed_ms: u64,
}

impl ProbeReport {
    fn new(state: ProbeState, attempt: u64) -> Self {
        Self {
            state,
            attempt,
            message: None,
            error_kind: None,
            directories: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

/// Connection test state machine
pub struct ConnectionProbe {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    attempt: AtomicU64,
    current: Mutex<ProbeReport>,
    cancel: Mutex<CancellationToken>,
}

impl ConnectionProbe {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            attempt: AtomicU64::new(0),
            current: Mutex::new(ProbeReport::new(ProbeState::Idle, 0)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn current(&self) -> MutexGuard<'_, ProbeReport> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Latest report
    pub fn state(&self) -> ProbeReport {
        self.current().clone()
    }

    /// Store `report` unless a newer attempt has started
    fn publish(&self, report: &ProbeReport) -> bool {
        let mut current = self.current();
        if self.attempt.load(Ordering::SeqCst) != report.attempt {
            return false;
        }
        *current = report.clone();
        true
    }

    /// Cancel the running attempt, if any
    pub fn cancel(&self) {
        let token = self.cancel.lock().unwrap_or_else(|p| p.into_inner()).clone();
        token.cancel();

        let mut current = self.current();
        if !current.state.is_terminal() && current.state != ProbeState::Idle {
            let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            let mut report = ProbeReport::new(ProbeState::Cancelled, attempt);
            report.elapsed_ms = current.elapsed_ms;
            *current = report;
            tracing::info!("Connection probe cancelled");
        }
    }

    /// Run one probe against `endpoint`
    ///
    /// The returned report always describes this attempt. If the attempt was
    /// superseded or cancelled meanwhile, the report says `Cancelled` and the
    /// probe's visible state is left alone.
    pub async fn test(&self, endpoint: &Endpoint, password: Option<&str>) -> ProbeReport {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        {
            let mut slot = self.cancel.lock().unwrap_or_else(|p| p.into_inner());
            slot.cancel();
            *slot = token.clone();
        }

        if let Err(e) = endpoint.validate() {
            let mut report = ProbeReport::new(ProbeState::Error, attempt);
            report.message = Some(e.to_string());
            self.publish(&report);
            return report;
        }

        self.publish(&ProbeReport::new(ProbeState::Connecting, attempt));
        tracing::info!(endpoint = %endpoint.display_url(), attempt, "Probing connection");

        let started = Instant::now();
        let deadline = started + self.timeout;
        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ProbeReport::new(ProbeState::Cancelled, attempt)),
            _ = tokio::time::sleep_until(deadline) => {
                let mut r = ProbeReport::new(ProbeState::Timeout, attempt);
                r.error_kind = Some(ConnectErrorKind::Timeout);
                r.message = Some(format!("no response within {}s", self.timeout.as_secs()));
                Err(r)
            }
            result = self.transport.connect(endpoint, password) => match result {
                Ok(conn) => Ok(conn),
                Err(Error::Connect { kind, message }) => {
                    let state = if kind == ConnectErrorKind::Timeout {
                        ProbeState::Timeout
                    } else {
                        ProbeState::Error
                    };
                    let mut r = ProbeReport::new(state, attempt);
                    r.error_kind = Some(kind);
                    r.message = Some(message);
                    Err(r)
                }
                Err(e) => {
                    let mut r = ProbeReport::new(ProbeState::Error, attempt);
                    r.message = Some(e.to_string());
                    Err(r)
                }
            },
        };

        // The listing shares the connect deadline and stays cancellable
        let mut report = match connected {
            Err(report) => report,
            Ok(mut conn) => {
                let mut r = ProbeReport::new(ProbeState::Success, attempt);
                let listing = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    _ = tokio::time::sleep_until(deadline) => Some(Err(None)),
                    listed = conn.list_dir("") => Some(listed.map_err(Some)),
                };
                match listing {
                    None => r = ProbeReport::new(ProbeState::Cancelled, attempt),
                    Some(Ok(entries)) => {
                        r.directories = entries
                            .into_iter()
                            .filter(|e| e.is_dir)
                            .map(|e| e.name)
                            .collect();
                    }
                    Some(Err(Some(e))) => {
                        tracing::warn!(error = %e, "Connected but listing failed");
                        r.message = Some(format!("connected; listing failed: {}", e));
                    }
                    Some(Err(None)) => {
                        tracing::warn!("Connected but listing timed out");
                        r.message = Some("connected; listing timed out".into());
                    }
                }
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Error closing probe connection");
                }
                r
            }
        };
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        if report.state == ProbeState::Cancelled || !self.publish(&report) {
            tracing::debug!(attempt, "Discarding stale probe result");
            let mut cancelled = ProbeReport::new(ProbeState::Cancelled, attempt);
            cancelled.elapsed_ms = report.elapsed_ms;
            return cancelled;
        }

        tracing::info!(
            attempt,
            state = ?report.state,
            elapsed_ms = report.elapsed_ms,
            "Probe finished"
        );
        report
    }
}
