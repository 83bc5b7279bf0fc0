//! Sync engine and orchestration
//!
//! A run moves through `connecting → analyzing → uploading` and ends in
//! `complete`, `error` or `cancelled`. Connection-level failures pass through
//! `retrying` while attempts remain; the plan built during analysis is kept,
//! so a resumed attempt only sends what is still queued.

pub mod events;
pub(crate) mod execute;
pub mod queue;
pub mod registry;
pub mod rules;
pub mod session;
pub mod state;

pub use events::{EventRecorder, EventSink, NullSink, SyncEvent};
pub use queue::{TransferItem, TransferQueue};
pub use registry::{RunHandle, RunRegistry};
pub use rules::SyncRules;
pub use session::{PartialUpload, SessionStore, TransferSession};
pub use state::{FailedFile, LogEntry, LogLevel, RetryInfo, Stage, TransferState};

use crate::config::Config;
use crate::delta::{self, DeltaPlanner, DeltaStatus, DeltaTransferStats, FileDelta};
use crate::error::{ConnectErrorKind, Error, Result};
use crate::project::{CredentialProvider, Endpoint, ProjectConfig, ProjectStore};
use crate::retry::RetryConfig;
use crate::signature::SignatureStore;
use crate::snapshot::SnapshotStore;
use crate::transport::{Connection, Transport};
use execute::{upload_all, SignatureCommitter, UploadContext};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Dry-run result: what a sync would send
#[derive(Debug, Clone, Serialize)]
pub struct SyncPlan {
    pub project_id: String,
    pub deltas: Vec<FileDelta>,
    pub stats: DeltaTransferStats,
}

/// What to do after a connection-level failure
enum RetryDecision {
    Proceed,
    GiveUp,
    Cancelled,
}

/// The main sync engine
///
/// One engine serves any number of projects; each project has at most one
/// run at a time. Share it behind an `Arc` to drive runs from several tasks.
pub struct SyncEngine {
    config: Config,
    retry: RetryConfig,
    transport: Arc<dyn Transport>,
    projects: Arc<dyn ProjectStore>,
    credentials: Arc<dyn CredentialProvider>,
    signatures: SignatureStore,
    snapshots: SnapshotStore,
    sessions: SessionStore,
    planner: Arc<DeltaPlanner>,
    registry: RunRegistry,
    sink: Arc<dyn EventSink>,
}

impl SyncEngine {
    /// Create an engine whose stores live under the config's data directory
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        projects: Arc<dyn ProjectStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let data_dir = config.data_dir()?;
        Ok(Self {
            retry: RetryConfig::from(&config),
            signatures: SignatureStore::new(&data_dir),
            snapshots: SnapshotStore::from_config(&data_dir, &config),
            sessions: SessionStore::new(&data_dir),
            planner: Arc::new(DeltaPlanner::new()),
            registry: RunRegistry::new(),
            sink: Arc::new(NullSink),
            config,
            transport,
            projects,
            credentials,
        })
    }

    /// Send run events to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn signatures(&self) -> &SignatureStore {
        &self.signatures
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn planner(&self) -> &DeltaPlanner {
        &self.planner
    }

    /// Current state of a project's run
    pub fn state(&self, project_id: &str) -> Option<TransferState> {
        self.registry.state(project_id)
    }

    /// Projects with a run in progress
    pub fn active(&self) -> Vec<String> {
        self.registry.active()
    }

    /// Cancel a run; false if nothing was running
    pub fn cancel(&self, project_id: &str) -> bool {
        self.registry.cancel(project_id)
    }

    /// Forget a finished run
    pub fn reset(&self, project_id: &str) -> Result<()> {
        self.registry.reset(project_id)
    }

    fn load_project(&self, project_id: &str) -> Result<ProjectConfig> {
        self.projects
            .load(project_id)?
            .ok_or_else(|| Error::config(format!("unknown project: {}", project_id)))
    }

    fn endpoint_of(project: &ProjectConfig) -> Result<Endpoint> {
        let endpoint = project
            .endpoint
            .clone()
            .ok_or_else(|| Error::config(format!("project {} has no endpoint", project.id)))?;
        endpoint.validate()?;
        Ok(endpoint)
    }

    /// Compute the delta plan without connecting or touching any state
    pub async fn plan(&self, project_id: &str) -> Result<SyncPlan> {
        let project = self.load_project(project_id)?;
        let deltas = self.analyze_blocking(&project).await?;
        let stats = delta::stats(&deltas);
        Ok(SyncPlan {
            project_id: project.id,
            deltas,
            stats,
        })
    }

    /// Run a full sync and return the final state
    ///
    /// Rejections (unknown project, bad endpoint, a run already present)
    /// come back as errors without touching any run. Everything that happens
    /// after the run started is reported through the returned state.
    pub async fn sync(&self, project_id: &str) -> Result<TransferState> {
        let project = self.load_project(project_id)?;
        let endpoint = Self::endpoint_of(&project)?;
        let password = self.credentials.get_secret(project_id)?;

        let handle = self
            .registry
            .begin(project_id, self.retry.max_attempts, self.sink.clone())?;
        tracing::info!(
            project = %project_id,
            endpoint = %endpoint.display_url(),
            transport = self.transport.name(),
            "Starting sync"
        );

        self.drive(&handle, &project, &endpoint, password.as_deref(), None)
            .await;
        Ok(handle.snapshot())
    }

    /// Retry files that failed in a run that ended in `error`
    ///
    /// With `paths`, only those files are retried and any path that did not
    /// fail, or has no retries left, rejects the request. Without, every
    /// failed file that still has retries left is retried. Retried files are
    /// planned again from their current content.
    pub async fn retry_failed(
        &self,
        project_id: &str,
        paths: Option<&[String]>,
    ) -> Result<TransferState> {
        let project = self.load_project(project_id)?;
        let endpoint = Self::endpoint_of(&project)?;
        let password = self.credentials.get_secret(project_id)?;
        let max_file_retries = self.config.max_file_retries;

        let (handle, items) = self.registry.resume(project_id, |state| {
            let selected = select_retries(state, paths, max_file_retries)?;
            let mut items = Vec::with_capacity(selected.len());
            let mut kept = Vec::new();
            for (index, failed) in std::mem::take(&mut state.failed_files).into_iter().enumerate() {
                if selected.contains(&index) {
                    let mut item = failed.item;
                    item.retries = failed.retry_count + 1;
                    items.push(item);
                } else {
                    kept.push(failed);
                }
            }
            state.failed_files = kept;
            state.log(
                LogLevel::Info,
                format!("Retrying {} failed file(s)", items.len()),
            );
            Ok(items)
        })?;
        tracing::info!(project = %project_id, files = items.len(), "Retrying failed files");

        let items = self.replan(&handle, &project, items).await;
        self.drive(&handle, &project, &endpoint, password.as_deref(), Some(items))
            .await;
        Ok(handle.snapshot())
    }

    /// Connect, analyze once, upload, and retry on connection loss
    ///
    /// `prepared` skips analysis and uploads exactly those items.
    async fn drive(
        &self,
        handle: &RunHandle,
        project: &ProjectConfig,
        endpoint: &Endpoint,
        password: Option<&str>,
        prepared: Option<Vec<TransferItem>>,
    ) {
        let committer = SignatureCommitter::new(self.signatures.clone(), &project.id);
        let mut pending = prepared;
        let mut deleted: Vec<String> = Vec::new();

        loop {
            if !handle.update(|state| {
                state.retry.attempt += 1;
                state.retry.next_retry_at = None;
                if state.stage == Stage::Connecting {
                    Vec::new()
                } else {
                    state.stage = Stage::Connecting;
                    vec![SyncEvent::StageChanged {
                        project_id: state.project_id.clone(),
                        stage: Stage::Connecting,
                    }]
                }
            }) {
                return;
            }

            let primary = match self.connect(handle, endpoint, password).await {
                Ok(conn) => conn,
                Err(Error::Cancelled) => return,
                Err(e) => match self.schedule_retry(handle, &e).await {
                    RetryDecision::Proceed => continue,
                    RetryDecision::Cancelled => return,
                    RetryDecision::GiveUp => {
                        fail_run(handle, &e, Vec::new());
                        return;
                    }
                },
            };
            tracing::info!(project = %project.id, "Connected");

            let items = match pending.take() {
                Some(items) => items,
                None => {
                    handle.update(|state| {
                        state.stage = Stage::Analyzing;
                        state.progress = state.progress.max(10.0);
                        vec![SyncEvent::StageChanged {
                            project_id: state.project_id.clone(),
                            stage: Stage::Analyzing,
                        }]
                    });
                    match self.prepare_upload(handle, project).await {
                        Ok((items, gone)) => {
                            deleted = gone;
                            items
                        }
                        Err(e) => {
                            close_all(vec![primary]).await;
                            fail_run(handle, &e, Vec::new());
                            return;
                        }
                    }
                }
            };

            if !handle.is_current() {
                close_all(vec![primary]).await;
                return;
            }

            let mut connections = vec![primary];
            let wanted = self.config.effective_connections().min(items.len().max(1));
            while connections.len() < wanted {
                match self.connect(handle, endpoint, password).await {
                    Ok(conn) => connections.push(conn),
                    Err(Error::Cancelled) => break,
                    Err(e) => {
                        handle.log(
                            LogLevel::Warn,
                            format!("Extra connection failed, continuing with {}: {}", connections.len(), e),
                        );
                        break;
                    }
                }
            }

            handle.set_stage(Stage::Uploading);
            tracing::info!(
                project = %project.id,
                files = items.len(),
                connections = connections.len(),
                "Uploading"
            );

            let ctx = UploadContext {
                handle,
                queue: items.into_iter().collect(),
                committer: &committer,
                sessions: &self.sessions,
                project_id: &project.id,
                root: &project.local_root,
                max_file_retries: self.config.max_file_retries,
            };
            let outcome = upload_all(&ctx, &mut connections).await;
            close_all(connections).await;

            if outcome.cancelled || !handle.is_current() {
                return;
            }

            if let Some(error) = outcome.lost {
                let mut remaining = outcome.interrupted;
                remaining.extend(ctx.queue.drain());
                self.record_partials(handle, &project.id, &remaining);
                match self.schedule_retry(handle, &error).await {
                    RetryDecision::Proceed => {
                        pending = Some(remaining);
                        continue;
                    }
                    RetryDecision::Cancelled => return,
                    RetryDecision::GiveUp => {
                        fail_run(handle, &error, remaining);
                        return;
                    }
                }
            }

            self.finalize(handle, project, &committer, &deleted);
            return;
        }
    }

    /// Open one connection, bounded by the connect timeout and the run's token
    async fn connect(
        &self,
        handle: &RunHandle,
        endpoint: &Endpoint,
        password: Option<&str>,
    ) -> Result<Box<dyn Connection>> {
        let timeout = self.config.connect_timeout();
        tokio::select! {
            biased;
            _ = handle.token().cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, self.transport.connect(endpoint, password)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(Error::connect(
                        ConnectErrorKind::Timeout,
                        format!("no response from {} within {}s", endpoint.host, timeout.as_secs()),
                    )),
                }
            }
        }
    }

    /// Wait out the backoff before the next attempt, if one is allowed
    async fn schedule_retry(&self, handle: &RunHandle, error: &Error) -> RetryDecision {
        let attempts = handle.snapshot().retry.attempt;
        if !self.retry.should_retry(error, attempts) {
            tracing::warn!(attempts, error = %error, "Giving up");
            return RetryDecision::GiveUp;
        }

        let delay = self.retry.delay_for(attempts);
        let message = error.to_string();
        let scheduled = handle.update(|state| {
            state.stage = Stage::Retrying;
            state.last_error = Some(message.clone());
            state.error_kind = connect_kind(error);
            state.retry.last_error = Some(message.clone());
            state.retry.next_retry_at = chrono::Duration::from_std(delay)
                .ok()
                .map(|d| chrono::Utc::now() + d);
            state.log(
                LogLevel::Warn,
                format!(
                    "Attempt {}/{} failed: {}; retrying in {}",
                    attempts,
                    state.retry.max_attempts,
                    message,
                    crate::format::format_duration(delay)
                ),
            );
            vec![
                SyncEvent::StageChanged {
                    project_id: state.project_id.clone(),
                    stage: Stage::Retrying,
                },
                SyncEvent::RetryScheduled {
                    project_id: state.project_id.clone(),
                    attempt: attempts,
                    max_attempts: state.retry.max_attempts,
                    delay_ms: delay.as_millis() as u64,
                    error: message.clone(),
                },
            ]
        });
        if !scheduled {
            return RetryDecision::Cancelled;
        }
        tracing::warn!(
            attempt = attempts,
            max_attempts = self.retry.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Connection failed, retrying"
        );

        let project_id = handle.snapshot().project_id;
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return RetryDecision::Proceed;
            }
            handle.emit(SyncEvent::RetryCountdown {
                project_id: project_id.clone(),
                seconds_remaining: remaining.as_secs_f64().ceil() as u64,
            });
            let tick = remaining.min(Duration::from_secs(1));
            tokio::select! {
                biased;
                _ = handle.token().cancelled() => return RetryDecision::Cancelled,
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }

    /// Snapshot the tree, build the plan and size the run
    async fn prepare_upload(
        &self,
        handle: &RunHandle,
        project: &ProjectConfig,
    ) -> Result<(Vec<TransferItem>, Vec<String>)> {
        let snapshots = self.snapshots.clone();
        let (id, root, rules) = (
            project.id.clone(),
            project.local_root.clone(),
            project.rules.clone(),
        );
        let snapshot = tokio::task::spawn_blocking(move || {
            snapshots.create_filtered(&id, &root, &rules, Some("pre-sync"))
        })
        .await;
        match snapshot {
            Ok(Ok(snapshot)) => {
                handle.update(|state| {
                    state.snapshot_id = Some(snapshot.id.clone());
                    state.log(
                        LogLevel::Info,
                        format!("Snapshot {} ({} files)", snapshot.id, snapshot.files_count),
                    );
                    Vec::new()
                });
            }
            Ok(Err(e)) => {
                handle.warn(format!("Snapshot not created: {}", e));
            }
            Err(e) => {
                handle.warn(format!("Snapshot task failed: {}", e));
            }
        }

        let deltas = self.analyze_blocking(project).await?;
        let stats = delta::stats(&deltas);
        let deleted: Vec<String> = deltas
            .iter()
            .filter(|d| d.status == DeltaStatus::Deleted)
            .map(|d| d.path.clone())
            .collect();
        let mut items: Vec<TransferItem> = deltas
            .iter()
            .filter_map(|d| TransferItem::from_delta(&project.local_root, d))
            .collect();
        self.apply_partials(handle, &project.id, &mut items);

        tracing::info!(
            project = %project.id,
            upload = items.len(),
            unchanged = stats.unchanged_files,
            deleted = stats.deleted_files,
            transfer_bytes = stats.transfer_size,
            savings_percent = stats.savings_percent,
            "Plan ready"
        );

        handle.update(|state| {
            state.files_total = items.len() + stats.unchanged_files;
            state.files_completed = stats.unchanged_files;
            state.bytes_total = stats.transfer_size;
            for path in &deleted {
                state.log(LogLevel::Info, format!("{}: deleted locally", path));
            }
            state.log(
                LogLevel::Info,
                format!(
                    "{} to upload, {} unchanged, {} deleted",
                    items.len(),
                    stats.unchanged_files,
                    stats.deleted_files
                ),
            );
            state.stats = Some(stats);
            state.refresh_progress();
            vec![SyncEvent::Progress {
                project_id: state.project_id.clone(),
                progress: state.progress,
                files_completed: state.files_completed,
                files_total: state.files_total,
                bytes_sent: state.bytes_sent,
            }]
        });

        Ok((items, deleted))
    }

    /// Re-plan retried files against the cache and the files as they are now
    ///
    /// Files that vanished are dropped from the run, files that now match
    /// the cache count as done, and everything else gets a fresh plan that
    /// keeps its retry count and any reusable partial upload.
    async fn replan(
        &self,
        handle: &RunHandle,
        project: &ProjectConfig,
        items: Vec<TransferItem>,
    ) -> Vec<TransferItem> {
        let planner = Arc::clone(&self.planner);
        let store = self.signatures.clone();
        let (id, root) = (project.id.clone(), project.local_root.clone());
        let paths: Vec<String> = items.iter().map(|i| i.path.clone()).collect();
        let analyzed =
            tokio::task::spawn_blocking(move || planner.analyze_paths(&store, &id, &root, &paths))
                .await;

        let deltas = match analyzed {
            Ok(Ok(deltas)) => deltas,
            Ok(Err(e)) => {
                handle.warn(format!("Re-analysis failed, sending retried files whole: {}", e));
                return items.into_iter().map(TransferItem::into_whole).collect();
            }
            Err(e) => {
                handle.warn(format!("Re-analysis task failed, sending retried files whole: {}", e));
                return items.into_iter().map(TransferItem::into_whole).collect();
            }
        };
        let by_path: HashMap<&str, &FileDelta> =
            deltas.iter().map(|d| (d.path.as_str(), d)).collect();

        let mut replanned = Vec::with_capacity(items.len());
        let mut settled = 0usize;
        let mut vanished = 0usize;
        for old in items {
            let Some(delta) = by_path.get(old.path.as_str()) else {
                handle.log(
                    LogLevel::Info,
                    format!("{}: no longer exists locally, not retried", old.path),
                );
                vanished += 1;
                continue;
            };
            match TransferItem::from_delta(&project.local_root, delta) {
                None => {
                    handle.log(LogLevel::Info, format!("{}: already up to date", old.path));
                    settled += 1;
                }
                Some(mut item) => {
                    item.retries = old.retries;
                    if old.resume_offset > 0 && item.ranges.is_none() && item.size == old.size {
                        item.resume_offset = old.resume_offset;
                        item.expected_hash = old.expected_hash;
                    }
                    replanned.push(item);
                }
            }
        }

        if settled + vanished > 0 {
            handle.update(|state| {
                state.files_completed += settled;
                state.files_total = state.files_total.saturating_sub(vanished);
                state.refresh_progress();
                Vec::new()
            });
        }
        replanned
    }

    /// Remember how far interrupted whole-file uploads got
    fn record_partials(&self, handle: &RunHandle, project_id: &str, items: &[TransferItem]) {
        let now = chrono::Utc::now();
        let uploads: Vec<(String, PartialUpload)> = items
            .iter()
            .filter(|item| item.ranges.is_none() && item.resume_offset > 0)
            .filter_map(|item| {
                let upload = PartialUpload {
                    size: item.size,
                    hash: item.expected_hash.clone()?,
                    offset: item.resume_offset,
                    updated_at: now,
                };
                Some((item.path.clone(), upload))
            })
            .collect();
        if let Err(e) = self.sessions.record(project_id, uploads) {
            handle.warn(format!("Partial uploads not recorded: {}", e));
        }
    }

    /// Pick up partial uploads left by an earlier run
    fn apply_partials(&self, handle: &RunHandle, project_id: &str, items: &mut [TransferItem]) {
        let Some(session) = self.sessions.load(project_id) else {
            return;
        };
        let mut resumable = 0usize;
        for item in items.iter_mut().filter(|i| i.ranges.is_none()) {
            if let Some(partial) = session.partial.get(&item.path) {
                if partial.size == item.size && partial.offset < partial.size {
                    item.resume_offset = partial.offset;
                    item.expected_hash = Some(partial.hash.clone());
                    resumable += 1;
                }
            }
        }
        if resumable > 0 {
            handle.log(
                LogLevel::Info,
                format!("{} interrupted upload(s) can continue", resumable),
            );
        }
    }

    async fn analyze_blocking(&self, project: &ProjectConfig) -> Result<Vec<FileDelta>> {
        let planner = Arc::clone(&self.planner);
        let store = self.signatures.clone();
        let (id, root, rules) = (
            project.id.clone(),
            project.local_root.clone(),
            project.rules.clone(),
        );
        tokio::task::spawn_blocking(move || planner.analyze_project(&store, &id, &root, &rules))
            .await
            .map_err(|e| {
                Error::io(
                    "analysis task failed",
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                )
            })?
    }

    /// Settle a drained queue: complete if nothing failed
    fn finalize(
        &self,
        handle: &RunHandle,
        project: &ProjectConfig,
        committer: &SignatureCommitter,
        deleted: &[String],
    ) {
        let failed = handle.snapshot().failed_files.len();
        if failed > 0 {
            handle.finish(Stage::Error, |state| {
                let message = format!("{} file(s) failed to upload", failed);
                state.log(LogLevel::Error, message.clone());
                state.last_error = Some(message);
            });
            tracing::warn!(project = %project.id, failed, "Sync finished with failures");
            return;
        }

        if !handle.is_current() {
            return;
        }
        if !deleted.is_empty() {
            if let Err(e) = committer.prune(deleted) {
                handle.warn(format!("Signature cache not pruned: {}", e));
            }
        }
        if let Err(e) = self.sessions.clear(&project.id) {
            handle.warn(format!("Transfer session not cleared: {}", e));
        }
        if let Err(e) = self.touch_last_sync(&project.id) {
            handle.warn(format!("Last sync time not saved: {}", e));
        }

        if handle.finish(Stage::Complete, |state| {
            state.log(LogLevel::Info, "Sync complete");
        }) {
            let state = handle.snapshot();
            tracing::info!(
                project = %project.id,
                files = state.files_completed,
                bytes_sent = state.bytes_sent,
                "Sync complete"
            );
        }
    }

    fn touch_last_sync(&self, project_id: &str) -> Result<()> {
        if let Some(mut project) = self.projects.load(project_id)? {
            project.last_sync_at = Some(chrono::Utc::now());
            self.projects.save(&project)?;
        }
        Ok(())
    }
}

/// Indices of failed files to retry
fn select_retries(
    state: &TransferState,
    paths: Option<&[String]>,
    max_file_retries: u32,
) -> Result<Vec<usize>> {
    let selected: Vec<usize> = match paths {
        None => state
            .failed_files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.retry_count < max_file_retries)
            .map(|(i, _)| i)
            .collect(),
        Some(paths) => {
            let mut selected = Vec::with_capacity(paths.len());
            for path in paths {
                let index = state
                    .failed_files
                    .iter()
                    .position(|f| &f.path == path)
                    .ok_or_else(|| Error::rejected(format!("{} did not fail in this run", path)))?;
                if state.failed_files[index].retry_count >= max_file_retries {
                    return Err(Error::rejected(format!(
                        "{} has used all {} retries",
                        path, max_file_retries
                    )));
                }
                if !selected.contains(&index) {
                    selected.push(index);
                }
            }
            selected
        }
    };

    if selected.is_empty() {
        return Err(Error::rejected("no failed files left to retry"));
    }
    Ok(selected)
}

fn connect_kind(error: &Error) -> Option<ConnectErrorKind> {
    match error {
        Error::Connect { kind, .. } => Some(*kind),
        _ => None,
    }
}

/// End the run in `error`, recording `unsent` items as failed
fn fail_run(handle: &RunHandle, error: &Error, unsent: Vec<TransferItem>) {
    let message = error.to_string();
    tracing::error!(error = %error, unsent = unsent.len(), "Sync failed");
    handle.finish(Stage::Error, |state| {
        state.last_error = Some(message.clone());
        state.error_kind = connect_kind(error);
        state.retry.last_error = Some(message.clone());
        state.log(LogLevel::Error, message.clone());
        for item in unsent {
            state.failed_files.push(FailedFile {
                path: item.path.clone(),
                error: message.clone(),
                retry_count: item.retries,
                given_up: false,
                item,
            });
        }
    });
}

async fn close_all(connections: Vec<Box<dyn Connection>>) {
    for mut conn in connections {
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Error closing connection");
        }
    }
}
