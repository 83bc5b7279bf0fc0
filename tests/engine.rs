//! End-to-end runs of the sync engine against the in-memory transport

use sitesync::config::Config;
use sitesync::delta::DeltaStatus;
use sitesync::error::{ConnectErrorKind, Error};
use sitesync::project::{
    CredentialProvider, Endpoint, JsonProjectStore, MemoryCredentials, ProjectConfig, ProjectStore,
    Protocol,
};
use sitesync::signature::CHUNK_SIZE;
use sitesync::sync::{EventRecorder, Stage, SyncEngine, SyncEvent, SyncRules};
use sitesync::transport::MemoryTransport;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _data: TempDir,
    site: TempDir,
    engine: Arc<SyncEngine>,
    remote: MemoryTransport,
    projects: Arc<JsonProjectStore>,
    credentials: Arc<MemoryCredentials>,
    recorder: Arc<EventRecorder>,
}

fn fixture(tweak: impl FnOnce(&mut Config)) -> Fixture {
    let data = TempDir::new().unwrap();
    let site = TempDir::new().unwrap();

    let mut config = Config {
        data_dir: Some(data.path().to_path_buf()),
        retry_delay_ms: 10,
        max_retry_delay_ms: 40,
        progress: false,
        ..Default::default()
    };
    tweak(&mut config);

    let projects = Arc::new(JsonProjectStore::new(data.path()));
    projects
        .save(&ProjectConfig::new("site", site.path()).with_endpoint(endpoint()))
        .unwrap();

    let remote = MemoryTransport::new();
    let credentials = Arc::new(MemoryCredentials::new());
    let recorder = Arc::new(EventRecorder::new());
    let engine = SyncEngine::new(
        config,
        Arc::new(remote.clone()),
        projects.clone(),
        credentials.clone(),
    )
    .unwrap()
    .with_sink(recorder.clone());

    Fixture {
        _data: data,
        site,
        engine: Arc::new(engine),
        remote,
        projects,
        credentials,
        recorder,
    }
}

fn endpoint() -> Endpoint {
    Endpoint::new(Protocol::Sftp, "example.com", "deploy", "/var/www")
}

/// Create a test file with specified content
fn create_file(root: &Path, name: &str, content: &[u8]) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
}

/// Deterministic non-repeating-per-chunk content
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 997) % 251) as u8).collect()
}

async fn wait_for_stage(engine: &SyncEngine, project: &str, stage: Stage) {
    for _ in 0..1000 {
        if engine.state(project).map(|s| s.stage) == Some(stage) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("project {} never reached {}", project, stage);
}

#[tokio::test]
async fn test_second_sync_skips_unchanged_large_file() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "index.html", b"<html>hello</html>");
    create_file(fx.site.path(), "css/site.css", b"body { margin: 0 }");
    create_file(fx.site.path(), "img/hero.bin", &pattern(300 * 1024));

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(state.files_completed, 3);
    assert_eq!(state.progress, 100.0);
    assert!(state.snapshot_id.is_some());
    assert_eq!(fx.remote.paths(), vec!["css/site.css", "img/hero.bin", "index.html"]);
    assert_eq!(
        fx.remote.file("img/hero.bin").unwrap().as_ref(),
        pattern(300 * 1024).as_slice()
    );
    assert_eq!(fx.engine.signatures().get("site").len(), 3);

    // Terminal runs stick until reset
    assert!(matches!(fx.engine.sync("site").await, Err(Error::Rejected { .. })));
    fx.engine.reset("site").unwrap();

    // Small files always go again; the large one is settled by its hash
    let sends = fx.remote.send_count();
    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(state.bytes_sent, 36);
    assert_eq!(state.files_completed, 3);
    assert_eq!(fx.remote.send_count(), sends + 2);
    let stats = state.stats.unwrap();
    assert_eq!(stats.unchanged_files, 1);
    assert_eq!(stats.small_files, 2);
    assert_eq!(fx.engine.planner().chunk_recomputes(), 0);
}

#[tokio::test]
async fn test_stage_sequence_and_final_event() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "a.txt", b"a");

    fx.engine.sync("site").await.unwrap();

    assert_eq!(
        fx.recorder.stages(),
        vec![Stage::Connecting, Stage::Analyzing, Stage::Uploading, Stage::Complete]
    );
    let events = fx.recorder.events();
    assert!(matches!(
        events.last(),
        Some(SyncEvent::Finished {
            stage: Stage::Complete,
            files_completed: 1,
            ..
        })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::FileCompleted { path, .. } if path == "a.txt")));
}

#[tokio::test]
async fn test_modified_large_file_sends_only_changed_chunk() {
    let fx = fixture(|_| {});
    let mut content = pattern(10 * 1024 * 1024);
    create_file(fx.site.path(), "video.bin", &content);

    fx.engine.sync("site").await.unwrap();
    fx.engine.reset("site").unwrap();
    let before = fx.remote.bytes_sent();

    let offset = 42 * CHUNK_SIZE + 10;
    content[offset] = content[offset].wrapping_add(1);
    create_file(fx.site.path(), "video.bin", &content);

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.bytes_sent() - before, CHUNK_SIZE as u64);
    assert_eq!(fx.remote.file("video.bin").unwrap().as_ref(), content.as_slice());

    let stats = state.stats.unwrap();
    assert_eq!(stats.modified_files, 1);
    assert_eq!(stats.transfer_size, 65536);
    assert!((stats.savings_percent - 99.375).abs() < 1e-9);
    assert_eq!(fx.engine.planner().chunk_recomputes(), 1);
}

#[tokio::test]
async fn test_ranged_fallback_sends_whole_file() {
    let fx = fixture(|_| {});
    let mut content = pattern(1024 * 1024);
    create_file(fx.site.path(), "data.bin", &content);
    fx.engine.sync("site").await.unwrap();
    fx.engine.reset("site").unwrap();

    fx.remote.set_supports_ranges(false);
    content[5] ^= 0xff;
    create_file(fx.site.path(), "data.bin", &content);
    let before = fx.remote.bytes_sent();

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.bytes_sent() - before, content.len() as u64);
    assert_eq!(fx.remote.file("data.bin").unwrap().as_ref(), content.as_slice());
    assert!(state
        .logs
        .iter()
        .any(|l| l.message.contains("does not support ranged writes")));
}

#[tokio::test]
async fn test_cancel_mid_upload_ends_cancelled() {
    let fx = fixture(|_| {});
    for i in 0..8 {
        create_file(fx.site.path(), &format!("page{}.html", i), b"content");
    }
    fx.remote.set_send_delay(Duration::from_millis(40));

    let engine = Arc::clone(&fx.engine);
    let run = tokio::spawn(async move { engine.sync("site").await });

    wait_for_stage(&fx.engine, "site", Stage::Uploading).await;
    assert!(fx.engine.cancel("site"));

    let state = run.await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::Cancelled);
    assert!(state.files_completed < 8);
    assert!(fx.engine.active().is_empty());

    // Only the final notification follows the cancellation
    let events = fx.recorder.events();
    let at = events
        .iter()
        .position(|e| matches!(e, SyncEvent::StageChanged { stage: Stage::Cancelled, .. }))
        .unwrap();
    assert_eq!(events.len(), at + 2);
    assert!(matches!(
        events[at + 1],
        SyncEvent::Finished {
            stage: Stage::Cancelled,
            ..
        }
    ));

    // No signature for anything the remote never stored
    let cache = fx.engine.signatures().get("site");
    let stored = fx.remote.paths();
    for path in cache.signatures.keys() {
        assert!(stored.contains(path), "{} cached but not uploaded", path);
    }

    // Cancelling again is a no-op
    assert!(!fx.engine.cancel("site"));
}

#[tokio::test]
async fn test_cancel_during_retry_backoff() {
    let fx = fixture(|c| {
        c.retry_delay_ms = 5_000;
        c.max_retry_delay_ms = 5_000;
    });
    create_file(fx.site.path(), "a.txt", b"a");
    fx.remote.fail_all_connects(Some(ConnectErrorKind::Refused));

    let engine = Arc::clone(&fx.engine);
    let run = tokio::spawn(async move { engine.sync("site").await });

    wait_for_stage(&fx.engine, "site", Stage::Retrying).await;
    assert!(fx.engine.state("site").unwrap().retry.next_retry_at.is_some());
    assert!(fx.engine.cancel("site"));

    let state = run.await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::Cancelled);
    assert_eq!(fx.remote.connect_count(), 1);
}

#[tokio::test]
async fn test_bounded_retry_gives_up_after_max_attempts() {
    let fx = fixture(|c| c.max_attempts = 3);
    create_file(fx.site.path(), "a.txt", b"a");
    fx.remote.fail_all_connects(Some(ConnectErrorKind::Refused));

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Error);
    assert_eq!(state.error_kind, Some(ConnectErrorKind::Refused));
    assert_eq!(state.retry.attempt, 3);
    assert_eq!(fx.remote.connect_count(), 3);

    let events = fx.recorder.events();
    let scheduled: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::RetryScheduled { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(scheduled, vec![1, 2]);
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::RetryCountdown { .. })));
}

#[tokio::test]
async fn test_transient_connect_failures_recover() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "a.txt", b"a");
    fx.remote
        .fail_connects([ConnectErrorKind::Timeout, ConnectErrorKind::Network]);

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.connect_count(), 3);
    assert_eq!(
        fx.recorder
            .stages()
            .iter()
            .filter(|s| **s == Stage::Retrying)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "a.txt", b"a");
    fx.remote.require_password("hunter2");

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Error);
    assert_eq!(state.error_kind, Some(ConnectErrorKind::Auth));
    assert_eq!(fx.remote.connect_count(), 1);

    fx.engine.reset("site").unwrap();
    fx.credentials.put_secret("site", "hunter2").unwrap();
    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let fx = fixture(|c| {
        c.connect_timeout_secs = 1;
        c.max_attempts = 1;
    });
    fx.remote.set_connect_delay(Duration::from_secs(30));

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Error);
    assert_eq!(state.error_kind, Some(ConnectErrorKind::Timeout));
}

#[tokio::test]
async fn test_concurrent_sync_rejected() {
    let fx = fixture(|_| {});
    for i in 0..5 {
        create_file(fx.site.path(), &format!("f{}.txt", i), b"x");
    }
    let blog = TempDir::new().unwrap();
    create_file(blog.path(), "post.html", b"post");
    fx.projects
        .save(&ProjectConfig::new("blog", blog.path()).with_endpoint(endpoint()))
        .unwrap();
    fx.remote.set_send_delay(Duration::from_millis(30));

    let engine = Arc::clone(&fx.engine);
    let run = tokio::spawn(async move { engine.sync("site").await });
    wait_for_stage(&fx.engine, "site", Stage::Uploading).await;

    let before = fx.engine.state("site").unwrap();
    assert!(matches!(fx.engine.sync("site").await, Err(Error::Rejected { .. })));
    assert_eq!(fx.engine.state("site").unwrap().run_id, before.run_id);

    // Other projects are unaffected
    let blog_state = fx.engine.sync("blog").await.unwrap();
    assert_eq!(blog_state.stage, Stage::Complete);

    assert_eq!(run.await.unwrap().unwrap().stage, Stage::Complete);
}

#[tokio::test]
async fn test_invalid_project_rejected_without_state() {
    let fx = fixture(|_| {});
    let bare = TempDir::new().unwrap();
    fx.projects.save(&ProjectConfig::new("bare", bare.path())).unwrap();

    assert!(matches!(fx.engine.sync("bare").await, Err(Error::Config { .. })));
    assert!(matches!(fx.engine.sync("missing").await, Err(Error::Config { .. })));
    assert!(fx.engine.state("bare").is_none());
    assert_eq!(fx.remote.connect_count(), 0);
}

#[tokio::test]
async fn test_file_failure_continues_then_retry_failed() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "a.html", b"a");
    create_file(fx.site.path(), "b.html", b"b");
    create_file(fx.site.path(), "c.html", b"c");
    fx.remote.fail_path("b.html", "permission denied");

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Error);
    assert_eq!(state.failed_paths(), vec!["b.html"]);
    assert_eq!(state.files_completed, 2);
    assert_eq!(fx.remote.paths(), vec!["a.html", "c.html"]);

    let cache = fx.engine.signatures().get("site");
    assert!(cache.get("a.html").is_some());
    assert!(cache.get("b.html").is_none());

    fx.remote.heal_path("b.html");
    let state = fx.engine.retry_failed("site", None).await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert!(state.failed_files.is_empty());
    assert_eq!(state.files_completed, 3);
    assert_eq!(state.progress, 100.0);
    assert_eq!(fx.remote.paths(), vec!["a.html", "b.html", "c.html"]);
    assert!(fx.engine.signatures().get("site").get("b.html").is_some());
}

#[tokio::test]
async fn test_retry_failed_respects_cap() {
    let fx = fixture(|c| c.max_file_retries = 1);
    create_file(fx.site.path(), "a.html", b"a");
    create_file(fx.site.path(), "b.html", b"b");
    fx.remote.fail_path("b.html", "disk quota exceeded");

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.failed_files[0].retry_count, 0);
    assert!(!state.failed_files[0].given_up);

    let unknown = ["zzz.html".to_string()];
    assert!(matches!(
        fx.engine.retry_failed("site", Some(&unknown)).await,
        Err(Error::Rejected { .. })
    ));

    let state = fx.engine.retry_failed("site", None).await.unwrap();
    assert_eq!(state.stage, Stage::Error);
    assert_eq!(state.failed_files[0].retry_count, 1);
    assert!(state.failed_files[0].given_up);

    let again = ["b.html".to_string()];
    assert!(matches!(
        fx.engine.retry_failed("site", Some(&again)).await,
        Err(Error::Rejected { .. })
    ));
    assert!(fx.engine.retry_failed("site", None).await.is_err());
    assert_eq!(fx.engine.state("site").unwrap().stage, Stage::Error);
}

#[tokio::test]
async fn test_connection_lost_resumes_remaining_queue() {
    let fx = fixture(|_| {});
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        create_file(fx.site.path(), name, name.as_bytes());
    }
    fx.remote.drop_connection_after(2);

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(state.files_completed, 4);
    assert_eq!(fx.remote.paths(), vec!["a.txt", "b.txt", "c.txt", "d.txt"]);
    assert_eq!(fx.remote.connect_count(), 2);
    assert_eq!(fx.remote.send_count(), 4);

    // Analysis ran once
    let stages = fx.recorder.stages();
    assert_eq!(stages.iter().filter(|s| **s == Stage::Analyzing).count(), 1);
    assert!(stages.contains(&Stage::Retrying));
}

#[tokio::test]
async fn test_connection_lost_without_attempts_left() {
    let fx = fixture(|c| c.max_attempts = 1);
    for name in ["a.txt", "b.txt", "c.txt"] {
        create_file(fx.site.path(), name, name.as_bytes());
    }
    fx.remote.drop_connection_after(1);

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Error);
    assert_eq!(state.files_completed, 1);
    assert_eq!(state.failed_paths(), vec!["b.txt", "c.txt"]);

    let state = fx.engine.retry_failed("site", None).await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.paths(), vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn test_parallel_upload() {
    let fx = fixture(|c| c.connections = 4);
    for i in 0..12 {
        create_file(fx.site.path(), &format!("p/{:02}.html", i), &pattern(1000 + i));
    }
    fx.remote.set_send_delay(Duration::from_millis(2));

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(state.files_completed, 12);
    assert_eq!(fx.remote.paths().len(), 12);
    assert_eq!(fx.remote.connect_count(), 4);
    assert_eq!(fx.engine.signatures().get("site").len(), 12);

    // Progress never went backwards
    let mut last = 0.0;
    for event in fx.recorder.events() {
        if let SyncEvent::Progress { progress, .. } = event {
            assert!(progress >= last);
            last = progress;
        }
    }
}

#[tokio::test]
async fn test_deleted_files_reported_once() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "keep.html", b"keep");
    create_file(fx.site.path(), "old.html", b"old");
    fx.engine.sync("site").await.unwrap();
    fx.engine.reset("site").unwrap();

    fs::remove_file(fx.site.path().join("old.html")).unwrap();
    let plan = fx.engine.plan("site").await.unwrap();
    assert_eq!(plan.stats.deleted_files, 1);
    assert_eq!(plan.deltas.last().unwrap().status, DeltaStatus::Deleted);

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(state.stats.unwrap().deleted_files, 1);

    let plan = fx.engine.plan("site").await.unwrap();
    assert_eq!(plan.stats.deleted_files, 0);
}

#[tokio::test]
async fn test_excluded_paths_are_not_uploaded() {
    let fx = fixture(|_| {});
    let project = ProjectConfig::new("site", fx.site.path())
        .with_endpoint(endpoint())
        .with_rules(SyncRules::new(vec!["node_modules/".into(), "*.log".into()]));
    fx.projects.save(&project).unwrap();

    create_file(fx.site.path(), "index.html", b"hi");
    create_file(fx.site.path(), "debug.log", b"noise");
    create_file(fx.site.path(), "node_modules/x/index.js", b"module");

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.paths(), vec!["index.html"]);
}

#[tokio::test]
async fn test_plan_does_not_connect() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "a.html", b"a");

    let plan = fx.engine.plan("site").await.unwrap();
    assert_eq!(plan.stats.new_files, 1);
    assert_eq!(fx.remote.connect_count(), 0);
    assert!(fx.engine.state("site").is_none());
}

#[tokio::test]
async fn test_pre_sync_snapshot_restores() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "about.html", b"original");

    let state = fx.engine.sync("site").await.unwrap();
    let snapshot_id = state.snapshot_id.unwrap();

    create_file(fx.site.path(), "about.html", b"broken edit");
    let restored = fx
        .engine
        .snapshots()
        .restore("site", &snapshot_id, fx.site.path(), None)
        .unwrap();
    assert_eq!(restored, vec!["about.html"]);
    assert_eq!(fs::read(fx.site.path().join("about.html")).unwrap(), b"original");
}

#[tokio::test]
async fn test_last_sync_time_recorded_on_complete() {
    let fx = fixture(|_| {});
    create_file(fx.site.path(), "a.html", b"a");
    assert!(fx.projects.load("site").unwrap().unwrap().last_sync_at.is_none());

    fx.engine.sync("site").await.unwrap();
    assert!(fx.projects.load("site").unwrap().unwrap().last_sync_at.is_some());
}

#[tokio::test]
async fn test_retry_failed_sends_content_edited_after_failure() {
    let fx = fixture(|_| {});
    let mut content = pattern(1024 * 1024);
    create_file(fx.site.path(), "data.bin", &content);
    fx.engine.sync("site").await.unwrap();
    fx.engine.reset("site").unwrap();

    content[CHUNK_SIZE + 3] ^= 0xff;
    create_file(fx.site.path(), "data.bin", &content);
    fx.remote.fail_path("data.bin", "write refused");
    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Error);
    assert_eq!(state.failed_paths(), vec!["data.bin"]);

    // A second edit lands in a chunk the failed plan never covered
    content[10 * CHUNK_SIZE + 7] ^= 0xff;
    create_file(fx.site.path(), "data.bin", &content);
    fx.remote.heal_path("data.bin");

    let state = fx.engine.retry_failed("site", None).await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.file("data.bin").unwrap().as_ref(), content.as_slice());

    let plan = fx.engine.plan("site").await.unwrap();
    assert_eq!(plan.deltas.len(), 1);
    assert_eq!(plan.deltas[0].status, DeltaStatus::Unchanged);
}

#[tokio::test]
async fn test_file_edited_during_backoff_is_sent_whole() {
    let fx = fixture(|c| {
        c.retry_delay_ms = 300;
        c.max_retry_delay_ms = 300;
    });
    let mut content = pattern(1024 * 1024);
    create_file(fx.site.path(), "data.bin", &content);
    fx.engine.sync("site").await.unwrap();
    fx.engine.reset("site").unwrap();

    content[2 * CHUNK_SIZE] ^= 0xff;
    create_file(fx.site.path(), "data.bin", &content);
    fx.remote.drop_connection_after(0);

    let engine = fx.engine.clone();
    let run = tokio::spawn(async move { engine.sync("site").await });
    wait_for_stage(&fx.engine, "site", Stage::Retrying).await;

    content[12 * CHUNK_SIZE] ^= 0xff;
    create_file(fx.site.path(), "data.bin", &content);

    let state = run.await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.file("data.bin").unwrap().as_ref(), content.as_slice());
    assert!(state
        .logs
        .iter()
        .any(|l| l.message.contains("changed since analysis")));
}

#[tokio::test]
async fn test_interrupted_upload_continues_after_reconnect() {
    let fx = fixture(|_| {});
    let content = pattern(1024 * 1024);
    create_file(fx.site.path(), "video.bin", &content);
    fx.remote.cut_connection_after_bytes(256 * 1024);

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.file("video.bin").unwrap().as_ref(), content.as_slice());
    assert_eq!(fx.remote.connect_count(), 2);

    // The prefix written before the drop is not sent again
    assert_eq!(fx.remote.bytes_sent(), content.len() as u64);
    assert_eq!(state.bytes_sent, 768 * 1024);
    assert!(state
        .logs
        .iter()
        .any(|l| l.message.contains("resuming upload at byte 262144")));
    assert!(fx.engine.sessions().load("site").is_none());
}

#[tokio::test]
async fn test_partial_upload_carries_into_next_run() {
    let fx = fixture(|c| c.max_attempts = 1);
    let content = pattern(1024 * 1024);
    create_file(fx.site.path(), "video.bin", &content);
    fx.remote.cut_connection_after_bytes(512 * 1024);

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Error);
    assert_eq!(state.failed_paths(), vec!["video.bin"]);
    let session = fx.engine.sessions().load("site").unwrap();
    assert_eq!(session.partial["video.bin"].offset, 512 * 1024);

    fx.engine.reset("site").unwrap();
    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.file("video.bin").unwrap().as_ref(), content.as_slice());
    assert_eq!(fx.remote.bytes_sent(), content.len() as u64);
    assert!(fx.engine.sessions().load("site").is_none());
}

#[tokio::test]
async fn test_partial_upload_of_edited_file_starts_over() {
    let fx = fixture(|c| c.max_attempts = 1);
    let mut content = pattern(1024 * 1024);
    create_file(fx.site.path(), "video.bin", &content);
    fx.remote.cut_connection_after_bytes(512 * 1024);
    fx.engine.sync("site").await.unwrap();
    fx.engine.reset("site").unwrap();

    content[100] ^= 0xff;
    create_file(fx.site.path(), "video.bin", &content);

    let before = fx.remote.bytes_sent();
    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(fx.remote.file("video.bin").unwrap().as_ref(), content.as_slice());
    assert_eq!(fx.remote.bytes_sent() - before, content.len() as u64);
}

#[tokio::test]
async fn test_unwritable_signature_store_still_completes() {
    let fx = fixture(|_| {});
    fs::write(fx._data.path().join("signatures"), b"not a directory").unwrap();
    create_file(fx.site.path(), "a.html", b"a");
    create_file(fx.site.path(), "b.html", b"b");

    let state = fx.engine.sync("site").await.unwrap();
    assert_eq!(state.stage, Stage::Complete);
    assert_eq!(state.files_completed, 2);
    assert_eq!(fx.remote.paths(), vec!["a.html", "b.html"]);
    assert!(!state.warnings.is_empty());
    assert!(state
        .warnings
        .iter()
        .any(|w| w.contains("a.html: signature not saved")));
    assert!(fx.engine.signatures().get("site").is_empty());
}
