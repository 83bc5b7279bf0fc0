//! In-memory transport with fault injection
//!
//! Holds remote files in a map and can be told to refuse connections, reject
//! credentials, hang, fail specific files, drop the connection part way
//! through a queue or in the middle of a file. Clones share state, so a test can keep a handle while the
//! engine owns another.

use super::{Connection, ProgressFn, RemoteEntry, Transport, SEGMENT_SIZE};
use crate::delta::ByteRange;
use crate::error::{ConnectErrorKind, Error, Result};
use crate::project::Endpoint;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    /// Consumed one per connect attempt
    connect_failures: VecDeque<ConnectErrorKind>,
    /// Applied to every connect attempt once the queue above is empty
    always_fail: Option<ConnectErrorKind>,
    password: Option<String>,
    connect_delay: Duration,
    send_delay: Duration,
    /// Successful sends left before the connection drops
    drop_after: Option<usize>,
    /// Bytes of the next whole-file upload written before the connection drops
    cut_after: Option<u64>,
    list_fails: bool,
    list_delay: Duration,
    ranges: bool,
}

#[derive(Debug, Default)]
struct Inner {
    files: DashMap<String, Bytes>,
    failing_paths: DashMap<String, String>,
    faults: Mutex<Faults>,
    connects: AtomicUsize,
    sends: AtomicUsize,
    bytes_sent: AtomicU64,
}

/// Transport whose remote side lives in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Empty remote that accepts every connection and supports ranged writes
    pub fn new() -> Self {
        let transport = Self::default();
        transport.faults().ranges = true;
        transport
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        lock(&self.inner.faults)
    }

    // ==================== Fault injection ====================

    /// Fail the next connect attempts with these kinds, in order
    pub fn fail_connects(&self, kinds: impl IntoIterator<Item = ConnectErrorKind>) -> &Self {
        self.faults().connect_failures.extend(kinds);
        self
    }

    /// Fail every connect attempt with `kind` (`None` to stop)
    pub fn fail_all_connects(&self, kind: Option<ConnectErrorKind>) -> &Self {
        self.faults().always_fail = kind;
        self
    }

    /// Require this password, failing with an authentication error otherwise
    pub fn require_password(&self, password: impl Into<String>) -> &Self {
        self.faults().password = Some(password.into());
        self
    }

    /// Delay every connect attempt
    pub fn set_connect_delay(&self, delay: Duration) -> &Self {
        self.faults().connect_delay = delay;
        self
    }

    /// Delay every written segment
    pub fn set_send_delay(&self, delay: Duration) -> &Self {
        self.faults().send_delay = delay;
        self
    }

    /// Reject uploads of `path` with a per-file error
    pub fn fail_path(&self, path: impl Into<String>, message: impl Into<String>) -> &Self {
        self.inner.failing_paths.insert(path.into(), message.into());
        self
    }

    /// Stop rejecting uploads of `path`
    pub fn heal_path(&self, path: &str) -> &Self {
        self.inner.failing_paths.remove(path);
        self
    }

    /// Lose the connection after `sends` more successful uploads (one shot)
    pub fn drop_connection_after(&self, sends: usize) -> &Self {
        self.faults().drop_after = Some(sends);
        self
    }

    /// Lose the connection after `bytes` of the next whole-file upload,
    /// keeping the partial file on the remote side (one shot)
    pub fn cut_connection_after_bytes(&self, bytes: u64) -> &Self {
        self.faults().cut_after = Some(bytes);
        self
    }

    /// Delay every directory listing
    pub fn set_list_delay(&self, delay: Duration) -> &Self {
        self.faults().list_delay = delay;
        self
    }

    /// Make directory listings fail
    pub fn fail_listing(&self, fail: bool) -> &Self {
        self.faults().list_fails = fail;
        self
    }

    /// Toggle ranged-write support
    pub fn set_supports_ranges(&self, ranges: bool) -> &Self {
        self.faults().ranges = ranges;
        self
    }

    // ==================== Inspection ====================

    /// Put a file on the remote side directly
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.inner.files.insert(path.into(), data.into());
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.inner.files.get(path).map(|f| f.value().clone())
    }

    /// Remote paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.files.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Connect attempts so far, successful or not
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Completed uploads so far
    pub fn send_count(&self) -> usize {
        self.inner.sends.load(Ordering::SeqCst)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        password: Option<&str>,
    ) -> Result<Box<dyn Connection>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let (delay, failure, expected) = {
            let mut faults = self.faults();
            let failure = faults.connect_failures.pop_front().or(faults.always_fail);
            (faults.connect_delay, failure, faults.password.clone())
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = failure {
            return Err(Error::connect(kind, format!("injected failure for {}", endpoint.host)));
        }
        if let Some(expected) = expected {
            if password != Some(expected.as_str()) {
                return Err(Error::connect(ConnectErrorKind::Auth, "password rejected"));
            }
        }

        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
            open: true,
        }))
    }
}

/// A connection to a [`MemoryTransport`]
#[derive(Debug)]
pub struct MemoryConnection {
    inner: Arc<Inner>,
    open: bool,
}

impl MemoryConnection {
    fn faults(&self) -> MutexGuard<'_, Faults> {
        lock(&self.inner.faults)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn supports_ranges(&self) -> bool {
        self.faults().ranges
    }

    async fn send(
        &mut self,
        local: &Path,
        remote: &str,
        ranges: Option<&[ByteRange]>,
        progress: ProgressFn<'_>,
    ) -> Result<u64> {
        if !self.open {
            return Err(Error::ConnectionLost {
                message: "connection closed".into(),
            });
        }

        let send_delay = {
            let mut faults = self.faults();
            if faults.drop_after == Some(0) {
                faults.drop_after = None;
                drop(faults);
                self.open = false;
                return Err(Error::ConnectionLost {
                    message: "injected disconnect".into(),
                });
            }
            faults.send_delay
        };

        if let Some(message) = self.inner.failing_paths.get(remote) {
            return Err(Error::transfer(remote, message.value().clone()));
        }

        let data = tokio::fs::read(local)
            .await
            .map_err(|e| Error::transfer(remote, format!("reading local file: {}", e)))?;

        let existing = self.inner.files.get(remote).map(|f| f.value().clone());
        let (mut content, segments): (Vec<u8>, Vec<ByteRange>) = match (ranges, existing) {
            (Some(ranges), Some(existing)) if self.supports_ranges() => {
                let mut patched = existing.to_vec();
                patched.resize(data.len(), 0);
                for range in ranges {
                    let start = range.offset as usize;
                    let end = (range.end() as usize).min(data.len());
                    if start < end {
                        patched[start..end].copy_from_slice(&data[start..end]);
                    }
                }
                (patched, ranges.to_vec())
            }
            _ => {
                let whole = ByteRange::new(0, data.len() as u64);
                (data, vec![whole])
            }
        };

        let whole = segments.len() == 1 && segments[0].offset == 0 && ranges.is_none();
        let cut = {
            let mut faults = self.faults();
            match faults.cut_after {
                Some(at) if whole && at < content.len() as u64 => faults.cut_after.take(),
                _ => None,
            }
        };

        let mut sent = 0u64;
        for range in &segments {
            let mut remaining = range.length;
            while remaining > 0 {
                let mut step = remaining.min(SEGMENT_SIZE as u64);
                if let Some(at) = cut {
                    step = step.min(at - sent);
                    if step == 0 {
                        content.truncate(sent as usize);
                        self.inner.files.insert(remote.to_string(), Bytes::from(content));
                        self.inner.bytes_sent.fetch_add(sent, Ordering::SeqCst);
                        self.open = false;
                        return Err(Error::ConnectionLost {
                            message: format!("injected disconnect after {} bytes", sent),
                        });
                    }
                }
                if !send_delay.is_zero() {
                    tokio::time::sleep(send_delay).await;
                }
                remaining -= step;
                sent += step;
                progress(sent);
            }
        }

        self.inner.files.insert(remote.to_string(), Bytes::from(content));
        self.inner.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.bytes_sent.fetch_add(sent, Ordering::SeqCst);

        if let Some(left) = self.faults().drop_after.as_mut() {
            *left = left.saturating_sub(1);
        }
        Ok(sent)
    }

    async fn remote_size(&mut self, remote: &str) -> Result<Option<u64>> {
        if !self.open {
            return Err(Error::ConnectionLost {
                message: "connection closed".into(),
            });
        }
        Ok(self.inner.files.get(remote).map(|f| f.value().len() as u64))
    }

    async fn list_dir(&mut self, remote: &str) -> Result<Vec<RemoteEntry>> {
        let (fails, delay) = {
            let faults = self.faults();
            (faults.list_fails, faults.list_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(Error::transfer(remote, "listing not permitted"));
        }

        let prefix = remote.trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let mut entries: BTreeMap<String, RemoteEntry> = BTreeMap::new();
        for file in self.inner.files.iter() {
            let Some(rest) = file.key().strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    entries.entry(dir.to_string()).or_insert(RemoteEntry {
                        name: dir.to_string(),
                        is_dir: true,
                        size: 0,
                    });
                }
                None => {
                    entries.insert(
                        rest.to_string(),
                        RemoteEntry {
                            name: rest.to_string(),
                            is_dir: false,
                            size: file.value().len() as u64,
                        },
                    );
                }
            }
        }
        Ok(entries.into_values().collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Protocol;
    use tempfile::TempDir;

    fn endpoint() -> Endpoint {
        Endpoint::new(Protocol::Ftp, "mem", "u", "/")
    }

    #[tokio::test]
    async fn test_connect_failures_are_consumed_in_order() {
        let transport = MemoryTransport::new();
        transport.fail_connects([ConnectErrorKind::Timeout, ConnectErrorKind::Refused]);

        for expected in [ConnectErrorKind::Timeout, ConnectErrorKind::Refused] {
            match transport.connect(&endpoint(), None).await {
                Err(Error::Connect { kind, .. }) => assert_eq!(kind, expected),
                _ => panic!("expected connect failure"),
            }
        }
        assert!(transport.connect(&endpoint(), None).await.is_ok());
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_password_check() {
        let transport = MemoryTransport::new();
        transport.require_password("secret");
        assert!(matches!(
            transport.connect(&endpoint(), Some("wrong")).await.err(),
            Some(Error::Connect {
                kind: ConnectErrorKind::Auth,
                ..
            })
        ));
        assert!(transport.connect(&endpoint(), Some("secret")).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_ranges_and_drop() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("a.bin");
        std::fs::write(&local, b"HELLO world").unwrap();

        let transport = MemoryTransport::new();
        transport.insert("a.bin", Bytes::from_static(b"hello world!!"));
        transport.drop_connection_after(1);

        let mut conn = transport.connect(&endpoint(), None).await.unwrap();
        let sent = conn
            .send(&local, "a.bin", Some(&[ByteRange::new(0, 5)]), &|_: u64| {})
            .await
            .unwrap();
        assert_eq!(sent, 5);
        assert_eq!(transport.file("a.bin").unwrap(), Bytes::from_static(b"HELLO world"));

        let err = conn.send(&local, "b.bin", None, &|_: u64| {}).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_list_dir() {
        let transport = MemoryTransport::new();
        transport.insert("index.html", Bytes::from_static(b"<html>"));
        transport.insert("css/site.css", Bytes::from_static(b"body{}"));

        let mut conn = transport.connect(&endpoint(), None).await.unwrap();
        let names: Vec<_> = conn
            .list_dir("")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.is_dir))
            .collect();
        assert_eq!(
            names,
            vec![("css".to_string(), true), ("index.html".to_string(), false)]
        );

        transport.fail_listing(true);
        assert!(conn.list_dir("").await.is_err());
    }

    #[tokio::test]
    async fn test_cut_keeps_partial_file() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&local, &data).unwrap();

        let transport = MemoryTransport::new();
        transport.cut_connection_after_bytes(100_000);

        let mut conn = transport.connect(&endpoint(), None).await.unwrap();
        let err = conn.send(&local, "big.bin", None, &|_: u64| {}).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost { .. }));
        assert_eq!(transport.file("big.bin").unwrap().len(), 100_000);
        assert_eq!(&transport.file("big.bin").unwrap()[..], &data[..100_000]);

        let mut conn = transport.connect(&endpoint(), None).await.unwrap();
        assert_eq!(conn.remote_size("big.bin").await.unwrap(), Some(100_000));
        let tail = [ByteRange::new(100_000, 100_000)];
        let sent = conn.send(&local, "big.bin", Some(&tail), &|_: u64| {}).await.unwrap();
        assert_eq!(sent, 100_000);
        assert_eq!(&transport.file("big.bin").unwrap()[..], &data[..]);
        assert_eq!(conn.remote_size("missing").await.unwrap(), None);
    }
}
