//! Directory-backed transport
//!
//! The "remote" is a directory on a mounted filesystem (a staging area, a
//! network share, or a test fixture). Ranged writes patch the existing file
//! in place.

use super::{Connection, ProgressFn, RemoteEntry, Transport, SEGMENT_SIZE};
use crate::delta::ByteRange;
use crate::error::{ConnectErrorKind, Error, Result};
use crate::project::Endpoint;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Transport writing into `root/<endpoint remote path>`
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn base_for(&self, endpoint: &Endpoint) -> PathBuf {
        let rel = endpoint.remote_path.trim_start_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        _password: Option<&str>,
    ) -> Result<Box<dyn Connection>> {
        match fs::metadata(&self.root).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => {
                return Err(Error::connect(
                    ConnectErrorKind::Refused,
                    format!("{} is not a directory", self.root.display()),
                ))
            }
            Err(e) => {
                return Err(Error::connect(
                    ConnectErrorKind::Refused,
                    format!("{}: {}", self.root.display(), e),
                ))
            }
        }

        let base = self.base_for(endpoint);
        fs::create_dir_all(&base).await.map_err(|e| {
            Error::connect(
                ConnectErrorKind::Network,
                format!("creating {}: {}", base.display(), e),
            )
        })?;

        tracing::debug!(base = %base.display(), "Local transport connected");
        Ok(Box::new(LocalConnection { base }))
    }
}

/// An open "connection" to a local directory
#[derive(Debug)]
pub struct LocalConnection {
    base: PathBuf,
}

impl LocalConnection {
    fn resolve(&self, remote: &str) -> PathBuf {
        let rel = remote.trim_start_matches('/');
        if rel.is_empty() {
            self.base.clone()
        } else {
            self.base.join(rel)
        }
    }

    async fn send_whole(
        &self,
        local: &Path,
        target: &Path,
        remote: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64> {
        let mut src = fs::File::open(local)
            .await
            .map_err(|e| Error::transfer(remote, format!("opening local file: {}", e)))?;
        let mut dst = fs::File::create(target)
            .await
            .map_err(|e| Error::transfer(remote, format!("creating remote file: {}", e)))?;

        let mut buf = vec![0u8; SEGMENT_SIZE];
        let mut sent = 0u64;
        loop {
            let n = src
                .read(&mut buf)
                .await
                .map_err(|e| Error::transfer(remote, format!("reading: {}", e)))?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])
                .await
                .map_err(|e| Error::transfer(remote, format!("writing: {}", e)))?;
            sent += n as u64;
            progress(sent);
        }
        dst.flush()
            .await
            .map_err(|e| Error::transfer(remote, format!("flushing: {}", e)))?;
        Ok(sent)
    }

    async fn send_ranges(
        &self,
        local: &Path,
        target: &Path,
        remote: &str,
        ranges: &[ByteRange],
        progress: ProgressFn<'_>,
    ) -> Result<u64> {
        let map_err = |what: &str, e: std::io::Error| Error::transfer(remote, format!("{}: {}", what, e));

        let mut src = fs::File::open(local)
            .await
            .map_err(|e| map_err("opening local file", e))?;
        let local_len = src
            .metadata()
            .await
            .map_err(|e| map_err("reading local metadata", e))?
            .len();
        let mut dst = fs::OpenOptions::new()
            .write(true)
            .open(target)
            .await
            .map_err(|e| map_err("opening remote file", e))?;

        let mut buf = vec![0u8; SEGMENT_SIZE];
        let mut sent = 0u64;

        for range in ranges {
            src.seek(SeekFrom::Start(range.offset))
                .await
                .map_err(|e| map_err("seeking local file", e))?;
            dst.seek(SeekFrom::Start(range.offset))
                .await
                .map_err(|e| map_err("seeking remote file", e))?;

            let mut remaining = range.length;
            while remaining > 0 {
                let want = remaining.min(SEGMENT_SIZE as u64) as usize;
                let n = src
                    .read(&mut buf[..want])
                    .await
                    .map_err(|e| map_err("reading", e))?;
                if n == 0 {
                    break;
                }
                dst.write_all(&buf[..n])
                    .await
                    .map_err(|e| map_err("writing", e))?;
                remaining -= n as u64;
                sent += n as u64;
                progress(sent);
            }
        }

        dst.set_len(local_len)
            .await
            .map_err(|e| map_err("truncating remote file", e))?;
        dst.flush().await.map_err(|e| map_err("flushing", e))?;
        Ok(sent)
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn supports_ranges(&self) -> bool {
        true
    }

    async fn send(
        &mut self,
        local: &Path,
        remote: &str,
        ranges: Option<&[ByteRange]>,
        progress: ProgressFn<'_>,
    ) -> Result<u64> {
        let target = self.resolve(remote);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::transfer(remote, format!("creating remote dir: {}", e)))?;
        }

        let remote_exists = fs::try_exists(&target).await.unwrap_or(false);
        match ranges {
            Some(ranges) if remote_exists => {
                self.send_ranges(local, &target, remote, ranges, progress).await
            }
            _ => self.send_whole(local, &target, remote, progress).await,
        }
    }

    async fn remote_size(&mut self, remote: &str) -> Result<Option<u64>> {
        match fs::metadata(self.resolve(remote)).await {
            Ok(m) if m.is_file() => Ok(Some(m.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::transfer(remote, format!("reading remote size: {}", e))),
        }
    }

    async fn list_dir(&mut self, remote: &str) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve(remote);
        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| Error::transfer(remote, format!("listing: {}", e)))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| Error::transfer(remote, format!("listing: {}", e)))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Protocol;
    use tempfile::TempDir;

    fn endpoint(path: &str) -> Endpoint {
        Endpoint::new(Protocol::Sftp, "localhost", "me", path)
    }

    #[tokio::test]
    async fn test_connect_missing_root_is_refused() {
        let tmp = TempDir::new().unwrap();
        let transport = LocalTransport::new(tmp.path().join("nope"));
        let err = transport.connect(&endpoint("/www"), None).await.err().unwrap();
        assert!(matches!(
            err,
            Error::Connect {
                kind: ConnectErrorKind::Refused,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_whole_and_ranged_send() {
        let local = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let transport = LocalTransport::new(remote.path());
        let mut conn = transport.connect(&endpoint("/www"), None).await.unwrap();

        let original: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        std::fs::write(local.path().join("f.bin"), &original).unwrap();
        let sent = conn
            .send(&local.path().join("f.bin"), "assets/f.bin", None, &|_: u64| {})
            .await
            .unwrap();
        assert_eq!(sent, 200);

        let mut updated = original.clone();
        updated[150] = 0xff;
        updated.truncate(180);
        std::fs::write(local.path().join("f.bin"), &updated).unwrap();

        let ranges = [ByteRange::new(128, 52)];
        let sent = conn
            .send(&local.path().join("f.bin"), "assets/f.bin", Some(&ranges), &|_: u64| {})
            .await
            .unwrap();
        assert_eq!(sent, 52);

        let on_remote = std::fs::read(remote.path().join("www/assets/f.bin")).unwrap();
        assert_eq!(on_remote, updated);
        assert_eq!(conn.remote_size("assets/f.bin").await.unwrap(), Some(180));
        assert_eq!(conn.remote_size("assets/none.bin").await.unwrap(), None);

        let listing = conn.list_dir("").await.unwrap();
        assert_eq!(
            listing,
            vec![RemoteEntry {
                name: "assets".into(),
                is_dir: true,
                size: listing[0].size,
            }]
        );
    }
}
