//! Boundary between the engine and the wire protocol
//!
//! The engine never speaks FTP or SFTP itself. It drives a [`Transport`]
//! that opens [`Connection`]s; each connection sends whole files or byte
//! ranges of files to the remote side and can list remote directories.

pub mod local;
pub mod memory;

pub use local::LocalTransport;
pub use memory::MemoryTransport;

use crate::delta::ByteRange;
use crate::error::Result;
use crate::project::Endpoint;
use async_trait::async_trait;
use std::path::Path;

/// Progress callback receiving bytes written so far for the current file
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// An entry in a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Opens connections to a remote endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Establish a connection
    ///
    /// Failures are reported as [`crate::Error::Connect`] with a kind that
    /// tells refused, authentication, timeout and network problems apart.
    async fn connect(&self, endpoint: &Endpoint, password: Option<&str>)
        -> Result<Box<dyn Connection>>;
}

/// A live connection to the remote side
#[async_trait]
pub trait Connection: Send {
    /// Whether ranged writes into an existing remote file are possible
    fn supports_ranges(&self) -> bool;

    /// Send `local` to `remote` (relative to the endpoint's base path)
    ///
    /// With `ranges`, only those byte ranges are written into the existing
    /// remote file and the remote file is cut to the local length. Returns
    /// the number of bytes sent. `progress` is called after every segment.
    ///
    /// A per-file problem is [`crate::Error::Transfer`]; losing the
    /// connection is [`crate::Error::ConnectionLost`].
    async fn send(
        &mut self,
        local: &Path,
        remote: &str,
        ranges: Option<&[ByteRange]>,
        progress: ProgressFn<'_>,
    ) -> Result<u64>;

    /// Size of a remote file, `None` if it does not exist
    ///
    /// Used to continue an interrupted whole-file upload, which writes its
    /// partial content in place from the start of the file.
    async fn remote_size(&mut self, remote: &str) -> Result<Option<u64>>;

    /// List a remote directory (relative to the base path, `""` for the root)
    async fn list_dir(&mut self, remote: &str) -> Result<Vec<RemoteEntry>>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Size of a single write segment
pub const SEGMENT_SIZE: usize = 64 * 1024;
