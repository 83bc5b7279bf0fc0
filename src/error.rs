//! Error types for sitesync

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sitesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectErrorKind {
    /// Remote actively refused the connection (or no route to it)
    Refused,
    /// Credentials were rejected
    Auth,
    /// Connection did not complete within the allowed time
    Timeout,
    /// Any other network-level failure (DNS, reset, handshake)
    Network,
}

impl fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectErrorKind::Refused => "refused",
            ConnectErrorKind::Auth => "authentication failed",
            ConnectErrorKind::Timeout => "timed out",
            ConnectErrorKind::Network => "network error",
        };
        f.write_str(s)
    }
}

/// Main error type for sitesync
#[derive(Error, Debug)]
pub enum Error {
    /// Local filesystem errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A file disappeared between enumeration and read
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    /// Connecting to the remote endpoint failed
    #[error("Connection {kind}: {message}")]
    Connect {
        kind: ConnectErrorKind,
        message: String,
    },

    /// An established connection dropped mid-transfer
    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    /// A single file could not be transferred
    #[error("Transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },

    /// Missing or invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A snapshot id does not exist for the project
    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: String },

    /// A sync request was refused before any state transition
    #[error("Sync rejected: {reason}")]
    Rejected { reason: String },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// A persisted record could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connect error
    pub fn connect(kind: ConnectErrorKind, message: impl Into<String>) -> Self {
        Self::Connect {
            kind,
            message: message.into(),
        }
    }

    /// Create a per-file transfer error
    pub fn transfer(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a rejection
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Map an I/O error, turning `NotFound` into [`Error::NotFound`] for `path`
    pub fn from_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path: path.into() }
        } else {
            Self::io("reading file", source)
        }
    }

    /// Connection-level failure (drives retry and terminal transitions)
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::ConnectionLost { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connect { kind, .. } => *kind != ConnectErrorKind::Auth,
            Error::ConnectionLost { .. } => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: format!("TOML parse error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::connect(ConnectErrorKind::Timeout, "slow").is_retryable());
        assert!(Error::connect(ConnectErrorKind::Refused, "no").is_retryable());
        assert!(!Error::connect(ConnectErrorKind::Auth, "bad password").is_retryable());
        assert!(Error::ConnectionLost {
            message: "reset".into()
        }
        .is_retryable());
        assert!(!Error::transfer("a.html", "permission denied").is_retryable());
        assert!(!Error::config("missing host").is_retryable());
    }

    #[test]
    fn test_from_read_maps_not_found() {
        let err = Error::from_read(
            "gone.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "x"),
        );
        assert!(matches!(err, Error::NotFound { .. }));

        let err = Error::from_read(
            "locked.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "x"),
        );
        assert!(matches!(err, Error::Io { .. }));
    }
}
