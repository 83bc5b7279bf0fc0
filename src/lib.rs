//! sitesync - delta-aware one-way site synchronization
//!
//! Local site trees are fingerprinted with per-chunk signatures so that each
//! sync sends only new files and the changed byte ranges of modified ones.
//! Every sync is preceded by a snapshot of the local tree, which can later be
//! diffed against other snapshots or restored.

pub mod cli;
pub mod config;
pub mod delta;
pub mod error;
pub mod format;
pub mod persist;
pub mod probe;
pub mod progress;
pub mod project;
pub mod retry;
pub mod scan;
pub mod signature;
pub mod snapshot;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use sync::{SyncEngine, SyncPlan};
