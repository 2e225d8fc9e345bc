use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the WAL node.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the WAL node.
///
/// Write-path failures reach callers through a `FlushListener` as
/// `FlushOutcome::Failure`, never as a `log()` return value — see
/// `wal_node::buffer`. Read-path and reclaimer failures are logged and
/// turned into an absent result rather than propagated; this enum exists
/// so that those call sites have something concrete to log.
///
/// A missing `get_req`/`get_reqs` result is never an `Error` variant: the
/// node surfaces "not found" as `Option::None`, not `Err`, so there is no
/// `NotFound` here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error while writing: {0}")]
    IoWrite(#[source] std::io::Error),

    #[error("I/O error while reading: {0}")]
    IoRead(#[source] std::io::Error),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("storage engine error: {0}")]
    Upstream(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoWrite(e)
    }
}
