//! Typed error taxonomy for the logging pipeline.
//!
//! Library-internal functions return `Result<T, CoreError>`; the binary and
//! any outer orchestration use `anyhow::Result` with `.context(...)`, so a
//! caller that only wants to propagate a failure up to `main` never has to
//! match on the concrete variant.

use thiserror::Error;

/// Errors produced by the core logging pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("storage substrate unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage full: could not reclaim {needed} bytes")]
    StorageFull { needed: u64 },

    #[error("short write to {path}: wrote {wrote} of {requested} bytes")]
    FileIoShortWrite {
        path: String,
        wrote: usize,
        requested: usize,
    },

    #[error("failed to open log file {path}: {source}")]
    FileIoOpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bus {0} is disabled")]
    BusDisabled(u8),

    #[error("block buffer full on bus {0}")]
    BufferFull(u8),

    #[error("wifi association to {ssid} timed out")]
    WifiAssocTimeout { ssid: String },

    #[error("wifi scan failed: {0}")]
    WifiScanFailed(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for library-internal, typed-error APIs.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
