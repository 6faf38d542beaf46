use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error taxonomy for a scan run. Everything the engine can fail with is one
/// of these variants, so callers can decide between aborting, waiting for a
/// rate-limit reset, or resuming from a checkpoint.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("organization '{0}' not found")]
    OrgNotFound(String),

    #[error("rate limit exceeded on all credentials; resets at {reset:?}")]
    RateLimited { reset: Option<DateTime<Utc>> },

    #[error("server error HTTP {status} after {attempts} attempts")]
    Server { status: u16, attempts: u32 },

    #[error("network error after {attempts} attempts: {message}")]
    Network { message: String, attempts: u32 },

    #[error("connection blocked (not retryable): {0}")]
    Blocked(String),

    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("unexpected HTTP {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("{0}")]
    Unknown(String),
}
