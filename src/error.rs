// File: ./src/error.rs
//! Error types for the room calendar cache.

use thiserror::Error;

/// Errors raised by the cache, its items and the backend seam.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A backend operation that the concrete connector does not provide.
    #[error("{0} is not implemented by this calendar backend")]
    NotImplemented(&'static str),

    #[error("calendar item is missing required attribute '{0}'")]
    MissingAttribute(&'static str),

    #[error("calendar item '{id}' ends ({end}) before it starts ({start})")]
    InvalidInterval {
        id: String,
        start: String,
        end: String,
    },

    #[error("no attachment source available for item '{0}'")]
    NoAttachmentSource(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        CacheError::Storage(format!("{err:#}"))
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
