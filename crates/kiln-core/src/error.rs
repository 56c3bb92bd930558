//! Error types for kiln-core
//!
//! Engine operations surface exactly two classes to callers: bad requests
//! (malformed input, unknown build, saturated queue) and internal errors.

use thiserror::Error;

use crate::store::StoreError;
use crate::types::BuildId;

/// Caller-facing error class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller can fix the request (or retry later)
    BadRequest,
    /// Failure unrelated to caller input
    Internal,
}

impl ErrorKind {
    /// Wire name used by the API surface
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Request failed validation
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Admission queue is saturated
    #[error("build queue is full; try again later")]
    QueueFull,

    /// Unknown build identifier
    #[error("build not found: {0}")]
    NotFound(BuildId),

    /// Persistence failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify for the API surface
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest(_) | Error::QueueFull | Error::NotFound(_) => ErrorKind::BadRequest,
            Error::Store(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests;
