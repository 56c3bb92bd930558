//! Build record persistence
//!
//! The engine talks to persistence only through [`BuildStore`], keyed by
//! [`BuildId`]. Two backends ship with the crate:
//!
//! - [`SqliteBuildStore`]: durable SQLite storage
//! - [`MemoryBuildStore`]: process-local storage for tests and ephemeral runs

mod memory;
mod migrations;
mod sqlite;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{BuildFlags, BuildId, BuildRecord, BuildRequest, BuildState};

pub use memory::MemoryBuildStore;
pub use sqlite::SqliteBuildStore;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// No record for the identifier
    #[error("build not found: {0}")]
    NotFound(BuildId),
    /// Write would move the record backwards or out of a terminal state
    #[error("invalid state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Build identifier
        id: BuildId,
        /// Persisted state
        from: BuildState,
        /// Requested state
        to: BuildState,
    },
    /// Anything else (I/O, corrupt rows)
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Create/read/update/delete operations on build records.
///
/// Implementations must reject state writes that are not edges of the
/// lifecycle graph (see [`BuildState::can_transition_to`]).
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Persist a new record in `CREATED` and return its identifier
    async fn create_build(&self, request: &BuildRequest) -> Result<BuildId>;

    /// Move the record to `state`
    async fn set_build_state(&self, id: BuildId, state: BuildState) -> Result<()>;

    /// Overwrite the `failed`/`finished` flags
    async fn set_build_flags(&self, id: BuildId, flags: BuildFlags) -> Result<()>;

    /// Stamp the completion time with the current time
    async fn set_completed_timestamp(&self, id: BuildId) -> Result<()>;

    /// Fetch a record
    async fn get_build(&self, id: BuildId) -> Result<BuildRecord>;

    /// Remove a record (admission rollback only)
    async fn delete_build(&self, id: BuildId) -> Result<()>;
}
