use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{BuildStore, Result, StoreError};
use crate::types::{BuildFlags, BuildId, BuildRecord, BuildRequest, BuildState};

/// Process-local build store
#[derive(Debug, Default)]
pub struct MemoryBuildStore {
    records: DashMap<BuildId, BuildRecord>,
}

impl MemoryBuildStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn create_build(&self, request: &BuildRequest) -> Result<BuildId> {
        let record = BuildRecord::new(BuildId::new(), request.clone());
        let id = record.id;
        self.records.insert(id, record);
        Ok(id)
    }

    async fn set_build_state(&self, id: BuildId, state: BuildState) -> Result<()> {
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !record.state.can_transition_to(state) {
            return Err(StoreError::InvalidTransition {
                id,
                from: record.state,
                to: state,
            });
        }
        record.state = state;
        Ok(())
    }

    async fn set_build_flags(&self, id: BuildId, flags: BuildFlags) -> Result<()> {
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.failed = flags.failed;
        record.finished = flags.finished;
        Ok(())
    }

    async fn set_completed_timestamp(&self, id: BuildId) -> Result<()> {
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_build(&self, id: BuildId) -> Result<BuildRecord> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete_build(&self, id: BuildId) -> Result<()> {
        self.records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
