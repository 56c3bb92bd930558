use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::path::Path;
use uuid::Uuid;

use super::{BuildStore, Result, StoreError};
use crate::types::{BuildFlags, BuildId, BuildRecord, BuildRequest, BuildState};

/// SQLite-based build store
pub struct SqliteBuildStore {
    pub(super) pool: Pool<Sqlite>,
}

#[derive(Debug, FromRow)]
struct BuildRow {
    id: String,
    request_json: String,
    state: String,
    failed: bool,
    finished: bool,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<BuildRow> for BuildRecord {
    type Error = StoreError;

    fn try_from(row: BuildRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| StoreError::Internal(format!("corrupt build id {}: {}", row.id, e)))?;
        let state = row.state.parse::<BuildState>().map_err(StoreError::Internal)?;
        Ok(BuildRecord {
            id: BuildId::from_uuid(id),
            request: serde_json::from_str(&row.request_json)?,
            state,
            failed: row.failed,
            finished: row.finished,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

impl SqliteBuildStore {
    /// Create a new store from database path
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Internal(format!("Failed to create directory: {}", e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create a store backed by a private in-memory database
    pub async fn in_memory() -> Result<Self> {
        // One connection, otherwise each pooled connection opens its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn current_state(&self, id: BuildId) -> Result<BuildState> {
        let state: Option<(String,)> = sqlx::query_as("SELECT state FROM builds WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match state {
            Some((s,)) => s.parse().map_err(StoreError::Internal),
            None => Err(StoreError::NotFound(id)),
        }
    }
}

#[async_trait]
impl BuildStore for SqliteBuildStore {
    async fn create_build(&self, request: &BuildRequest) -> Result<BuildId> {
        let record = BuildRecord::new(BuildId::new(), request.clone());
        let request_json = serde_json::to_string(&record.request)?;

        sqlx::query(
            r#"
            INSERT INTO builds (id, request_json, state, failed, finished, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(request_json)
        .bind(record.state.as_str())
        .bind(record.failed)
        .bind(record.finished)
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(record.id)
    }

    async fn set_build_state(&self, id: BuildId, state: BuildState) -> Result<()> {
        let Some(from) = state.predecessor() else {
            let current = self.current_state(id).await?;
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: state,
            });
        };

        // Compare-and-set on the single legal predecessor keeps transitions monotonic.
        let result = sqlx::query("UPDATE builds SET state = ? WHERE id = ? AND state = ?")
            .bind(state.as_str())
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            let current = self.current_state(id).await?;
            return Err(StoreError::InvalidTransition {
                id,
                from: current,
                to: state,
            });
        }

        Ok(())
    }

    async fn set_build_flags(&self, id: BuildId, flags: BuildFlags) -> Result<()> {
        let result = sqlx::query("UPDATE builds SET failed = ?, finished = ? WHERE id = ?")
            .bind(flags.failed)
            .bind(flags.finished)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    async fn set_completed_timestamp(&self, id: BuildId) -> Result<()> {
        let result = sqlx::query("UPDATE builds SET completed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    async fn get_build(&self, id: BuildId) -> Result<BuildRecord> {
        let row: BuildRow = sqlx::query_as("SELECT * FROM builds WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        row.try_into()
    }

    async fn delete_build(&self, id: BuildId) -> Result<()> {
        let result = sqlx::query("DELETE FROM builds WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }
}
