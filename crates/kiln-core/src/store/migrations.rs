use super::{Result, SqliteBuildStore, StoreError};

impl SqliteBuildStore {
    /// Run database migrations
    pub(super) async fn migrate(&self) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Internal(format!("Migration transaction failed: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS builds (
                id TEXT PRIMARY KEY,
                request_json TEXT NOT NULL,
                state TEXT NOT NULL,
                failed BOOLEAN NOT NULL DEFAULT FALSE,
                finished BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Internal(format!("Migration failed (builds): {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_builds_finished ON builds(finished)")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                StoreError::Internal(format!("Migration failed (idx_builds_finished): {}", e))
            })?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        Ok(())
    }
}
