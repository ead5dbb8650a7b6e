//! SQLite progress store
//!
//! One row per learner in `learner_progress`; the schema is created by
//! `hhl_common::db`.

use super::{encode_progress, LearnerPage, ProgressStore, StoreError};
use async_trait::async_trait;
use hhl_common::progress::ProgressState;
use sqlx::{Row, SqlitePool};
use std::path::Path;

pub struct SqliteProgressStore {
    pool: SqlitePool,
}

impl SqliteProgressStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file
    pub async fn open(db_path: &Path) -> hhl_common::Result<Self> {
        Ok(Self::new(hhl_common::db::init_database(db_path).await?))
    }

    pub async fn in_memory() -> hhl_common::Result<Self> {
        Ok(Self::new(hhl_common::db::connect_in_memory().await?))
    }

    /// Insert or replace a learner row with a raw document
    pub async fn upsert_raw(&self, learner_id: &str, raw: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO learner_progress (contact_id, progress_state)
            VALUES (?, ?)
            ON CONFLICT(contact_id) DO UPDATE SET
                progress_state = excluded.progress_state,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            "#,
        )
        .bind(learner_id)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

/// Lock contention and pool exhaustion clear up on their own; everything
/// else is permanent
fn db_error(e: sqlx::Error) -> StoreError {
    let transient = match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            message.contains("database is locked") || message.contains("database is busy")
        }
        _ => false,
    };
    if transient {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Permanent(e.to_string())
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    fn describe(&self) -> String {
        "sqlite".to_string()
    }

    async fn list_learners(
        &self,
        limit: usize,
        after: Option<&str>,
    ) -> Result<LearnerPage, StoreError> {
        let limit = limit.max(1);
        let rows = sqlx::query(
            r#"
            SELECT contact_id FROM learner_progress
            WHERE contact_id > ?
            ORDER BY contact_id
            LIMIT ?
            "#,
        )
        .bind(after.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<String, _>("contact_id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;

        // A short page is the last one
        let next_after = if ids.len() == limit { ids.last().cloned() } else { None };
        Ok(LearnerPage { ids, next_after })
    }

    async fn read_progress(&self, learner_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT progress_state FROM learner_progress WHERE contact_id = ?")
            .bind(learner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => Ok(row
                .try_get::<Option<String>, _>("progress_state")
                .map_err(db_error)?
                .filter(|raw| !raw.trim().is_empty())),
            None => Err(StoreError::NotFound(format!("learner {}", learner_id))),
        }
    }

    async fn write_progress(
        &self,
        learner_id: &str,
        state: &ProgressState,
    ) -> Result<(), StoreError> {
        let raw = encode_progress(state)?;
        let result = sqlx::query(
            r#"
            UPDATE learner_progress
            SET progress_state = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE contact_id = ?
            "#,
        )
        .bind(&raw)
        .bind(learner_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("learner {}", learner_id)));
        }
        Ok(())
    }
}
