//! Progress store interface
//!
//! The backfill reads and writes learner progress through `ProgressStore`.
//! Implementations: HubSpot CRM contacts over HTTP, a local SQLite table,
//! and an in-memory map for tests and tooling.

pub mod hubspot;
pub mod memory;
pub mod sqlite;

pub use hubspot::HubSpotProgressStore;
pub use memory::MemoryProgressStore;
pub use sqlite::SqliteProgressStore;

use crate::utils::Retryable;
use async_trait::async_trait;
use hhl_common::progress::ProgressState;
use std::time::Duration;
use thiserror::Error;

/// Progress store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network failure, throttling or server-side error; worth retrying
    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Learner not found: {0}")]
    NotFound(String),

    /// Rejected request or unreadable response; retrying will not help
    #[error("Store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        StoreError::Transient(format!("{} timed out after {} ms", operation, after.as_millis()))
    }
}

/// One page of learner identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LearnerPage {
    pub ids: Vec<String>,
    /// Cursor for the next page; `None` on the last page
    pub next_after: Option<String>,
}

/// Learner progress persistence
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Human-readable name for log lines
    fn describe(&self) -> String;

    /// Up to `limit` learner ids after the `after` cursor
    async fn list_learners(
        &self,
        limit: usize,
        after: Option<&str>,
    ) -> Result<LearnerPage, StoreError>;

    /// Raw progress document for a learner; `Ok(None)` when the learner
    /// exists but has no progress recorded
    async fn read_progress(&self, learner_id: &str) -> Result<Option<String>, StoreError>;

    /// Replace a learner's progress document
    async fn write_progress(
        &self,
        learner_id: &str,
        state: &ProgressState,
    ) -> Result<(), StoreError>;
}

pub(crate) fn encode_progress(state: &ProgressState) -> Result<String, StoreError> {
    state
        .to_json()
        .map_err(|e| StoreError::Permanent(format!("cannot encode progress state: {}", e)))
}
