//! Backfill run statistics and audit artifacts
//!
//! Every run produces three JSON files so a reviewer can see exactly what a
//! non-dry run would change:
//! - `backfill-summary.json`: counters and timing
//! - `backfill-failures.json`: per-learner failures and validation errors
//! - `backfill-changes.json`: every corrected flag, per learner

use crate::reconcile::FlagChange;
use chrono::{DateTime, Utc};
use hhl_common::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SUMMARY_FILE: &str = "backfill-summary.json";
pub const FAILURES_FILE: &str = "backfill-failures.json";
pub const CHANGES_FILE: &str = "backfill-changes.json";

/// Run counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillSummary {
    pub run_id: Uuid,
    pub dry_run: bool,
    /// Learners fetched from the store
    pub total_contacts: usize,
    /// Learners that made it through read and reconcile (and write)
    pub processed: usize,
    /// Learners with at least one corrected flag
    pub updated: usize,
    /// In-sync learners passed over by `--skip-synced`
    pub skipped_synced: usize,
    pub failed: usize,
    pub validation_errors: usize,
    pub courses_updated: usize,
    pub pathways_updated: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
}

impl BackfillSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            total_contacts: 0,
            processed: 0,
            updated: 0,
            skipped_synced: 0,
            failed: 0,
            validation_errors: 0,
            courses_updated: 0,
            pathways_updated: 0,
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: 0.0,
        }
    }
}

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Stored progress document is not valid JSON
    InvalidJson,
    /// Progress document mentions a slug the metadata does not know
    UnknownEntity,
    StoreRead,
    StoreWrite,
    /// A page of learners could not be fetched; paging stopped
    BatchFetch,
}

impl FailureKind {
    /// Counted under `validation_errors` rather than `failed` alone
    pub fn is_validation_error(&self) -> bool {
        matches!(self, FailureKind::InvalidJson | FailureKind::UnknownEntity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillFailure {
    /// `None` for failures not tied to one learner
    pub contact_id: Option<String>,
    pub kind: FailureKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerChanges {
    pub contact_id: String,
    pub changes: Vec<FlagChange>,
}

/// Where `write_artifacts` put the files
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub summary: PathBuf,
    pub failures: PathBuf,
    pub changes: PathBuf,
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub summary: BackfillSummary,
    pub failures: Vec<BackfillFailure>,
    pub changes: Vec<LearnerChanges>,
}

impl BackfillReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            summary: BackfillSummary::new(dry_run),
            failures: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Stamp end time and duration
    pub fn finish(&mut self) {
        let end = Utc::now();
        self.summary.duration_seconds =
            (end - self.summary.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        self.summary.end_time = Some(end);
    }

    /// Any failure or validation error makes the run unsuccessful
    pub fn has_errors(&self) -> bool {
        self.summary.failed > 0 || self.summary.validation_errors > 0
    }

    /// Write all three artifacts into `dir`, creating it if needed
    pub async fn write_artifacts(&self, dir: &Path) -> Result<ArtifactPaths> {
        tokio::fs::create_dir_all(dir).await?;

        let paths = ArtifactPaths {
            summary: dir.join(SUMMARY_FILE),
            failures: dir.join(FAILURES_FILE),
            changes: dir.join(CHANGES_FILE),
        };

        tokio::fs::write(&paths.summary, serde_json::to_vec_pretty(&self.summary)?).await?;
        tokio::fs::write(&paths.failures, serde_json::to_vec_pretty(&self.failures)?).await?;
        tokio::fs::write(&paths.changes, serde_json::to_vec_pretty(&self.changes)?).await?;

        tracing::info!(
            dir = %dir.display(),
            failures = self.failures.len(),
            changed_learners = self.changes.len(),
            "Backfill artifacts written"
        );
        Ok(paths)
    }

    /// Human-readable run summary for the console
    pub fn console_summary(&self) -> String {
        self.summary.to_string()
    }
}

impl std::fmt::Display for BackfillSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = "========================================";
        writeln!(f, "{rule}\nCompletion backfill summary\n{rule}")?;
        writeln!(f, "Run ID:              {}", self.run_id)?;
        writeln!(f, "Mode:                {}", if self.dry_run { "DRY RUN" } else { "LIVE" })?;
        writeln!(f, "Total contacts:      {}", self.total_contacts)?;
        writeln!(f, "Processed:           {}", self.processed)?;
        writeln!(f, "Updated:             {}", self.updated)?;
        writeln!(f, "Skipped (synced):    {}", self.skipped_synced)?;
        writeln!(f, "Failed:              {}", self.failed)?;
        writeln!(f, "Validation errors:   {}", self.validation_errors)?;
        writeln!(f, "Courses updated:     {}", self.courses_updated)?;
        writeln!(f, "Pathways updated:    {}", self.pathways_updated)?;
        writeln!(f, "Duration:            {:.2}s", self.duration_seconds)?;
        if self.dry_run && self.updated > 0 {
            writeln!(f, "No changes were persisted. Re-run without --dry-run to apply.")?;
        }
        Ok(())
    }
}
