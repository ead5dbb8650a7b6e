//! hhl-backfill - Completion flag backfill
//!
//! Walks every learner in a progress store, recomputes course and pathway
//! completion from module-level progress against the current metadata, and
//! writes back only the flags that changed.
//!
//! **Per-learner unit:** read progress → reconcile flags → write (skipped in
//! dry-run). Learners of one batch run concurrently; the steps for a single
//! learner never interleave.

pub mod orchestrator;
pub mod reconcile;
pub mod store;
pub mod utils;

pub use orchestrator::report::{
    BackfillFailure, BackfillReport, BackfillSummary, FailureKind, LearnerChanges,
};
pub use orchestrator::{BackfillOptions, BackfillOrchestrator};
pub use reconcile::{reconcile_progress_state, FlagChange, Reconciliation};
pub use store::{LearnerPage, ProgressStore, StoreError};
pub use utils::retry::{retry_transient, RetryPolicy};
