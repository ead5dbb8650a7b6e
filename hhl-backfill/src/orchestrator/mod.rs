//! Backfill orchestrator
//!
//! **Lifecycle:**
//! 1. Page through learners (`batch_size` per page), or take the single
//!    learner named by `contact_id`
//! 2. Process a page with up to `concurrency` learners in flight
//! 3. Each learner is one unit: read → reconcile → write (unless dry-run)
//! 4. Fold every learner outcome into the report, then fetch the next page
//!
//! Store calls go through `retry_transient`. A learner whose calls keep
//! failing is recorded as failed and the batch carries on; a page that
//! cannot be fetched ends paging with a `batch_fetch` failure.

pub mod report;

use crate::reconcile::{reconcile_progress_state, FlagChange, UnknownEntity};
use crate::store::{LearnerPage, ProgressStore, StoreError};
use crate::utils::{retry_transient, RetryPolicy};
use futures::stream::{self, StreamExt};
use hhl_common::completion::{EntityType, MetadataSnapshot};
use hhl_common::config::HhlConfig;
use hhl_common::progress::ProgressState;
use report::{BackfillFailure, BackfillReport, FailureKind, LearnerChanges};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Run options
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Compute and report, but never write
    pub dry_run: bool,
    pub batch_size: usize,
    /// Process only this learner
    pub contact_id: Option<String>,
    /// Count in-sync learners as skipped
    pub skip_synced: bool,
    /// Learners in flight within one batch
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self::from_config(&HhlConfig::default())
    }
}

impl BackfillOptions {
    pub fn from_config(config: &HhlConfig) -> Self {
        Self {
            dry_run: false,
            batch_size: config.backfill.batch_size,
            contact_id: None,
            skip_synced: false,
            concurrency: config.backfill.concurrency,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// What happened to one learner
#[derive(Debug)]
enum LearnerStatus {
    /// No progress document stored
    NoProgress,
    InSync,
    Changed(Vec<FlagChange>),
    Failed { kind: FailureKind, error: String },
}

#[derive(Debug)]
struct LearnerOutcome {
    contact_id: String,
    status: LearnerStatus,
    unknown: Vec<UnknownEntity>,
}

impl LearnerOutcome {
    fn failed(contact_id: String, kind: FailureKind, error: String) -> Self {
        Self {
            contact_id,
            status: LearnerStatus::Failed { kind, error },
            unknown: Vec::new(),
        }
    }
}

pub struct BackfillOrchestrator {
    store: Arc<dyn ProgressStore>,
    snapshot: Arc<MetadataSnapshot>,
    options: BackfillOptions,
}

impl BackfillOrchestrator {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        snapshot: Arc<MetadataSnapshot>,
        options: BackfillOptions,
    ) -> Self {
        Self {
            store,
            snapshot,
            options,
        }
    }

    pub fn options(&self) -> &BackfillOptions {
        &self.options
    }

    /// Run the backfill to completion
    ///
    /// Never returns early on a per-learner failure; failures end up in the
    /// report.
    pub async fn run(&self) -> BackfillReport {
        let mut report = BackfillReport::new(self.options.dry_run);

        info!(
            run_id = %report.summary.run_id,
            store = %self.store.describe(),
            dry_run = self.options.dry_run,
            batch_size = self.options.batch_size,
            concurrency = self.options.concurrency,
            skip_synced = self.options.skip_synced,
            "Starting completion backfill"
        );

        match &self.options.contact_id {
            Some(contact_id) => {
                info!(contact_id = %contact_id, "Single learner mode");
                report.summary.total_contacts = 1;
                let outcome = self.process_learner(contact_id.clone()).await;
                self.record(&mut report, outcome);
            }
            None => self.run_batches(&mut report).await,
        }

        report.finish();
        info!(
            run_id = %report.summary.run_id,
            processed = report.summary.processed,
            updated = report.summary.updated,
            failed = report.summary.failed,
            validation_errors = report.summary.validation_errors,
            duration_seconds = report.summary.duration_seconds,
            "Completion backfill finished"
        );
        report
    }

    async fn run_batches(&self, report: &mut BackfillReport) {
        let batch_size = self.options.batch_size.max(1);
        let concurrency = self.options.concurrency.max(1);
        let mut after: Option<String> = None;
        let mut batch_number = 0usize;

        loop {
            let page = match self.fetch_page(batch_size, after.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    error!(after = ?after, error = %e, "Failed to fetch learner page, stopping");
                    report.failures.push(BackfillFailure {
                        contact_id: None,
                        kind: FailureKind::BatchFetch,
                        error: format!("page after {:?}: {}", after, e),
                    });
                    report.summary.failed += 1;
                    break;
                }
            };

            if page.ids.is_empty() {
                break;
            }

            batch_number += 1;
            report.summary.total_contacts += page.ids.len();
            info!(batch = batch_number, learners = page.ids.len(), "Processing batch");

            let mut outcomes: Vec<(usize, LearnerOutcome)> =
                stream::iter(page.ids.into_iter().enumerate())
                    .map(|(index, contact_id)| async move {
                        (index, self.process_learner(contact_id).await)
                    })
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;

            // Report in page order regardless of completion order
            outcomes.sort_by_key(|(index, _)| *index);
            for (_, outcome) in outcomes {
                self.record(report, outcome);
            }

            match page.next_after {
                Some(next) => after = Some(next),
                None => break,
            }
        }
    }

    async fn fetch_page(
        &self,
        limit: usize,
        after: Option<&str>,
    ) -> Result<LearnerPage, StoreError> {
        retry_transient("list learners", &self.options.retry, || {
            self.store.list_learners(limit, after)
        })
        .await
    }

    /// Read, reconcile and (unless dry-run) write one learner
    async fn process_learner(&self, contact_id: String) -> LearnerOutcome {
        debug!(contact_id = %contact_id, "Processing learner");

        let read = retry_transient("read progress", &self.options.retry, || {
            self.store.read_progress(&contact_id)
        })
        .await;
        let raw = match read {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(contact_id = %contact_id, "No progress state, skipping");
                return LearnerOutcome {
                    contact_id,
                    status: LearnerStatus::NoProgress,
                    unknown: Vec::new(),
                };
            }
            Err(e) => {
                error!(contact_id = %contact_id, error = %e, "Failed to read progress");
                return LearnerOutcome::failed(contact_id, FailureKind::StoreRead, e.to_string());
            }
        };

        let mut state = match ProgressState::from_json(&raw) {
            Ok(state) => state,
            Err(e) => {
                error!(contact_id = %contact_id, error = %e, "Invalid JSON in progress state");
                return LearnerOutcome::failed(contact_id, FailureKind::InvalidJson, e.to_string());
            }
        };

        let reconciliation = reconcile_progress_state(&mut state, &self.snapshot);
        for unknown in &reconciliation.unknown {
            warn!(
                contact_id = %contact_id,
                entity_type = %unknown.entity_type,
                slug = %unknown.slug,
                "Progress references unknown entity, left untouched"
            );
        }

        if reconciliation.is_in_sync() {
            debug!(contact_id = %contact_id, "Learner already in sync");
            return LearnerOutcome {
                contact_id,
                status: LearnerStatus::InSync,
                unknown: reconciliation.unknown,
            };
        }

        info!(
            contact_id = %contact_id,
            changes = reconciliation.changes.len(),
            courses = reconciliation.courses_changed(),
            pathways = reconciliation.pathways_changed(),
            "Completion flags out of sync"
        );

        if self.options.dry_run {
            debug!(contact_id = %contact_id, "Dry run, changes not persisted");
        } else {
            let written = retry_transient("write progress", &self.options.retry, || {
                self.store.write_progress(&contact_id, &state)
            })
            .await;
            if let Err(e) = written {
                error!(contact_id = %contact_id, error = %e, "Failed to write progress");
                return LearnerOutcome {
                    contact_id,
                    status: LearnerStatus::Failed {
                        kind: FailureKind::StoreWrite,
                        error: e.to_string(),
                    },
                    unknown: reconciliation.unknown,
                };
            }
        }

        LearnerOutcome {
            contact_id,
            status: LearnerStatus::Changed(reconciliation.changes),
            unknown: reconciliation.unknown,
        }
    }

    fn record(&self, report: &mut BackfillReport, outcome: LearnerOutcome) {
        let summary = &mut report.summary;
        let LearnerOutcome {
            contact_id,
            status,
            unknown,
        } = outcome;

        for entity in unknown {
            summary.validation_errors += 1;
            report.failures.push(BackfillFailure {
                contact_id: Some(contact_id.clone()),
                kind: FailureKind::UnknownEntity,
                error: format!("unknown {}: {}", entity.entity_type, entity.slug),
            });
        }

        match status {
            LearnerStatus::NoProgress => summary.processed += 1,
            LearnerStatus::InSync => {
                summary.processed += 1;
                if self.options.skip_synced {
                    summary.skipped_synced += 1;
                }
            }
            LearnerStatus::Changed(changes) => {
                summary.processed += 1;
                summary.updated += 1;
                for change in &changes {
                    match change.entity_type {
                        EntityType::Course => summary.courses_updated += 1,
                        EntityType::Pathway => summary.pathways_updated += 1,
                    }
                }
                report.changes.push(LearnerChanges {
                    contact_id,
                    changes,
                });
            }
            LearnerStatus::Failed { kind, error } => {
                summary.failed += 1;
                if kind.is_validation_error() {
                    summary.validation_errors += 1;
                }
                report.failures.push(BackfillFailure {
                    contact_id: Some(contact_id),
                    kind,
                    error,
                });
            }
        }
    }
}
