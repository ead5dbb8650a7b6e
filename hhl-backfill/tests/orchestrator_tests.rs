//! Backfill orchestrator tests against the in-memory store

use hhl_backfill::store::MemoryProgressStore;
use hhl_backfill::{BackfillOptions, BackfillOrchestrator, FailureKind, RetryPolicy};
use hhl_common::completion::MetadataSnapshot;
use hhl_common::metadata::{CourseMetadata, CourseRef, ModuleRef, PathwayMetadata};
use hhl_common::progress::ProgressState;
use std::sync::Arc;
use std::time::Duration;

/// c1 complete, flag missing
const NEEDS_COURSE_FLAG: &str = r#"{"courses": {"c1": {"modules": {
    "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
    "b": {"completed": true, "completed_at": "2025-10-19T11:00:00Z"}
}}}}"#;

/// c1 incomplete, flag already false
const IN_SYNC: &str = r#"{"courses": {"c1": {"completed": false, "modules": {
    "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"}
}}}}"#;

/// p1 and its nested c1 both complete, neither flagged
const NEEDS_PATHWAY_FLAGS: &str = r#"{"p1": {"courses": {"c1": {"modules": {
    "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
    "b": {"completed": true, "completed_at": "2025-10-19T11:00:00Z"}
}}}}}"#;

fn snapshot() -> Arc<MetadataSnapshot> {
    let c1 = CourseMetadata::new(
        "c1",
        vec![
            ModuleRef::required("a", 0),
            ModuleRef::required("b", 1),
            ModuleRef::optional("c", 2),
        ],
    )
    .unwrap();
    let c2 = CourseMetadata::new("c2", vec![]).unwrap();
    let p1 = PathwayMetadata::new(
        "p1",
        vec![CourseRef::required("c1", 0), CourseRef::required("c2", 1)],
    )
    .unwrap();
    Arc::new(MetadataSnapshot::new(vec![c1, c2], vec![p1]).unwrap())
}

fn options() -> BackfillOptions {
    BackfillOptions {
        dry_run: false,
        batch_size: 2,
        contact_id: None,
        skip_synced: false,
        concurrency: 2,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            attempt_timeout: Duration::from_secs(5),
        },
    }
}

fn flagged_complete(store: &MemoryProgressStore, id: &str) -> bool {
    let raw = store.raw_progress(id).unwrap();
    ProgressState::from_json(&raw).unwrap().courses["c1"].completed == Some(true)
}

#[tokio::test]
async fn test_live_run_writes_only_deltas() {
    let store = Arc::new(
        MemoryProgressStore::new()
            .with_learner("1", Some(NEEDS_COURSE_FLAG))
            .with_learner("2", Some(IN_SYNC))
            .with_learner("3", None)
            .with_learner("4", Some(NEEDS_PATHWAY_FLAGS))
            .with_learner("5", Some(IN_SYNC)),
    );

    let report = BackfillOrchestrator::new(store.clone(), snapshot(), options())
        .run()
        .await;

    let s = &report.summary;
    assert_eq!(s.total_contacts, 5);
    assert_eq!(s.processed, 5);
    assert_eq!(s.updated, 2);
    assert_eq!(s.failed, 0);
    assert_eq!(s.courses_updated, 2);
    assert_eq!(s.pathways_updated, 1);
    assert!(!report.has_errors());

    let mut writes = store.writes();
    writes.sort();
    assert_eq!(writes, vec!["1", "4"]);
    assert!(flagged_complete(&store, "1"));

    let changed: Vec<&str> = report.changes.iter().map(|c| c.contact_id.as_str()).collect();
    assert_eq!(changed, vec!["1", "4"]);
    let slugs: Vec<&str> = report.changes[1].changes.iter().map(|c| c.slug.as_str()).collect();
    assert_eq!(slugs, vec!["p1/c1", "p1"]);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let store = Arc::new(MemoryProgressStore::new().with_learner("1", Some(NEEDS_COURSE_FLAG)));
    let mut options = options();
    options.dry_run = true;

    let report = BackfillOrchestrator::new(store.clone(), snapshot(), options)
        .run()
        .await;

    assert!(report.summary.dry_run);
    assert_eq!(report.summary.updated, 1);
    assert_eq!(report.changes.len(), 1);
    assert!(store.writes().is_empty());
    assert_eq!(store.raw_progress("1").as_deref(), Some(NEEDS_COURSE_FLAG));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let store = Arc::new(MemoryProgressStore::new().with_learner("1", Some(NEEDS_COURSE_FLAG)));
    let mut options = options();
    options.skip_synced = true;

    let first = BackfillOrchestrator::new(store.clone(), snapshot(), options.clone())
        .run()
        .await;
    let second = BackfillOrchestrator::new(store.clone(), snapshot(), options)
        .run()
        .await;

    assert_eq!(first.summary.updated, 1);
    assert_eq!(second.summary.updated, 0);
    assert_eq!(second.summary.skipped_synced, 1);
    assert_eq!(store.writes().len(), 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let store = Arc::new(MemoryProgressStore::new().with_learner("1", Some(NEEDS_COURSE_FLAG)));
    store.fail_reads("1", 2);
    store.fail_writes("1", 2);
    store.fail_pages(1);

    let report = BackfillOrchestrator::new(store.clone(), snapshot(), options())
        .run()
        .await;

    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.updated, 1);
    assert!(flagged_complete(&store, "1"));
}

#[tokio::test]
async fn test_persistent_failure_does_not_stop_batch() {
    let store = Arc::new(
        MemoryProgressStore::new()
            .with_learner("1", Some(NEEDS_COURSE_FLAG))
            .with_learner("2", Some(NEEDS_COURSE_FLAG))
            .with_learner("3", Some(NEEDS_COURSE_FLAG)),
    );
    store.fail_reads("1", 10);
    store.reject_writes("2");

    let report = BackfillOrchestrator::new(store.clone(), snapshot(), options())
        .run()
        .await;

    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.updated, 1);
    assert!(report.has_errors());
    assert!(flagged_complete(&store, "3"));

    let kinds: Vec<(Option<&str>, FailureKind)> = report
        .failures
        .iter()
        .map(|f| (f.contact_id.as_deref(), f.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (Some("1"), FailureKind::StoreRead),
            (Some("2"), FailureKind::StoreWrite)
        ]
    );
}

#[tokio::test]
async fn test_invalid_json_is_a_validation_error() {
    let store = Arc::new(
        MemoryProgressStore::new()
            .with_learner("1", Some("{not json"))
            .with_learner("2", Some(NEEDS_COURSE_FLAG)),
    );

    let report = BackfillOrchestrator::new(store.clone(), snapshot(), options())
        .run()
        .await;

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.validation_errors, 1);
    assert_eq!(report.summary.updated, 1);
    assert_eq!(report.failures[0].kind, FailureKind::InvalidJson);
    assert_eq!(store.raw_progress("1").as_deref(), Some("{not json"));
}

#[tokio::test]
async fn test_unknown_entities_reported_but_known_flags_fixed() {
    let raw = r#"{"courses": {
        "retired": {"completed": true},
        "c1": {"modules": {
            "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
            "b": {"completed": true, "completed_at": "2025-10-19T11:00:00Z"}
        }}
    }}"#;
    let store = Arc::new(MemoryProgressStore::new().with_learner("1", Some(raw)));

    let report = BackfillOrchestrator::new(store.clone(), snapshot(), options())
        .run()
        .await;

    assert_eq!(report.summary.validation_errors, 1);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.updated, 1);
    assert_eq!(report.failures[0].kind, FailureKind::UnknownEntity);
    assert!(report.failures[0].error.contains("retired"));

    let stored = ProgressState::from_json(&store.raw_progress("1").unwrap()).unwrap();
    assert_eq!(stored.courses["retired"].completed, Some(true));
    assert_eq!(stored.courses["c1"].completed, Some(true));
}

#[tokio::test]
async fn test_single_contact_mode() {
    let store = Arc::new(
        MemoryProgressStore::new()
            .with_learner("1", Some(NEEDS_COURSE_FLAG))
            .with_learner("2", Some(NEEDS_COURSE_FLAG)),
    );
    let mut options = options();
    options.contact_id = Some("2".to_string());

    let report = BackfillOrchestrator::new(store.clone(), snapshot(), options)
        .run()
        .await;

    assert_eq!(report.summary.total_contacts, 1);
    assert_eq!(store.writes(), vec!["2"]);
}

#[tokio::test]
async fn test_single_contact_not_found_is_failure() {
    let store = Arc::new(MemoryProgressStore::new());
    let mut options = options();
    options.contact_id = Some("missing".to_string());

    let report = BackfillOrchestrator::new(store, snapshot(), options).run().await;

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.failures[0].kind, FailureKind::StoreRead);
}

#[tokio::test]
async fn test_unreachable_store_records_batch_fetch_failure() {
    let store = Arc::new(MemoryProgressStore::new().with_learner("1", Some(IN_SYNC)));
    store.fail_pages(10);

    let report = BackfillOrchestrator::new(store, snapshot(), options()).run().await;

    assert_eq!(report.summary.total_contacts, 0);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.failures[0].kind, FailureKind::BatchFetch);
    assert!(report.failures[0].contact_id.is_none());
}
