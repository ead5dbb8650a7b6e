//! SQLite progress store tests

use hhl_backfill::store::{ProgressStore, SqliteProgressStore, StoreError};
use hhl_backfill::{BackfillOptions, BackfillOrchestrator};
use hhl_common::completion::MetadataSnapshot;
use hhl_common::metadata::{CourseMetadata, ModuleRef};
use hhl_common::progress::ProgressState;
use std::sync::Arc;

const COMPLETE_UNFLAGGED: &str = r#"{"courses": {"c1": {"modules": {
    "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"}
}}}}"#;

#[tokio::test]
async fn test_paging_over_table() {
    let store = SqliteProgressStore::in_memory().await.unwrap();
    for id in ["a", "b", "c"] {
        store.upsert_raw(id, None).await.unwrap();
    }

    let first = store.list_learners(2, None).await.unwrap();
    assert_eq!(first.ids, vec!["a", "b"]);
    assert_eq!(first.next_after.as_deref(), Some("b"));

    let second = store.list_learners(2, first.next_after.as_deref()).await.unwrap();
    assert_eq!(second.ids, vec!["c"]);
    assert!(second.next_after.is_none());
}

#[tokio::test]
async fn test_read_write_roundtrip() {
    let store = SqliteProgressStore::in_memory().await.unwrap();
    store.upsert_raw("1001", Some(COMPLETE_UNFLAGGED)).await.unwrap();

    let raw = store.read_progress("1001").await.unwrap().unwrap();
    let mut state = ProgressState::from_json(&raw).unwrap();
    state.courses.get_mut("c1").unwrap().completed = Some(true);
    store.write_progress("1001", &state).await.unwrap();

    let stored = store.read_progress("1001").await.unwrap().unwrap();
    assert_eq!(ProgressState::from_json(&stored).unwrap(), state);
}

#[tokio::test]
async fn test_null_and_blank_progress_read_as_none() {
    let store = SqliteProgressStore::in_memory().await.unwrap();
    store.upsert_raw("1", None).await.unwrap();
    store.upsert_raw("2", Some("  ")).await.unwrap();

    assert!(store.read_progress("1").await.unwrap().is_none());
    assert!(store.read_progress("2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_learner_not_found() {
    let store = SqliteProgressStore::in_memory().await.unwrap();

    assert!(matches!(store.read_progress("ghost").await, Err(StoreError::NotFound(_))));
    assert!(matches!(
        store.write_progress("ghost", &ProgressState::default()).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_backfill_against_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("progress.db");
    let store = Arc::new(SqliteProgressStore::open(&db_path).await.unwrap());
    store.upsert_raw("1001", Some(COMPLETE_UNFLAGGED)).await.unwrap();

    let course = CourseMetadata::new("c1", vec![ModuleRef::required("a", 0)]).unwrap();
    let snapshot = Arc::new(MetadataSnapshot::new(vec![course], vec![]).unwrap());

    let report = BackfillOrchestrator::new(store.clone(), snapshot, BackfillOptions::default())
        .run()
        .await;

    assert_eq!(report.summary.updated, 1);
    let raw = store.read_progress("1001").await.unwrap().unwrap();
    let state = ProgressState::from_json(&raw).unwrap();
    assert_eq!(state.courses["c1"].completed, Some(true));
    assert_eq!(
        state.courses["c1"].completed_at.as_deref(),
        Some("2025-10-19T10:00:00.000Z")
    );
}
