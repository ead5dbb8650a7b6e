//! Learner progress model
//!
//! The progress store owns a per-learner JSON document (`ProgressState`).
//! The engine only reads snapshots of it and writes recomputed completion
//! flags back. `ProgressRecord` is the flattened per-module view the
//! calculator works on.

use crate::time::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Per-module status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    NotStarted,
    Started,
    Completed,
}

/// Status of one module for one learner at its last change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub module_slug: String,
    pub status: ModuleStatus,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn new(
        module_slug: impl Into<String>,
        status: ModuleStatus,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            module_slug: module_slug.into(),
            status,
            timestamp,
        }
    }

    pub fn completed(module_slug: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(module_slug, ModuleStatus::Completed, Some(at))
    }

    pub fn started(module_slug: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(module_slug, ModuleStatus::Started, Some(at))
    }
}

/// Progress records for one course, indexed by module slug
///
/// When several records name the same module, the latest timestamp wins;
/// equal timestamps resolve to the record that came later in the input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleProgress {
    records: BTreeMap<String, ProgressRecord>,
}

impl ModuleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ProgressRecord>,
    {
        let mut progress = Self::new();
        for record in records {
            progress.insert(record);
        }
        progress
    }

    pub fn insert(&mut self, record: ProgressRecord) {
        match self.records.get(&record.module_slug) {
            Some(existing) if existing.timestamp > record.timestamp => {}
            _ => {
                self.records.insert(record.module_slug.clone(), record);
            }
        }
    }

    /// Fold a stored module map into this progress
    ///
    /// Entries with neither `started` nor `completed` set carry no record.
    pub fn merge_states(&mut self, modules: Option<&BTreeMap<String, ModuleProgressState>>) {
        for (slug, state) in modules.into_iter().flatten() {
            let record = state.to_record(slug);
            if record.status != ModuleStatus::NotStarted {
                self.insert(record);
            }
        }
    }

    pub fn record(&self, module_slug: &str) -> Option<&ProgressRecord> {
        self.records.get(module_slug)
    }

    /// Status for a module; absent modules are `NotStarted`
    pub fn status(&self, module_slug: &str) -> ModuleStatus {
        self.records
            .get(module_slug)
            .map(|r| r.status)
            .unwrap_or(ModuleStatus::NotStarted)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl FromIterator<ProgressRecord> for ModuleProgress {
    fn from_iter<T: IntoIterator<Item = ProgressRecord>>(iter: T) -> Self {
        Self::from_records(iter)
    }
}

/// Module progress for each course of a pathway, keyed by course slug
pub type PathwayProgress = BTreeMap<String, ModuleProgress>;

// ============================================================================
// Stored progress document
// ============================================================================

/// Module entry in the stored progress document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleProgressState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModuleProgressState {
    pub fn to_record(&self, module_slug: &str) -> ProgressRecord {
        if self.completed == Some(true) {
            ProgressRecord::new(
                module_slug,
                ModuleStatus::Completed,
                self.completed_at.as_deref().and_then(parse_timestamp),
            )
        } else if self.started == Some(true) {
            ProgressRecord::new(
                module_slug,
                ModuleStatus::Started,
                self.started_at.as_deref().and_then(parse_timestamp),
            )
        } else {
            ProgressRecord::new(module_slug, ModuleStatus::NotStarted, None)
        }
    }
}

/// Course entry in the stored progress document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseProgressState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<BTreeMap<String, ModuleProgressState>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CourseProgressState {
    pub fn is_flagged_complete(&self) -> bool {
        self.completed == Some(true)
    }
}

/// Pathway entry in the stored progress document
///
/// Hierarchical pathways carry `courses`; legacy pathways carry module
/// progress directly under `modules`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathwayProgressState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrolled_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courses: Option<BTreeMap<String, CourseProgressState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<BTreeMap<String, ModuleProgressState>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PathwayProgressState {
    fn course(&self, course_slug: &str) -> Option<&CourseProgressState> {
        self.courses.as_ref().and_then(|c| c.get(course_slug))
    }

    pub fn is_flagged_complete(&self) -> bool {
        self.completed == Some(true)
    }
}

/// Whole progress document for one learner
///
/// Standalone courses live under `courses`; every other top-level key is a
/// pathway slug.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub courses: BTreeMap<String, CourseProgressState>,
    #[serde(flatten)]
    pub pathways: BTreeMap<String, PathwayProgressState>,
}

impl ProgressState {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Module progress for a course, merged from the standalone entry and
    /// every pathway that nests the course
    ///
    /// Progress is keyed by module, so the same module recorded in several
    /// places resolves to its latest record.
    pub fn course_module_progress(&self, course_slug: &str) -> ModuleProgress {
        let mut progress = ModuleProgress::new();
        if let Some(course) = self.courses.get(course_slug) {
            progress.merge_states(course.modules.as_ref());
        }
        for pathway in self.pathways.values() {
            if let Some(course) = pathway.course(course_slug) {
                progress.merge_states(course.modules.as_ref());
            }
        }
        progress
    }

    /// Module progress for a course as part of one pathway: every context
    /// the course appears in plus the pathway's legacy flat module map
    pub fn course_progress_in_pathway(
        &self,
        pathway_slug: &str,
        course_slug: &str,
    ) -> ModuleProgress {
        let mut progress = self.course_module_progress(course_slug);
        if let Some(pathway) = self.pathways.get(pathway_slug) {
            progress.merge_states(pathway.modules.as_ref());
        }
        progress
    }

    /// Module progress for every course slug of a pathway
    pub fn pathway_progress<'a, I>(&self, pathway_slug: &str, course_slugs: I) -> PathwayProgress
    where
        I: IntoIterator<Item = &'a str>,
    {
        course_slugs
            .into_iter()
            .map(|course_slug| {
                (
                    course_slug.to_string(),
                    self.course_progress_in_pathway(pathway_slug, course_slug),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 19, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_latest_record_wins() {
        let progress = ModuleProgress::from_records(vec![
            ProgressRecord::completed("a", at(10)),
            ProgressRecord::started("a", at(12)),
        ]);
        assert_eq!(progress.status("a"), ModuleStatus::Started);
    }

    #[test]
    fn test_older_record_does_not_override() {
        let progress = ModuleProgress::from_records(vec![
            ProgressRecord::completed("a", at(12)),
            ProgressRecord::started("a", at(10)),
        ]);
        assert_eq!(progress.status("a"), ModuleStatus::Completed);
    }

    #[test]
    fn test_equal_timestamps_later_input_wins() {
        let progress = ModuleProgress::from_records(vec![
            ProgressRecord::started("a", at(10)),
            ProgressRecord::completed("a", at(10)),
        ]);
        assert_eq!(progress.status("a"), ModuleStatus::Completed);
    }

    #[test]
    fn test_missing_module_is_not_started() {
        assert_eq!(ModuleProgress::new().status("x"), ModuleStatus::NotStarted);
    }

    #[test]
    fn test_module_state_to_record() {
        let state = ModuleProgressState {
            started: Some(true),
            started_at: Some("2025-10-19T10:00:00Z".to_string()),
            completed: Some(true),
            completed_at: Some("2025-10-19T10:30:00Z".to_string()),
            ..Default::default()
        };
        let record = state.to_record("m1");
        assert_eq!(record.status, ModuleStatus::Completed);
        assert_eq!(
            record.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 10, 19, 10, 30, 0).unwrap())
        );

        let started_only = ModuleProgressState {
            started: Some(true),
            ..Default::default()
        };
        assert_eq!(started_only.to_record("m1").status, ModuleStatus::Started);
    }

    #[test]
    fn test_progress_state_parses_hierarchical_and_flat() {
        let raw = r#"{
            "courses": {
                "solo": {"modules": {"m1": {"completed": true}}}
            },
            "p1": {
                "enrolled": true,
                "courses": {
                    "c1": {"completed": true, "modules": {"a": {"started": true}}}
                }
            },
            "legacy": {
                "modules": {"x": {"completed": true}}
            }
        }"#;
        let state = ProgressState::from_json(raw).unwrap();
        assert_eq!(state.courses.len(), 1);
        assert_eq!(state.pathways.len(), 2);
        assert!(state.pathways["p1"].courses.as_ref().unwrap()["c1"].is_flagged_complete());

        let legacy = state.pathway_progress("legacy", ["any-course"]);
        assert_eq!(legacy["any-course"].status("x"), ModuleStatus::Completed);

        assert_eq!(
            state.course_module_progress("c1").status("a"),
            ModuleStatus::Started
        );
    }

    #[test]
    fn test_enrollment_only_entry_does_not_hide_nested_progress() {
        let state = ProgressState::from_json(
            r#"{
                "courses": {"c1": {"enrolled": true}},
                "p1": {"courses": {"c1": {"modules": {
                    "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
                    "b": {"completed": true, "completed_at": "2025-10-19T11:00:00Z"}
                }}}}
            }"#,
        )
        .unwrap();

        let progress = state.course_module_progress("c1");
        assert_eq!(progress.status("a"), ModuleStatus::Completed);
        assert_eq!(progress.status("b"), ModuleStatus::Completed);
    }

    #[test]
    fn test_contexts_merge_with_latest_record_winning() {
        let state = ProgressState::from_json(
            r#"{
                "courses": {"c1": {"modules": {
                    "a": {"started": true, "started_at": "2025-10-19T09:00:00Z"},
                    "b": {"completed": true, "completed_at": "2025-10-19T12:00:00Z"}
                }}},
                "p1": {"courses": {"c1": {"modules": {
                    "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
                    "b": {"started": true, "started_at": "2025-10-19T08:00:00Z"}
                }}}}
            }"#,
        )
        .unwrap();

        let progress = state.course_module_progress("c1");
        assert_eq!(progress.status("a"), ModuleStatus::Completed);
        assert_eq!(progress.status("b"), ModuleStatus::Completed);
        assert_eq!(progress.record("a").unwrap().timestamp, Some(at(10)));
    }

    #[test]
    fn test_pathway_course_sees_standalone_progress() {
        let state = ProgressState::from_json(
            r#"{
                "courses": {"c1": {"modules": {"a": {"completed": true}}}},
                "p1": {"enrolled": true}
            }"#,
        )
        .unwrap();

        let progress = state.pathway_progress("p1", ["c1"]);
        assert_eq!(progress["c1"].status("a"), ModuleStatus::Completed);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = r#"{"p1":{"courses":{"c1":{"modules":{},"last_viewed":"intro"}},"custom":7}}"#;
        let state = ProgressState::from_json(raw).unwrap();
        let back: Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
        assert_eq!(back["p1"]["custom"], 7);
        assert_eq!(back["p1"]["courses"]["c1"]["last_viewed"], "intro");
    }
}
