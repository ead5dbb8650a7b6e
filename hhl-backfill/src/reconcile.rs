//! Stored completion flag reconciliation
//!
//! Recomputes every course and pathway a learner's progress document
//! mentions and corrects the stored `completed` flags to match.
//!
//! **Rules:**
//! - Completion is always derived from module-level progress, never from
//!   another stored flag
//! - A flag flipping to complete gets `completed_at` set to the latest
//!   completion among the satisfied children; flipping to incomplete clears it
//! - Slugs missing from the metadata are reported and left untouched

use chrono::{DateTime, Utc};
use hhl_common::completion::{
    calculate_course_completion, calculate_pathway_completion, inferred_course_completion_time,
    inferred_pathway_completion_time, CompletionResult, EntityType, MetadataSnapshot,
};
use hhl_common::progress::ProgressState;
use hhl_common::time::format_timestamp;
use serde::{Deserialize, Serialize};

/// Required children completed vs. total at reconciliation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeProgress {
    pub completed: usize,
    pub total: usize,
}

/// One corrected flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagChange {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Course slugs nested in a pathway render as `pathway/course`
    pub slug: String,
    pub before: bool,
    pub after: bool,
    pub progress: ChangeProgress,
}

/// Slug in a progress document with no metadata behind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownEntity {
    pub entity_type: EntityType,
    pub slug: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub changes: Vec<FlagChange>,
    pub unknown: Vec<UnknownEntity>,
}

impl Reconciliation {
    pub fn is_in_sync(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn courses_changed(&self) -> usize {
        self.count(EntityType::Course)
    }

    pub fn pathways_changed(&self) -> usize {
        self.count(EntityType::Pathway)
    }

    fn count(&self, entity_type: EntityType) -> usize {
        self.changes
            .iter()
            .filter(|c| c.entity_type == entity_type)
            .count()
    }
}

/// Correct every stored completion flag in `state` in place
pub fn reconcile_progress_state(
    state: &mut ProgressState,
    snapshot: &MetadataSnapshot,
) -> Reconciliation {
    let mut outcome = Reconciliation::default();

    let pathway_slugs: Vec<String> = state.pathways.keys().cloned().collect();
    for pathway_slug in pathway_slugs {
        reconcile_pathway(state, snapshot, &pathway_slug, &mut outcome);
    }

    let course_slugs: Vec<String> = state.courses.keys().cloned().collect();
    for course_slug in course_slugs {
        let Some(course) = snapshot.course(&course_slug) else {
            outcome.unknown.push(UnknownEntity {
                entity_type: EntityType::Course,
                slug: course_slug,
            });
            continue;
        };
        let progress = state.course_module_progress(&course_slug);
        let result = calculate_course_completion(course, &progress);
        let inferred = inferred_course_completion_time(course, &progress);
        let Some(course_state) = state.courses.get_mut(&course_slug) else {
            continue;
        };
        if let Some(before) = apply_flag(
            &mut course_state.completed,
            &mut course_state.completed_at,
            &result,
            inferred,
        ) {
            outcome
                .changes
                .push(change(EntityType::Course, course_slug, before, &result));
        }
    }

    outcome
}

fn reconcile_pathway(
    state: &mut ProgressState,
    snapshot: &MetadataSnapshot,
    pathway_slug: &str,
    outcome: &mut Reconciliation,
) {
    let Some(pathway) = snapshot.pathway(pathway_slug) else {
        outcome.unknown.push(UnknownEntity {
            entity_type: EntityType::Pathway,
            slug: pathway_slug.to_string(),
        });
        return;
    };

    // Pathway verdict comes from module progress, before any flag moves
    let pathway_progress = state.pathway_progress(
        pathway_slug,
        pathway.courses().iter().map(|c| c.slug.as_str()),
    );
    let pathway_result = calculate_pathway_completion(pathway, snapshot, &pathway_progress);
    let pathway_inferred = inferred_pathway_completion_time(pathway, snapshot, &pathway_progress);

    let nested_slugs: Vec<String> = state
        .pathways
        .get(pathway_slug)
        .and_then(|p| p.courses.as_ref())
        .map(|courses| courses.keys().cloned().collect())
        .unwrap_or_default();

    for course_slug in nested_slugs {
        let nested_slug = format!("{}/{}", pathway_slug, course_slug);
        let Some(course) = snapshot.course(&course_slug) else {
            outcome.unknown.push(UnknownEntity {
                entity_type: EntityType::Course,
                slug: nested_slug,
            });
            continue;
        };
        let progress = state.course_progress_in_pathway(pathway_slug, &course_slug);
        let result = calculate_course_completion(course, &progress);
        let inferred = inferred_course_completion_time(course, &progress);
        let Some(course_state) = state
            .pathways
            .get_mut(pathway_slug)
            .and_then(|p| p.courses.as_mut())
            .and_then(|courses| courses.get_mut(&course_slug))
        else {
            continue;
        };
        if let Some(before) = apply_flag(
            &mut course_state.completed,
            &mut course_state.completed_at,
            &result,
            inferred,
        ) {
            outcome
                .changes
                .push(change(EntityType::Course, nested_slug, before, &result));
        }
    }

    let Some(pathway_state) = state.pathways.get_mut(pathway_slug) else {
        return;
    };

    if let Some(before) = apply_flag(
        &mut pathway_state.completed,
        &mut pathway_state.completed_at,
        &pathway_result,
        pathway_inferred,
    ) {
        outcome.changes.push(change(
            EntityType::Pathway,
            pathway_slug.to_string(),
            before,
            &pathway_result,
        ));
    }
}

/// Move a stored flag to the computed verdict; returns the old value when it
/// changed
fn apply_flag(
    completed: &mut Option<bool>,
    completed_at: &mut Option<String>,
    result: &CompletionResult,
    inferred: Option<DateTime<Utc>>,
) -> Option<bool> {
    let before = *completed == Some(true);
    if before == result.is_complete {
        return None;
    }

    *completed = Some(result.is_complete);
    if result.is_complete {
        if let Some(at) = inferred {
            *completed_at = Some(format_timestamp(&at));
        }
    } else {
        *completed_at = None;
    }
    Some(before)
}

fn change(entity_type: EntityType, slug: String, before: bool, result: &CompletionResult) -> FlagChange {
    FlagChange {
        entity_type,
        slug,
        before,
        after: result.is_complete,
        progress: ChangeProgress {
            completed: result.completed_required_count,
            total: result.total_required_count,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hhl_common::metadata::{CourseMetadata, CourseRef, ModuleRef, PathwayMetadata};

    fn snapshot() -> MetadataSnapshot {
        let c1 = CourseMetadata::new(
            "c1",
            vec![
                ModuleRef::required("a", 0),
                ModuleRef::required("b", 1),
                ModuleRef::optional("c", 2),
            ],
        )
        .unwrap();
        let c2 = CourseMetadata::new("c2", vec![ModuleRef::optional("x", 0)]).unwrap();
        let p1 = PathwayMetadata::new(
            "p1",
            vec![CourseRef::required("c1", 0), CourseRef::required("c2", 1)],
        )
        .unwrap();
        MetadataSnapshot::new(vec![c1, c2], vec![p1]).unwrap()
    }

    fn state(raw: &str) -> ProgressState {
        ProgressState::from_json(raw).unwrap()
    }

    #[test]
    fn test_standalone_course_flipped_complete_with_inferred_time() {
        let mut progress = state(
            r#"{"courses": {"c1": {"modules": {
                "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
                "b": {"completed": true, "completed_at": "2025-10-19T11:30:00Z"}
            }}}}"#,
        );

        let outcome = reconcile_progress_state(&mut progress, &snapshot());

        assert_eq!(outcome.courses_changed(), 1);
        let change = &outcome.changes[0];
        assert_eq!(change.slug, "c1");
        assert!(!change.before && change.after);
        assert_eq!(change.progress, ChangeProgress { completed: 2, total: 2 });

        let course = &progress.courses["c1"];
        assert_eq!(course.completed, Some(true));
        assert_eq!(course.completed_at.as_deref(), Some("2025-10-19T11:30:00.000Z"));
    }

    #[test]
    fn test_false_positive_flag_cleared() {
        let mut progress = state(
            r#"{"courses": {"c1": {
                "completed": true,
                "completed_at": "2025-10-19T12:00:00Z",
                "modules": {
                    "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
                    "b": {"started": true, "started_at": "2025-10-19T11:00:00Z"}
                }
            }}}"#,
        );

        let outcome = reconcile_progress_state(&mut progress, &snapshot());

        assert_eq!(outcome.changes.len(), 1);
        assert!(outcome.changes[0].before && !outcome.changes[0].after);
        let course = &progress.courses["c1"];
        assert_eq!(course.completed, Some(false));
        assert!(course.completed_at.is_none());
    }

    #[test]
    fn test_nested_course_and_pathway_reconciled_together() {
        let mut progress = state(
            r#"{"p1": {"enrolled": true, "courses": {"c1": {"modules": {
                "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
                "b": {"completed": true, "completed_at": "2025-10-19T11:00:00Z"}
            }}}}}"#,
        );

        let outcome = reconcile_progress_state(&mut progress, &snapshot());

        let slugs: Vec<&str> = outcome.changes.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["p1/c1", "p1"]);
        assert_eq!(outcome.pathways_changed(), 1);

        let pathway = &progress.pathways["p1"];
        assert_eq!(pathway.completed, Some(true));
        assert_eq!(pathway.enrolled, Some(true));
        assert_eq!(pathway.completed_at.as_deref(), Some("2025-10-19T11:00:00.000Z"));
    }

    #[test]
    fn test_optional_module_finished_later_keeps_completed_at() {
        let mut progress = state(
            r#"{"courses": {"c1": {"modules": {
                "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
                "b": {"completed": true, "completed_at": "2025-10-19T11:00:00Z"},
                "c": {"completed": true, "completed_at": "2025-10-19T18:00:00Z"}
            }}}}"#,
        );

        reconcile_progress_state(&mut progress, &snapshot());

        assert_eq!(
            progress.courses["c1"].completed_at.as_deref(),
            Some("2025-10-19T11:00:00.000Z")
        );
    }

    #[test]
    fn test_standalone_flag_uses_progress_recorded_under_pathway() {
        let mut progress = state(
            r#"{
                "courses": {"c1": {"enrolled": true}},
                "p1": {"courses": {"c1": {"modules": {
                    "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
                    "b": {"completed": true, "completed_at": "2025-10-19T11:00:00Z"}
                }}}}
            }"#,
        );

        let outcome = reconcile_progress_state(&mut progress, &snapshot());

        let slugs: Vec<&str> = outcome.changes.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["p1/c1", "p1", "c1"]);
        assert_eq!(progress.courses["c1"].completed, Some(true));
        assert_eq!(progress.courses["c1"].enrolled, Some(true));
    }

    #[test]
    fn test_in_sync_document_unchanged() {
        let raw = r#"{"courses": {"c1": {"completed": false, "modules": {
            "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"}
        }}}}"#;
        let mut progress = state(raw);

        let outcome = reconcile_progress_state(&mut progress, &snapshot());

        assert!(outcome.is_in_sync());
        assert_eq!(progress, state(raw));
    }

    #[test]
    fn test_unknown_slugs_reported_and_untouched() {
        let mut progress = state(
            r#"{
                "courses": {"retired-course": {"completed": true}},
                "retired-pathway": {"completed": true},
                "p1": {"courses": {"gone": {"completed": true}}}
            }"#,
        );

        let outcome = reconcile_progress_state(&mut progress, &snapshot());

        assert_eq!(progress.courses["retired-course"].completed, Some(true));
        assert_eq!(progress.pathways["retired-pathway"].completed, Some(true));

        let unknown: Vec<&str> = outcome.unknown.iter().map(|u| u.slug.as_str()).collect();
        assert!(unknown.contains(&"retired-course"));
        assert!(unknown.contains(&"retired-pathway"));
        assert!(unknown.contains(&"p1/gone"));
    }

    #[test]
    fn test_reconciliation_is_idempotent() {
        let mut progress = state(
            r#"{"courses": {"c1": {"modules": {
                "a": {"completed": true, "completed_at": "2025-10-19T10:00:00Z"},
                "b": {"completed": true, "completed_at": "2025-10-19T11:00:00Z"}
            }}}}"#,
        );
        let snapshot = snapshot();

        assert!(!reconcile_progress_state(&mut progress, &snapshot).is_in_sync());
        assert!(reconcile_progress_state(&mut progress, &snapshot).is_in_sync());
    }

    #[test]
    fn test_change_serializes_with_type_field() {
        let change = FlagChange {
            entity_type: EntityType::Course,
            slug: "p1/c1".to_string(),
            before: false,
            after: true,
            progress: ChangeProgress { completed: 2, total: 2 },
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["type"], "course");
        assert_eq!(value["progress"]["total"], 2);
    }
}
