//! Completion calculator
//!
//! Pure functions deciding whether a learner has completed a course or a
//! pathway from live module-level progress.
//!
//! **Rules:**
//! - A module is satisfied only by status `Completed`; `Started` never counts
//! - Optional items never affect the verdict
//! - Zero required items means complete (vacuous truth)
//! - Pathway courses are evaluated recursively from module progress, never
//!   from a stored "course complete" flag
//! - `missing_required` follows the definition's canonical order

use crate::metadata::{CourseMetadata, PathwayMetadata};
use crate::progress::{ModuleProgress, ModuleStatus, PathwayProgress};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Outcome of one completion calculation
///
/// Recomputed on every call; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionResult {
    pub is_complete: bool,
    pub completed_required_count: usize,
    pub total_required_count: usize,
    /// Outstanding required slugs in canonical order
    pub missing_required: Vec<String>,
}

impl CompletionResult {
    /// `(completed, total)` pair for progress displays
    pub fn progress(&self) -> (usize, usize) {
        (self.completed_required_count, self.total_required_count)
    }
}

/// Course lookup used to resolve pathway references
pub trait CourseCatalog {
    fn find_course(&self, slug: &str) -> Option<&CourseMetadata>;
}

impl CourseCatalog for BTreeMap<String, CourseMetadata> {
    fn find_course(&self, slug: &str) -> Option<&CourseMetadata> {
        self.get(slug)
    }
}

impl CourseCatalog for HashMap<String, CourseMetadata> {
    fn find_course(&self, slug: &str) -> Option<&CourseMetadata> {
        self.get(slug)
    }
}

impl CourseCatalog for [CourseMetadata] {
    fn find_course(&self, slug: &str) -> Option<&CourseMetadata> {
        self.iter().find(|c| c.slug() == slug)
    }
}

/// Calculate course completion from module progress
pub fn calculate_course_completion(
    course: &CourseMetadata,
    progress: &ModuleProgress,
) -> CompletionResult {
    let mut total = 0;
    let mut missing = Vec::new();

    for module in course.required_modules() {
        total += 1;
        if progress.status(&module.slug) != ModuleStatus::Completed {
            missing.push(module.slug.clone());
        }
    }

    CompletionResult {
        is_complete: missing.is_empty(),
        completed_required_count: total - missing.len(),
        total_required_count: total,
        missing_required: missing,
    }
}

/// Calculate pathway completion by recursively evaluating each required
/// course against its module progress
///
/// Fails closed: any course reference that does not resolve in `catalog`
/// (required or optional) makes the pathway incomplete. Unresolved required
/// courses are also reported in `missing_required`.
pub fn calculate_pathway_completion<C>(
    pathway: &PathwayMetadata,
    catalog: &C,
    progress: &PathwayProgress,
) -> CompletionResult
where
    C: CourseCatalog + ?Sized,
{
    let empty = ModuleProgress::new();
    let mut malformed = false;
    let mut total = 0;
    let mut missing = Vec::new();

    for course_ref in pathway.courses() {
        let course = catalog.find_course(&course_ref.slug);
        if course.is_none() {
            warn!(
                pathway = %pathway.slug(),
                course = %course_ref.slug,
                "Pathway references unresolved course; treating pathway as incomplete"
            );
            malformed = true;
        }
        if !course_ref.required {
            continue;
        }

        total += 1;
        let satisfied = course
            .map(|c| {
                let module_progress = progress.get(&course_ref.slug).unwrap_or(&empty);
                calculate_course_completion(c, module_progress).is_complete
            })
            .unwrap_or(false);
        if !satisfied {
            missing.push(course_ref.slug.clone());
        }
    }

    CompletionResult {
        is_complete: !malformed && missing.is_empty(),
        completed_required_count: total - missing.len(),
        total_required_count: total,
        missing_required: missing,
    }
}

/// Latest completion timestamp among the course's required modules
///
/// Optional modules never move the inferred time. `None` when the course is
/// not complete, has no required modules, or no required module carries a
/// timestamp.
pub fn inferred_course_completion_time(
    course: &CourseMetadata,
    progress: &ModuleProgress,
) -> Option<DateTime<Utc>> {
    if !calculate_course_completion(course, progress).is_complete {
        return None;
    }
    course
        .required_modules()
        .filter_map(|m| progress.record(&m.slug))
        .filter(|r| r.status == ModuleStatus::Completed)
        .filter_map(|r| r.timestamp)
        .max()
}

/// Latest inferred completion timestamp among the pathway's required courses
pub fn inferred_pathway_completion_time<C>(
    pathway: &PathwayMetadata,
    catalog: &C,
    progress: &PathwayProgress,
) -> Option<DateTime<Utc>>
where
    C: CourseCatalog + ?Sized,
{
    if !calculate_pathway_completion(pathway, catalog, progress).is_complete {
        return None;
    }
    let empty = ModuleProgress::new();
    pathway
        .required_courses()
        .filter_map(|course_ref| {
            let course = catalog.find_course(&course_ref.slug)?;
            let module_progress = progress.get(&course_ref.slug).unwrap_or(&empty);
            inferred_course_completion_time(course, module_progress)
        })
        .max()
}
