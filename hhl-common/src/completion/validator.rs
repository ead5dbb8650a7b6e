//! Explicit completion validation
//!
//! Externally asserted completions ("the player says the course is
//! finished") are cross-checked against authoritative metadata and the
//! learner's recorded progress. Rejections are values carrying a reason code
//! so callers branch on data:
//! - `UnknownEntity`: configuration problem, not retried
//! - `StructurallyIncomplete`: normal rejection
//! - `MalformedPayload`: client error
//! - `ImplausibleTimestamp` / `TimestampMismatch`: corrupted or replayed events

use crate::completion::cache::MetadataSnapshot;
use crate::completion::calculator::{calculate_course_completion, calculate_pathway_completion};
use crate::progress::ProgressState;
use crate::time::default_platform_epoch;
use crate::Error;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Clock skew tolerated for timestamps ahead of `now`
pub const DEFAULT_SKEW_TOLERANCE_SECS: i64 = 300;

/// Allowed drift between an explicit completion time and the time inferred
/// from the latest child completion
pub const INFERRED_TOLERANCE_SECS: i64 = 300;

/// Kind of entity a claim refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Course,
    Pathway,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Course => "course",
            EntityType::Pathway => "pathway",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "course" => Some(EntityType::Course),
            "pathway" => Some(EntityType::Pathway),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion asserted by an external caller; untrusted until validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitCompletionClaim {
    pub contact_id: String,
    pub entity_type: EntityType,
    pub entity_slug: String,
    pub claimed_at: DateTime<Utc>,
}

/// Machine-readable rejection reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    UnknownEntity,
    StructurallyIncomplete,
    MalformedPayload,
    ImplausibleTimestamp,
    TimestampMismatch,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::UnknownEntity => "unknown_entity",
            ReasonCode::StructurallyIncomplete => "structurally_incomplete",
            ReasonCode::MalformedPayload => "malformed_payload",
            ReasonCode::ImplausibleTimestamp => "implausible_timestamp",
            ReasonCode::TimestampMismatch => "timestamp_mismatch",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted,
    Rejected { reason: ReasonCode, detail: String },
}

impl ValidationOutcome {
    pub fn rejected(reason: ReasonCode, detail: impl Into<String>) -> Self {
        ValidationOutcome::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }

    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            ValidationOutcome::Accepted => None,
            ValidationOutcome::Rejected { reason, .. } => Some(*reason),
        }
    }
}

/// Validate a claim against metadata and the learner's recorded progress
///
/// Does not look at the claimed timestamp; see
/// `validate_completion_timestamp`.
pub fn validate_explicit_completion(
    claim: &ExplicitCompletionClaim,
    snapshot: &MetadataSnapshot,
    progress: &ProgressState,
) -> ValidationOutcome {
    if claim.contact_id.trim().is_empty() {
        return ValidationOutcome::rejected(ReasonCode::MalformedPayload, "empty contact identifier");
    }
    if claim.entity_slug.trim().is_empty() {
        return ValidationOutcome::rejected(ReasonCode::MalformedPayload, "empty entity slug");
    }

    let result = match claim.entity_type {
        EntityType::Course => {
            let Some(course) = snapshot.course(&claim.entity_slug) else {
                return ValidationOutcome::rejected(
                    ReasonCode::UnknownEntity,
                    Error::unknown_course(&claim.entity_slug).to_string(),
                );
            };
            calculate_course_completion(course, &progress.course_module_progress(&claim.entity_slug))
        }
        EntityType::Pathway => {
            let Some(pathway) = snapshot.pathway(&claim.entity_slug) else {
                return ValidationOutcome::rejected(
                    ReasonCode::UnknownEntity,
                    Error::unknown_pathway(&claim.entity_slug).to_string(),
                );
            };
            let pathway_progress = progress.pathway_progress(
                &claim.entity_slug,
                pathway.courses().iter().map(|c| c.slug.as_str()),
            );
            calculate_pathway_completion(pathway, snapshot, &pathway_progress)
        }
    };

    if result.is_complete {
        ValidationOutcome::Accepted
    } else {
        let unit = match claim.entity_type {
            EntityType::Course => "modules",
            EntityType::Pathway => "courses",
        };
        ValidationOutcome::rejected(
            ReasonCode::StructurallyIncomplete,
            format!(
                "{} '{}' not actually complete: {}/{} required {} completed (missing: {})",
                claim.entity_type,
                claim.entity_slug,
                result.completed_required_count,
                result.total_required_count,
                unit,
                result.missing_required.join(", ")
            ),
        )
    }
}

/// Plausibility window for completion timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampBounds {
    /// How far ahead of `now` a timestamp may be
    pub skew_tolerance: Duration,
    /// Earliest plausible timestamp
    pub platform_epoch: DateTime<Utc>,
}

impl Default for TimestampBounds {
    fn default() -> Self {
        Self {
            skew_tolerance: Duration::seconds(DEFAULT_SKEW_TOLERANCE_SECS),
            platform_epoch: default_platform_epoch(),
        }
    }
}

/// Verdict on a completion timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampCheck {
    Plausible,
    /// Ahead of `now` by more than the skew tolerance
    InFuture { ahead_by: Duration },
    /// Earlier than the platform epoch
    BeforePlatformEpoch { epoch: DateTime<Utc> },
}

impl TimestampCheck {
    pub fn is_plausible(&self) -> bool {
        matches!(self, TimestampCheck::Plausible)
    }

    /// Human-readable reason; `None` when plausible
    pub fn reason(&self) -> Option<String> {
        match self {
            TimestampCheck::Plausible => None,
            TimestampCheck::InFuture { ahead_by } => Some(format!(
                "timestamp is {}s in the future",
                ahead_by.num_seconds()
            )),
            TimestampCheck::BeforePlatformEpoch { epoch } => Some(format!(
                "timestamp predates platform epoch {}",
                epoch.to_rfc3339()
            )),
        }
    }
}

/// Check a timestamp against the default bounds
pub fn validate_completion_timestamp(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> TimestampCheck {
    validate_completion_timestamp_with(timestamp, now, &TimestampBounds::default())
}

/// Check a timestamp against explicit bounds
///
/// Both edges are inclusive: exactly `now + skew` and exactly the epoch pass.
pub fn validate_completion_timestamp_with(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    bounds: &TimestampBounds,
) -> TimestampCheck {
    if timestamp > now + bounds.skew_tolerance {
        return TimestampCheck::InFuture {
            ahead_by: timestamp - now,
        };
    }
    if timestamp < bounds.platform_epoch {
        return TimestampCheck::BeforePlatformEpoch {
            epoch: bounds.platform_epoch,
        };
    }
    TimestampCheck::Plausible
}

/// True when `explicit` is within `tolerance` of `inferred` in either
/// direction
pub fn validate_against_inferred(
    explicit: DateTime<Utc>,
    inferred: DateTime<Utc>,
    tolerance: Duration,
) -> bool {
    (explicit - inferred).abs() <= tolerance
}
