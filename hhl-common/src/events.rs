//! Completion event boundary
//!
//! Entry point for externally triggered completion events. The caller (the
//! authenticated API tier) hands over the raw JSON payload plus the
//! learner's current progress; this module parses the payload into an
//! `ExplicitCompletionClaim` and runs every check in a fixed order:
//!
//! 1. Payload shape (`malformed_payload`)
//! 2. Timestamp plausibility (`implausible_timestamp`), independent of
//!    structure
//! 3. Entity existence (`unknown_entity`)
//! 4. Structural completeness (`structurally_incomplete`)
//! 5. Drift from the inferred completion time (`timestamp_mismatch`)

use crate::completion::cache::MetadataSnapshot;
use crate::completion::calculator::{inferred_course_completion_time, inferred_pathway_completion_time};
use crate::completion::validator::{
    validate_against_inferred, validate_completion_timestamp_with, validate_explicit_completion,
    EntityType, ExplicitCompletionClaim, ReasonCode, TimestampBounds, ValidationOutcome,
    INFERRED_TOLERANCE_SECS,
};
use crate::progress::ProgressState;
use crate::time::{format_timestamp, parse_timestamp};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const COURSE_COMPLETED_EVENT: &str = "learning_course_completed";
const PATHWAY_COMPLETED_EVENT: &str = "learning_pathway_completed";

/// Contact identifier as sent by clients: a bare id, or an object with
/// `contactId` and/or `email`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ContactIdentifier {
    Id(String),
    Fields {
        #[serde(default, rename = "contactId", alias = "contact_id")]
        contact_id: Option<String>,
        #[serde(default)]
        email: Option<String>,
    },
}

impl ContactIdentifier {
    fn resolve(&self) -> Option<String> {
        let candidate = match self {
            ContactIdentifier::Id(id) => Some(id.as_str()),
            ContactIdentifier::Fields { contact_id, email } => contact_id
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .or(email.as_deref()),
        };
        candidate
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompletionEvent {
    #[serde(default, alias = "contact_identifier")]
    contact_identifier: Option<ContactIdentifier>,
    #[serde(default, alias = "entity_slug")]
    entity_slug: Option<String>,
    #[serde(default, alias = "entity_type")]
    entity_type: Option<String>,
    #[serde(default, alias = "claimed_timestamp", alias = "timestamp")]
    claimed_timestamp: Option<String>,
    #[serde(default, alias = "event_name")]
    event_name: Option<String>,
    #[serde(default, alias = "course_slug")]
    course_slug: Option<String>,
    #[serde(default, alias = "pathway_slug")]
    pathway_slug: Option<String>,
}

/// Parse a raw completion event into a claim
///
/// Accepts the direct shape (`entitySlug` + `entityType`) and the tracking
/// shape (`eventName` of `learning_course_completed` /
/// `learning_pathway_completed` with `course_slug` / `pathway_slug`).
pub fn parse_completion_claim(payload: &Value) -> Result<ExplicitCompletionClaim> {
    if !payload.is_object() {
        return Err(Error::MalformedClaim("payload must be a JSON object".to_string()));
    }
    let raw: RawCompletionEvent = serde_json::from_value(payload.clone())
        .map_err(|e| Error::MalformedClaim(format!("unreadable payload: {}", e)))?;

    let contact_id = raw
        .contact_identifier
        .as_ref()
        .and_then(ContactIdentifier::resolve)
        .ok_or_else(|| Error::MalformedClaim("missing contactIdentifier".to_string()))?;

    let (entity_type, entity_slug) = match (raw.entity_type.as_deref(), raw.event_name.as_deref()) {
        (Some(kind), _) => {
            let entity_type = EntityType::parse(kind).ok_or_else(|| {
                Error::MalformedClaim(format!("entityType must be course or pathway, got '{}'", kind))
            })?;
            let fallback = match entity_type {
                EntityType::Course => raw.course_slug.clone(),
                EntityType::Pathway => raw.pathway_slug.clone(),
            };
            (entity_type, raw.entity_slug.clone().or(fallback))
        }
        (None, Some(COURSE_COMPLETED_EVENT)) => (
            EntityType::Course,
            raw.entity_slug.clone().or(raw.course_slug.clone()),
        ),
        (None, Some(PATHWAY_COMPLETED_EVENT)) => (
            EntityType::Pathway,
            raw.entity_slug.clone().or(raw.pathway_slug.clone()),
        ),
        (None, Some(other)) => {
            return Err(Error::MalformedClaim(format!(
                "event '{}' is not a completion event",
                other
            )))
        }
        (None, None) => return Err(Error::MalformedClaim("missing entityType".to_string())),
    };

    let entity_slug = entity_slug
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::MalformedClaim("missing entitySlug".to_string()))?;

    let raw_timestamp = raw
        .claimed_timestamp
        .ok_or_else(|| Error::MalformedClaim("missing claimedTimestamp".to_string()))?;
    let claimed_at = parse_timestamp(&raw_timestamp).ok_or_else(|| {
        Error::MalformedClaim(format!("claimedTimestamp '{}' is not RFC 3339", raw_timestamp))
    })?;

    Ok(ExplicitCompletionClaim {
        contact_id,
        entity_type,
        entity_slug,
        claimed_at,
    })
}

/// Evaluate a raw completion event end to end
pub fn evaluate_completion_event(
    payload: &Value,
    snapshot: &MetadataSnapshot,
    progress: &ProgressState,
    now: DateTime<Utc>,
    bounds: &TimestampBounds,
) -> ValidationOutcome {
    let claim = match parse_completion_claim(payload) {
        Ok(claim) => claim,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed completion event");
            return ValidationOutcome::rejected(ReasonCode::MalformedPayload, e.to_string());
        }
    };
    let outcome = evaluate_claim(&claim, snapshot, progress, now, bounds);
    info!(
        contact_id = %claim.contact_id,
        entity_type = %claim.entity_type,
        entity_slug = %claim.entity_slug,
        accepted = outcome.is_accepted(),
        reason = ?outcome.reason(),
        "Completion event evaluated"
    );
    outcome
}

/// Evaluate an already-parsed claim (steps 2-5)
pub fn evaluate_claim(
    claim: &ExplicitCompletionClaim,
    snapshot: &MetadataSnapshot,
    progress: &ProgressState,
    now: DateTime<Utc>,
    bounds: &TimestampBounds,
) -> ValidationOutcome {
    let check = validate_completion_timestamp_with(claim.claimed_at, now, bounds);
    if let Some(reason) = check.reason() {
        return ValidationOutcome::rejected(
            ReasonCode::ImplausibleTimestamp,
            format!("{} ({})", reason, format_timestamp(&claim.claimed_at)),
        );
    }

    let outcome = validate_explicit_completion(claim, snapshot, progress);
    if !outcome.is_accepted() {
        return outcome;
    }

    let inferred = match claim.entity_type {
        EntityType::Course => snapshot.course(&claim.entity_slug).and_then(|course| {
            inferred_course_completion_time(course, &progress.course_module_progress(&claim.entity_slug))
        }),
        EntityType::Pathway => snapshot.pathway(&claim.entity_slug).and_then(|pathway| {
            let pathway_progress = progress.pathway_progress(
                &claim.entity_slug,
                pathway.courses().iter().map(|c| c.slug.as_str()),
            );
            inferred_pathway_completion_time(pathway, snapshot, &pathway_progress)
        }),
    };

    match inferred {
        Some(inferred)
            if !validate_against_inferred(
                claim.claimed_at,
                inferred,
                Duration::seconds(INFERRED_TOLERANCE_SECS),
            ) =>
        {
            ValidationOutcome::rejected(
                ReasonCode::TimestampMismatch,
                format!(
                    "claimed {} but last required completion was {}",
                    format_timestamp(&claim.claimed_at),
                    format_timestamp(&inferred)
                ),
            )
        }
        _ => ValidationOutcome::Accepted,
    }
}

/// Serializable response for API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEventResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&ValidationOutcome> for CompletionEventResponse {
    fn from(outcome: &ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Accepted => Self {
                accepted: true,
                reason_code: None,
                detail: None,
            },
            ValidationOutcome::Rejected { reason, detail } => Self {
                accepted: false,
                reason_code: Some(*reason),
                detail: Some(detail.clone()),
            },
        }
    }
}
