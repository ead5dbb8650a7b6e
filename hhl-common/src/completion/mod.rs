//! Completion tracking engine
//!
//! - `cache`: metadata cache with explicit load/reload lifecycle
//! - `calculator`: pure course/pathway completion calculation
//! - `validator`: explicit completion claims and timestamp plausibility
//!
//! Calculator and validator are synchronous and stateless; they take an
//! immutable `MetadataSnapshot` (or any `CourseCatalog`) by reference and are
//! safe to call concurrently.

pub mod cache;
pub mod calculator;
pub mod validator;

pub use cache::{ContentStore, FsContentStore, MetadataCache, MetadataSnapshot, StaticContentStore};
pub use calculator::{
    calculate_course_completion, calculate_pathway_completion, inferred_course_completion_time,
    inferred_pathway_completion_time, CompletionResult, CourseCatalog,
};
pub use validator::{
    validate_against_inferred, validate_completion_timestamp, validate_completion_timestamp_with,
    validate_explicit_completion, EntityType, ExplicitCompletionClaim, ReasonCode, TimestampBounds,
    TimestampCheck, ValidationOutcome,
};
