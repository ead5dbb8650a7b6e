//! # HHL Common Library
//!
//! Shared code for the learning-platform completion tooling including:
//! - Course and pathway metadata model
//! - Learner progress-state document model
//! - Metadata cache, completion calculator and completion validator
//! - Completion event boundary (claim parsing and evaluation)
//! - Configuration loading
//! - Progress database schema

pub mod completion;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod metadata;
pub mod progress;
pub mod time;

pub use completion::{
    calculate_course_completion, calculate_pathway_completion, validate_completion_timestamp,
    validate_explicit_completion, CompletionResult, MetadataCache, MetadataSnapshot,
    ValidationOutcome,
};
pub use error::{Error, Result};
