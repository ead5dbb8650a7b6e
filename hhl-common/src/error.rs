//! Common error types for the completion tooling

use thiserror::Error;

/// Common result type for completion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error taxonomy
///
/// Normal "incomplete" verdicts and validation rejections are values, not
/// errors. Only structural problems and collaborator failures end up here.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unreachable metadata, malformed definitions, missing
    /// credentials. Fatal for the operation that hit it.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Course or pathway slug not present in the metadata cache
    #[error("Unknown {entity_type}: {slug}")]
    UnknownEntity { entity_type: String, slug: String },

    /// Claim payload missing required fields or carrying unparsable values
    #[error("Malformed claim: {0}")]
    MalformedClaim(String),

    /// Network or timeout failure talking to an external store
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn unknown_course(slug: impl Into<String>) -> Self {
        Error::UnknownEntity {
            entity_type: "course".to_string(),
            slug: slug.into(),
        }
    }

    pub fn unknown_pathway(slug: impl Into<String>) -> Self {
        Error::UnknownEntity {
            entity_type: "pathway".to_string(),
            slug: slug.into(),
        }
    }

    /// True for failures worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientStore(_))
    }
}
