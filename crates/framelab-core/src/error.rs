//! Error types for framelab.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias using framelab's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for framelab operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Key-value store operation failed (Redis)
    #[error("Store error: {0}")]
    Store(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(uuid::Uuid),

    /// Learning artifact (user output) not found
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(uuid::Uuid),

    /// No rate limit entry configured for a tier + endpoint pair
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfiguration(String),

    /// Request quota exhausted; retry after the given number of seconds
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    QuotaExceeded { retry_after: i64 },

    /// Quota configured as zero: the feature is gated by subscription tier
    #[error("Feature not available at this tier: {0}")]
    FeatureNotAvailable(String),

    /// User already has a non-cancelled, non-completed deletion request
    #[error("User {0} already has an active deletion request")]
    AlreadyHasActiveDeletion(uuid::Uuid),

    /// Attempted a deletion stage transition from an unexpected current stage
    #[error("Invalid deletion stage transition: {from} -> {to}")]
    InvalidStageTransition { from: String, to: String },

    /// Deletion cancellation attempted after the grace period
    #[error("Cancellation window expired on {0}")]
    CancellationWindowExpired(DateTime<Utc>),

    /// A deletion stage partially failed and was rolled back
    #[error("Stage transition failed: {0}")]
    StageTransitionFailed(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
