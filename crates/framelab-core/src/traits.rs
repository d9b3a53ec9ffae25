//! Core traits for framelab abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// USER REPOSITORY
// =============================================================================

/// Repository for user account lookups.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fetch a user by ID. Returns `Error::UserNotFound` when absent.
    async fn fetch(&self, id: Uuid) -> Result<User>;

    /// Check if a user exists (including soft-deleted accounts).
    async fn exists(&self, id: Uuid) -> Result<bool>;
}

// =============================================================================
// ARTIFACT REPOSITORY
// =============================================================================

/// Repository for learning artifacts and their review history.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Fetch an artifact by ID. Returns `Error::ArtifactNotFound` when absent.
    async fn fetch(&self, id: Uuid) -> Result<Artifact>;

    /// List all artifacts owned by a user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Artifact>>;

    /// Append a review session to an artifact's history and return the
    /// updated artifact.
    ///
    /// Implementations must serialize concurrent appends for the same
    /// artifact through row locking so the returned history always includes
    /// every previously committed session.
    async fn append_review_session(
        &self,
        artifact_id: Uuid,
        session: ReviewSession,
    ) -> Result<Artifact>;
}

// =============================================================================
// NOTIFICATION DISPATCH
// =============================================================================

/// Enqueue-side interface to the notification delivery subsystem.
///
/// Actual delivery (email/push/in-app) is downstream of the queue and out
/// of scope for callers of this trait.
#[async_trait]
pub trait NotificationDispatch: Send + Sync {
    /// Enqueue a notification for delivery at `scheduled_at`.
    ///
    /// When the request carries a `dedup_key` and an undelivered
    /// notification with the same key already exists for the user, nothing
    /// is enqueued and `Ok(None)` is returned.
    async fn schedule(&self, req: ScheduleNotificationRequest) -> Result<Option<Uuid>>;

    /// Cancel all undelivered notifications of the given type for a user.
    /// Returns the number of cancelled entries.
    async fn cancel_pending(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<u64>;
}

/// Delivery-side interface to the notification queue.
///
/// Used by the background dispatcher to settle due entries; provider
/// integrations (email/push) sit behind this boundary.
#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    /// Mark a due scheduled notification dispatched to its channels.
    /// Returns false when the entry is gone or already settled.
    async fn mark_dispatched(&self, notification_id: Uuid) -> Result<bool>;
}

/// Repository for per-user notification preferences.
#[async_trait]
pub trait PreferencesRepository: Send + Sync {
    /// Fetch preferences, or `None` when the user never configured any.
    async fn fetch(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>>;
}

// =============================================================================
// DELETION REPOSITORY
// =============================================================================

/// Repository driving the staged account deletion workflow.
///
/// Each `apply_*` method executes the stage's data mutations **and** the
/// stage marker update in a single transaction, guarded by the expected
/// current stage. A guard miss (concurrent or retried transition) returns
/// `Error::InvalidStageTransition`; a mutation failure rolls the whole
/// stage back and surfaces as `Error::StageTransitionFailed`.
#[async_trait]
pub trait DeletionRepository: Send + Sync {
    /// Insert a new request at `Requested`.
    async fn create(&self, req: &DeletionRequest) -> Result<()>;

    /// Fetch a request by ID.
    async fn fetch(&self, deletion_id: Uuid) -> Result<Option<DeletionRequest>>;

    /// Fetch the user's active (non-terminal) request, if any.
    async fn active_for_user(&self, user_id: Uuid) -> Result<Option<DeletionRequest>>;

    /// Stage 1: deactivate the account and mark it deleted.
    /// Guard: request stage must be `Requested`.
    async fn apply_soft_delete(&self, deletion_id: Uuid) -> Result<DeletionRequest>;

    /// Stage 2: replace identifying fields and scrub free-text personal
    /// content while preserving analytical shape.
    /// Guard: request stage must be `SoftDeleted`.
    async fn apply_anonymization(&self, deletion_id: Uuid) -> Result<DeletionRequest>;

    /// Stage 3: physically delete all user-owned rows except notification
    /// history newer than `retention_cutoff`, then the user and the request
    /// itself. Returns the number of rows removed.
    /// Guard: request stage must be `Anonymized`.
    async fn apply_hard_delete(
        &self,
        deletion_id: Uuid,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    /// Cancel the request and restore the account to active.
    /// Guard: request stage must be `Requested` or `SoftDeleted`; the
    /// deadline check is the caller's responsibility.
    async fn apply_cancellation(&self, deletion_id: Uuid) -> Result<DeletionRequest>;

    /// Count rows a hard delete would remove, per entity.
    async fn estimate_impact(&self, user_id: Uuid) -> Result<DeletionImpact>;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Repository for the background job queue.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a new job, optionally delayed until `run_at`.
    async fn queue(
        &self,
        user_id: Option<Uuid>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
        run_at: DateTime<Utc>,
    ) -> Result<Uuid>;

    /// Atomically claim the next due pending job, marking it running.
    async fn claim_next_due(&self) -> Result<Option<Job>>;

    /// Mark a job completed with an optional result payload.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Mark a job failed, or re-queue it when retries remain.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Cancel pending jobs of the given types for a user (e.g. when a
    /// deletion request is cancelled). Returns the number cancelled.
    async fn cancel_pending_for_user(&self, user_id: Uuid, job_types: &[JobType]) -> Result<u64>;
}
