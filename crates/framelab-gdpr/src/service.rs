//! Staged account deletion service.
//!
//! Drives the workflow requested → soft_deleted → anonymized →
//! hard_deleted (alternate terminal: cancelled). The repository executes
//! each stage's mutations transactionally behind a from-stage guard; this
//! service owns sequencing, the cancellation deadline, the delayed stage
//! jobs and user-facing notifications.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use framelab_core::defaults::{
    ANONYMIZE_DELAY_DAYS, CANCELLATION_WINDOW_DAYS, HARD_DELETE_DELAY_DAYS,
    NOTIFICATION_RETENTION_DAYS,
};
use framelab_core::{
    new_v7, DeletionImpact, DeletionReason, DeletionRepository, DeletionRequest, DeletionStage,
    Error, JobRepository, JobType, NotificationContent, NotificationDispatch, NotificationType,
    Priority, Result, ScheduleNotificationRequest, UserRepository,
};

/// User-facing view of a deletion request.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionStatus {
    pub deletion_id: Uuid,
    pub stage: DeletionStage,
    pub reason: DeletionReason,
    pub requested_at: DateTime<Utc>,
    pub cancellable_until: DateTime<Utc>,
    pub can_cancel: bool,
    pub soft_deleted_at: Option<DateTime<Utc>>,
    pub anonymized_at: Option<DateTime<Utc>>,
}

/// Outcome of running a delayed deletion stage.
///
/// `Skipped` covers retried jobs that find their work already done and
/// jobs racing a cancellation; both are terminal successes for the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Applied,
    Skipped,
}

pub struct AccountDeletionService {
    deletions: Arc<dyn DeletionRepository>,
    users: Arc<dyn UserRepository>,
    jobs: Arc<dyn JobRepository>,
    notifications: Arc<dyn NotificationDispatch>,
}

impl AccountDeletionService {
    pub fn new(
        deletions: Arc<dyn DeletionRepository>,
        users: Arc<dyn UserRepository>,
        jobs: Arc<dyn JobRepository>,
        notifications: Arc<dyn NotificationDispatch>,
    ) -> Self {
        Self {
            deletions,
            users,
            jobs,
            notifications,
        }
    }

    /// Start the deletion workflow for a user.
    ///
    /// Creates the request, immediately soft-deletes the account, and
    /// queues the delayed anonymization (+1 day) and hard delete
    /// (+30 days) stages. Rejected while another request is active.
    pub async fn initiate(
        &self,
        user_id: Uuid,
        reason: DeletionReason,
    ) -> Result<DeletionRequest> {
        if !self.users.exists(user_id).await? {
            return Err(Error::UserNotFound(user_id));
        }
        if let Some(active) = self.deletions.active_for_user(user_id).await? {
            warn!(
                user_id = %user_id,
                deletion_id = %active.id,
                stage = active.stage.as_str(),
                "Deletion already in progress"
            );
            return Err(Error::AlreadyHasActiveDeletion(user_id));
        }

        let now = Utc::now();
        let request = DeletionRequest {
            id: new_v7(),
            user_id,
            stage: DeletionStage::Requested,
            reason,
            requested_at: now,
            cancellable_until: now + Duration::days(CANCELLATION_WINDOW_DAYS),
            soft_deleted_at: None,
            anonymized_at: None,
            cancelled_at: None,
        };
        self.deletions.create(&request).await?;
        let request = self.deletions.apply_soft_delete(request.id).await?;

        let payload = json!({ "deletion_id": request.id });
        self.jobs
            .queue(
                Some(user_id),
                JobType::AnonymizeAccount,
                JobType::AnonymizeAccount.default_priority(),
                Some(payload.clone()),
                now + Duration::days(ANONYMIZE_DELAY_DAYS),
            )
            .await?;
        self.jobs
            .queue(
                Some(user_id),
                JobType::HardDeleteAccount,
                JobType::HardDeleteAccount.default_priority(),
                Some(payload),
                now + Duration::days(HARD_DELETE_DELAY_DAYS),
            )
            .await?;

        self.notify(
            user_id,
            "Account deletion scheduled",
            format!(
                "Your account will be permanently deleted on {}. You can cancel until {}.",
                (now + Duration::days(HARD_DELETE_DELAY_DAYS)).date_naive(),
                request.cancellable_until.date_naive()
            ),
        )
        .await;

        info!(
            user_id = %user_id,
            deletion_id = %request.id,
            reason = reason.as_str(),
            "Account deletion initiated"
        );
        Ok(request)
    }

    /// Stage 2: anonymize the account's personal data.
    ///
    /// Safe under job retries: a request already anonymized (or cancelled
    /// in the meantime) is skipped, any other stage is an error.
    pub async fn advance_to_anonymized(&self, deletion_id: Uuid) -> Result<StageOutcome> {
        let request = self
            .deletions
            .fetch(deletion_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("deletion request {deletion_id}")))?;

        match request.stage {
            DeletionStage::SoftDeleted => {
                let request = self.deletions.apply_anonymization(deletion_id).await?;
                info!(
                    deletion_id = %deletion_id,
                    user_id = %request.user_id,
                    "Account anonymized"
                );
                Ok(StageOutcome::Applied)
            }
            DeletionStage::Anonymized | DeletionStage::Cancelled => {
                info!(
                    deletion_id = %deletion_id,
                    stage = request.stage.as_str(),
                    "Anonymization already settled, skipping"
                );
                Ok(StageOutcome::Skipped)
            }
            other => Err(Error::InvalidStageTransition {
                from: other.as_str().to_string(),
                to: DeletionStage::Anonymized.as_str().to_string(),
            }),
        }
    }

    /// Stage 3: physically delete the account's data.
    ///
    /// Notification history newer than the 180-day retention window
    /// survives for audit. Returns the number of rows removed; a request
    /// already gone (retried job) or cancelled removes nothing.
    pub async fn advance_to_hard_delete(&self, deletion_id: Uuid) -> Result<u64> {
        let Some(request) = self.deletions.fetch(deletion_id).await? else {
            // Hard delete removes the request row with the user
            info!(deletion_id = %deletion_id, "Deletion request gone, nothing to do");
            return Ok(0);
        };

        match request.stage {
            DeletionStage::Anonymized => {
                let cutoff = Utc::now() - Duration::days(NOTIFICATION_RETENTION_DAYS);
                let removed = self.deletions.apply_hard_delete(deletion_id, cutoff).await?;
                info!(
                    deletion_id = %deletion_id,
                    user_id = %request.user_id,
                    rows_removed = removed,
                    "Account hard deleted"
                );
                Ok(removed)
            }
            DeletionStage::Cancelled => {
                info!(deletion_id = %deletion_id, "Deletion cancelled, skipping hard delete");
                Ok(0)
            }
            other => Err(Error::InvalidStageTransition {
                from: other.as_str().to_string(),
                to: DeletionStage::HardDeleted.as_str().to_string(),
            }),
        }
    }

    /// Cancel a pending deletion and restore the account.
    ///
    /// Legal only from `requested`/`soft_deleted` and before the
    /// 30-day deadline. Pending stage jobs are withdrawn.
    pub async fn cancel(&self, user_id: Uuid, deletion_id: Uuid) -> Result<DeletionRequest> {
        let request = self
            .deletions
            .fetch(deletion_id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| Error::NotFound(format!("deletion request {deletion_id}")))?;

        let now = Utc::now();
        if !request.can_cancel(now) {
            if matches!(
                request.stage,
                DeletionStage::Requested | DeletionStage::SoftDeleted
            ) {
                return Err(Error::CancellationWindowExpired(request.cancellable_until));
            }
            return Err(Error::InvalidStageTransition {
                from: request.stage.as_str().to_string(),
                to: DeletionStage::Cancelled.as_str().to_string(),
            });
        }

        let request = self.deletions.apply_cancellation(deletion_id).await?;
        let cancelled_jobs = self
            .jobs
            .cancel_pending_for_user(
                user_id,
                &[JobType::AnonymizeAccount, JobType::HardDeleteAccount],
            )
            .await?;

        self.notify(
            user_id,
            "Account deletion cancelled",
            "Your account has been restored and will not be deleted.".to_string(),
        )
        .await;

        info!(
            user_id = %user_id,
            deletion_id = %deletion_id,
            cancelled_jobs,
            "Account deletion cancelled"
        );
        Ok(request)
    }

    /// The user's active deletion request, if any.
    pub async fn status(&self, user_id: Uuid) -> Result<Option<DeletionStatus>> {
        let Some(request) = self.deletions.active_for_user(user_id).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        Ok(Some(DeletionStatus {
            deletion_id: request.id,
            stage: request.stage,
            reason: request.reason,
            requested_at: request.requested_at,
            cancellable_until: request.cancellable_until,
            can_cancel: request.can_cancel(now),
            soft_deleted_at: request.soft_deleted_at,
            anonymized_at: request.anonymized_at,
        }))
    }

    /// Per-entity row counts a deletion would remove.
    pub async fn estimate_impact(&self, user_id: Uuid) -> Result<DeletionImpact> {
        self.deletions.estimate_impact(user_id).await
    }

    /// Best-effort deletion status notification; failures are logged,
    /// never propagated into the workflow.
    async fn notify(&self, user_id: Uuid, subject: &str, message: String) {
        let req = ScheduleNotificationRequest {
            user_id,
            notification_type: NotificationType::DeletionUpdate,
            channels: vec![
                framelab_core::DeliveryChannel::Email,
                framelab_core::DeliveryChannel::InApp,
            ],
            content: NotificationContent {
                subject: subject.to_string(),
                message,
                action_url: None,
                metadata: None,
            },
            scheduled_at: Utc::now(),
            priority: Priority::High,
            dedup_key: None,
        };
        if let Err(e) = self.notifications.schedule(req).await {
            warn!(user_id = %user_id, error = %e, "Failed to enqueue deletion notification");
        }
    }
}
