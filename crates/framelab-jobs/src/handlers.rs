//! Handlers for the framelab job types.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use framelab_core::{Error, JobType, NotificationDelivery};
use framelab_gdpr::{AccountDeletionService, StageOutcome};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Whether a failed stage should be retried or abandoned.
///
/// Infrastructure errors are transient; stage-machine violations are not
/// going to resolve themselves on a retry.
fn stage_error_result(e: Error) -> JobResult {
    match e {
        Error::Database(_) | Error::Store(_) | Error::Io(_) => JobResult::Retry(e.to_string()),
        other => JobResult::Failed(other.to_string()),
    }
}

/// Runs the delayed anonymization stage of an account deletion.
pub struct AnonymizeAccountHandler {
    deletions: Arc<AccountDeletionService>,
}

impl AnonymizeAccountHandler {
    pub fn new(deletions: Arc<AccountDeletionService>) -> Self {
        Self { deletions }
    }
}

#[async_trait]
impl JobHandler for AnonymizeAccountHandler {
    fn job_type(&self) -> JobType {
        JobType::AnonymizeAccount
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let deletion_id = match ctx.payload_uuid("deletion_id") {
            Ok(id) => id,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        match self.deletions.advance_to_anonymized(deletion_id).await {
            Ok(outcome) => JobResult::Success(Some(json!({
                "deletion_id": deletion_id,
                "applied": outcome == StageOutcome::Applied,
            }))),
            Err(e) => stage_error_result(e),
        }
    }
}

/// Runs the final hard-delete stage of an account deletion.
pub struct HardDeleteAccountHandler {
    deletions: Arc<AccountDeletionService>,
}

impl HardDeleteAccountHandler {
    pub fn new(deletions: Arc<AccountDeletionService>) -> Self {
        Self { deletions }
    }
}

#[async_trait]
impl JobHandler for HardDeleteAccountHandler {
    fn job_type(&self) -> JobType {
        JobType::HardDeleteAccount
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let deletion_id = match ctx.payload_uuid("deletion_id") {
            Ok(id) => id,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        match self.deletions.advance_to_hard_delete(deletion_id).await {
            Ok(rows_removed) => JobResult::Success(Some(json!({
                "deletion_id": deletion_id,
                "rows_removed": rows_removed,
            }))),
            Err(e) => stage_error_result(e),
        }
    }
}

/// Settles a due scheduled reminder in the notification queue.
pub struct DispatchReminderHandler {
    delivery: Arc<dyn NotificationDelivery>,
}

impl DispatchReminderHandler {
    pub fn new(delivery: Arc<dyn NotificationDelivery>) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl JobHandler for DispatchReminderHandler {
    fn job_type(&self) -> JobType {
        JobType::DispatchReminder
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let notification_id = match ctx.payload_uuid("notification_id") {
            Ok(id) => id,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        match self.delivery.mark_dispatched(notification_id).await {
            Ok(dispatched) => {
                if !dispatched {
                    // Cancelled or already handled; nothing to deliver
                    info!(%notification_id, "Notification already settled");
                }
                JobResult::Success(Some(json!({
                    "notification_id": notification_id,
                    "dispatched": dispatched,
                })))
            }
            Err(e) => stage_error_result(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_job;
    use framelab_core::Result;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeDelivery {
        dispatched: Mutex<Vec<Uuid>>,
        known: Uuid,
    }

    #[async_trait]
    impl NotificationDelivery for FakeDelivery {
        async fn mark_dispatched(&self, notification_id: Uuid) -> Result<bool> {
            if notification_id != self.known {
                return Ok(false);
            }
            self.dispatched.lock().unwrap().push(notification_id);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_dispatch_reminder_marks_notification() {
        let id = Uuid::new_v4();
        let delivery = Arc::new(FakeDelivery {
            dispatched: Mutex::new(Vec::new()),
            known: id,
        });
        let handler = DispatchReminderHandler::new(delivery.clone());

        let job = test_job(
            JobType::DispatchReminder,
            Some(json!({"notification_id": id.to_string()})),
        );
        let result = handler.execute(JobContext::new(job)).await;
        match result {
            JobResult::Success(Some(data)) => assert_eq!(data["dispatched"], true),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(delivery.dispatched.lock().unwrap().as_slice(), &[id]);
    }

    #[tokio::test]
    async fn test_dispatch_reminder_tolerates_settled_notification() {
        let delivery = Arc::new(FakeDelivery {
            dispatched: Mutex::new(Vec::new()),
            known: Uuid::new_v4(),
        });
        let handler = DispatchReminderHandler::new(delivery);

        let job = test_job(
            JobType::DispatchReminder,
            Some(json!({"notification_id": Uuid::new_v4().to_string()})),
        );
        let result = handler.execute(JobContext::new(job)).await;
        match result {
            JobResult::Success(Some(data)) => assert_eq!(data["dispatched"], false),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_payload_fails_permanently() {
        let delivery = Arc::new(FakeDelivery {
            dispatched: Mutex::new(Vec::new()),
            known: Uuid::new_v4(),
        });
        let handler = DispatchReminderHandler::new(delivery);

        let job = test_job(JobType::DispatchReminder, None);
        let result = handler.execute(JobContext::new(job)).await;
        assert!(matches!(result, JobResult::Failed(_)));
    }

    #[test]
    fn test_transient_errors_map_to_retry() {
        assert!(matches!(
            stage_error_result(Error::Store("redis down".into())),
            JobResult::Retry(_)
        ));
        assert!(matches!(
            stage_error_result(Error::InvalidStageTransition {
                from: "requested".into(),
                to: "hard_deleted".into()
            }),
            JobResult::Failed(_)
        ));
    }
}
