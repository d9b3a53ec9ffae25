//! Notification queue and preferences repository implementation.
//!
//! `schedule` writes the notification row and, when the row is actually
//! inserted, queues a `dispatch_reminder` job due at the scheduled time.
//! The job worker settles the row through [`NotificationDelivery`].

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use framelab_core::{
    new_v7, Error, JobRepository, JobType, NotificationDelivery, NotificationDispatch,
    NotificationPreferences, NotificationType, PreferencesRepository, Priority, Result,
    ScheduleNotificationRequest,
};

use crate::jobs::PgJobRepository;

/// PostgreSQL implementation of the notification queue.
pub struct PgNotificationRepository {
    pool: Pool<Postgres>,
    jobs: PgJobRepository,
}

impl PgNotificationRepository {
    /// Create a new PgNotificationRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        let jobs = PgJobRepository::new(pool.clone());
        Self { pool, jobs }
    }

    fn priority_to_str(priority: Priority) -> &'static str {
        match priority {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

#[async_trait]
impl NotificationDispatch for PgNotificationRepository {
    async fn schedule(&self, req: ScheduleNotificationRequest) -> Result<Option<Uuid>> {
        let id = new_v7();
        let now = Utc::now();
        let channels: Vec<String> = req
            .channels
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();

        // Atomic check-and-insert so concurrent schedulers with the same
        // dedup key cannot both enqueue.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO notification
                 (id, user_id, notification_type, channels, subject, message, action_url,
                  metadata, priority, status, scheduled_at, dedup_key, created_at)
             SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, $11, $12
             WHERE $11::text IS NULL OR NOT EXISTS (
                 SELECT 1 FROM notification
                 WHERE user_id = $2 AND dedup_key = $11 AND status = 'pending'
             )
             RETURNING id",
        )
        .bind(id)
        .bind(req.user_id)
        .bind(req.notification_type.as_str())
        .bind(&channels)
        .bind(&req.content.subject)
        .bind(&req.content.message)
        .bind(&req.content.action_url)
        .bind(&req.content.metadata)
        .bind(Self::priority_to_str(req.priority))
        .bind(req.scheduled_at)
        .bind(&req.dedup_key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(notification_id) = inserted else {
            debug!(
                user_id = %req.user_id,
                dedup_key = ?req.dedup_key,
                "Notification suppressed by dedup key"
            );
            return Ok(None);
        };

        self.jobs
            .queue(
                Some(req.user_id),
                JobType::DispatchReminder,
                JobType::DispatchReminder.default_priority(),
                Some(json!({ "notification_id": notification_id })),
                req.scheduled_at,
            )
            .await?;

        Ok(Some(notification_id))
    }

    async fn cancel_pending(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notification SET status = 'cancelled'
             WHERE user_id = $1 AND notification_type = $2 AND status = 'pending'",
        )
        .bind(user_id)
        .bind(notification_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationDelivery for PgNotificationRepository {
    async fn mark_dispatched(&self, notification_id: Uuid) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE notification SET status = 'dispatched', dispatched_at = $1
             WHERE id = $2 AND status = 'pending'",
        )
        .bind(now)
        .bind(notification_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PreferencesRepository for PgNotificationRepository {
    async fn fetch(&self, user_id: Uuid) -> Result<Option<NotificationPreferences>> {
        let row = sqlx::query(
            "SELECT user_id, email_enabled, push_enabled, review_reminders_enabled, reminder_time
             FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| NotificationPreferences {
            user_id: row.get("user_id"),
            email_enabled: row.get("email_enabled"),
            push_enabled: row.get("push_enabled"),
            review_reminders_enabled: row.get("review_reminders_enabled"),
            reminder_time: row.get("reminder_time"),
        }))
    }
}
