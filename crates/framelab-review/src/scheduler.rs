//! Review scheduling service.
//!
//! Ties the interval policies to the artifact repository and the
//! notification queue: reminder fan-out on completion, session
//! recording, schedule queries and the daily digest.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use framelab_core::defaults::DEFAULT_REMINDER_TIME;
use framelab_core::{
    Artifact, ArtifactRepository, DeliveryChannel, Error, NotificationContent,
    NotificationDispatch, NotificationPreferences, NotificationType, PreferencesRepository,
    Priority, Result, ReviewCompletion, ReviewSchedule, ReviewScheduleEntry, ReviewSession,
    ScheduleNotificationRequest,
};

use crate::adaptive::next_adaptive_due;
use crate::intervals::{interval_dates, FIXED_INTERVAL_COUNT};

/// Orchestrates review reminders and session recording.
pub struct ReviewScheduler {
    artifacts: Arc<dyn ArtifactRepository>,
    notifications: Arc<dyn NotificationDispatch>,
    preferences: Arc<dyn PreferencesRepository>,
}

impl ReviewScheduler {
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        notifications: Arc<dyn NotificationDispatch>,
        preferences: Arc<dyn PreferencesRepository>,
    ) -> Self {
        Self {
            artifacts,
            notifications,
            preferences,
        }
    }

    /// Enqueue review reminders for every future fixed interval of a
    /// newly completed artifact. Returns the enqueued notification ids.
    ///
    /// Idempotent: each reminder carries a dedup key of artifact +
    /// interval index, so re-scheduling cannot produce duplicate pending
    /// reminders. Individual enqueue failures are logged and skipped.
    pub async fn schedule_reviews(&self, artifact: &Artifact) -> Result<Vec<Uuid>> {
        let prefs = self.effective_preferences(artifact.user_id).await?;
        if !prefs.review_reminders_enabled {
            debug!(user_id = %artifact.user_id, "Review reminders disabled, skipping");
            return Ok(Vec::new());
        }
        let channels = prefs.delivery_channels();

        let now = Utc::now();
        let mut scheduled = Vec::new();
        for (index, due_at) in interval_dates(artifact.completed_at).into_iter().enumerate() {
            if due_at <= now {
                continue;
            }
            match self
                .enqueue_reminder(artifact, index, due_at, &channels)
                .await
            {
                Ok(Some(id)) => scheduled.push(id),
                Ok(None) => {
                    debug!(artifact_id = %artifact.id, index, "Reminder already pending")
                }
                Err(e) => {
                    warn!(
                        artifact_id = %artifact.id,
                        index,
                        error = %e,
                        "Failed to enqueue review reminder"
                    );
                }
            }
        }

        info!(
            artifact_id = %artifact.id,
            user_id = %artifact.user_id,
            count = scheduled.len(),
            "Scheduled review reminders"
        );
        Ok(scheduled)
    }

    /// Record a completed review session and compute the next due date
    /// from the adaptive policy.
    ///
    /// Reminder scheduling for the new due date is best effort: a queue
    /// failure is logged, never surfaced.
    pub async fn record_review_completion(
        &self,
        artifact_id: Uuid,
        score: u8,
        minutes_spent: i32,
    ) -> Result<ReviewCompletion> {
        if score > 100 {
            return Err(Error::InvalidInput(format!(
                "score must be 0-100, got {score}"
            )));
        }
        if minutes_spent < 0 {
            return Err(Error::InvalidInput("minutes_spent must be >= 0".into()));
        }

        let session = ReviewSession {
            reviewed_at: Utc::now(),
            score,
            minutes_spent,
        };
        let artifact = self
            .artifacts
            .append_review_session(artifact_id, session)
            .await?;

        // History is append-only, so it cannot be empty here.
        let next_review_due = next_adaptive_due(&artifact.review_history)
            .ok_or_else(|| Error::Internal("review history empty after append".into()))?;

        if let Err(e) = self
            .schedule_followup_reminder(&artifact, next_review_due)
            .await
        {
            warn!(
                artifact_id = %artifact.id,
                error = %e,
                "Failed to schedule follow-up reminder"
            );
        }

        info!(
            artifact_id = %artifact.id,
            user_id = %artifact.user_id,
            score,
            total_reviews = artifact.review_history.len(),
            "Recorded review session"
        );
        Ok(ReviewCompletion {
            artifact_id: artifact.id,
            total_reviews: artifact.review_history.len(),
            next_review_due,
        })
    }

    /// A user's full review schedule, split into upcoming and overdue.
    pub async fn get_schedule(&self, user_id: Uuid) -> Result<ReviewSchedule> {
        let artifacts = self.artifacts.list_for_user(user_id).await?;
        let now = Utc::now();
        let today = now.date_naive();

        let mut schedule = ReviewSchedule::default();
        for artifact in &artifacts {
            schedule.completed_today += artifact
                .review_history
                .iter()
                .filter(|s| s.reviewed_at.date_naive() == today)
                .count();

            let Some(entry) = next_due_entry(artifact, now) else {
                continue;
            };
            if entry.due_at < now {
                schedule.overdue.push(entry);
            } else {
                schedule.upcoming.push(entry);
            }
        }

        schedule.upcoming.sort_by_key(|e| e.due_at);
        schedule.overdue.sort_by_key(|e| e.due_at);
        schedule.total_pending = schedule.upcoming.len() + schedule.overdue.len();
        Ok(schedule)
    }

    /// Enqueue a daily digest reminder at the user's preferred time when
    /// they have overdue reviews. Returns `None` when nothing is due,
    /// reminders are disabled, or an identical digest is already pending.
    pub async fn schedule_daily_digest(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        let prefs = self.effective_preferences(user_id).await?;
        if !prefs.review_reminders_enabled {
            return Ok(None);
        }

        let schedule = self.get_schedule(user_id).await?;
        let due_count = schedule.overdue.len();
        if due_count == 0 {
            return Ok(None);
        }

        let scheduled_at = next_reminder_instant(prefs.reminder_time, Utc::now());
        let req = ScheduleNotificationRequest {
            user_id,
            notification_type: NotificationType::ReviewReminder,
            channels: prefs.delivery_channels(),
            content: NotificationContent {
                subject: "Your reviews are waiting".to_string(),
                message: format!(
                    "You have {due_count} review{} due. A quick session keeps the curve flat.",
                    if due_count == 1 { "" } else { "s" }
                ),
                action_url: Some("/reviews".to_string()),
                metadata: None,
            },
            scheduled_at,
            priority: Priority::Normal,
            dedup_key: Some(format!(
                "digest:{user_id}:{}",
                scheduled_at.date_naive()
            )),
        };
        self.notifications.schedule(req).await
    }

    async fn enqueue_reminder(
        &self,
        artifact: &Artifact,
        index: usize,
        due_at: DateTime<Utc>,
        channels: &[DeliveryChannel],
    ) -> Result<Option<Uuid>> {
        let req = ScheduleNotificationRequest {
            user_id: artifact.user_id,
            notification_type: NotificationType::ReviewReminder,
            channels: channels.to_vec(),
            content: reminder_content(artifact, due_at),
            scheduled_at: due_at,
            priority: Priority::Normal,
            dedup_key: Some(format!("review:{}:{}", artifact.id, index)),
        };
        self.notifications.schedule(req).await
    }

    async fn schedule_followup_reminder(
        &self,
        artifact: &Artifact,
        due_at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let prefs = self.effective_preferences(artifact.user_id).await?;
        if !prefs.review_reminders_enabled {
            return Ok(None);
        }
        let req = ScheduleNotificationRequest {
            user_id: artifact.user_id,
            notification_type: NotificationType::ReviewReminder,
            channels: prefs.delivery_channels(),
            content: reminder_content(artifact, due_at),
            scheduled_at: due_at,
            priority: Priority::Normal,
            // Keyed by review count so each follow-up is distinct but
            // retries of the same follow-up dedup.
            dedup_key: Some(format!(
                "review:{}:adaptive:{}",
                artifact.id,
                artifact.review_history.len()
            )),
        };
        self.notifications.schedule(req).await
    }

    /// Stored preferences, or the defaults for users who never configured
    /// any (reminders on, email + in-app).
    async fn effective_preferences(&self, user_id: Uuid) -> Result<NotificationPreferences> {
        Ok(self
            .preferences
            .fetch(user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferences {
                user_id,
                email_enabled: true,
                push_enabled: false,
                review_reminders_enabled: true,
                reminder_time: None,
            }))
    }
}

/// The artifact's next pending review, if any.
///
/// While fixed intervals remain, the next one is indexed by the history
/// length; afterwards the adaptive policy alone governs.
fn next_due_entry(artifact: &Artifact, now: DateTime<Utc>) -> Option<ReviewScheduleEntry> {
    let reviews_done = artifact.review_history.len();
    let (interval_index, due_at) = if reviews_done < FIXED_INTERVAL_COUNT {
        let due = crate::intervals::interval_date(artifact.completed_at, reviews_done)?;
        (Some(reviews_done), due)
    } else {
        (None, next_adaptive_due(&artifact.review_history)?)
    };

    Some(ReviewScheduleEntry {
        artifact_id: artifact.id,
        framework_name: artifact.framework_name.clone(),
        kind: artifact.kind.clone(),
        due_at,
        interval_index,
        days_since_completion: (now - artifact.completed_at).num_days(),
    })
}

fn reminder_content(artifact: &Artifact, due_at: DateTime<Utc>) -> NotificationContent {
    NotificationContent {
        subject: format!("Time to review: {}", artifact.framework_name),
        message: format!(
            "Your {} from {} is due for review on {}.",
            artifact.kind,
            artifact.completed_at.date_naive(),
            due_at.date_naive()
        ),
        action_url: Some(format!("/reviews/outputs/{}", artifact.id)),
        metadata: None,
    }
}

/// The next occurrence of the preferred reminder time, today or tomorrow.
fn next_reminder_instant(preferred: Option<NaiveTime>, now: DateTime<Utc>) -> DateTime<Utc> {
    let time = preferred
        .or_else(|| NaiveTime::parse_from_str(DEFAULT_REMINDER_TIME, "%H:%M").ok())
        .unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeArtifacts {
        artifacts: Mutex<HashMap<Uuid, Artifact>>,
    }

    impl FakeArtifacts {
        fn new(artifacts: Vec<Artifact>) -> Self {
            Self {
                artifacts: Mutex::new(artifacts.into_iter().map(|a| (a.id, a)).collect()),
            }
        }
    }

    #[async_trait]
    impl ArtifactRepository for FakeArtifacts {
        async fn fetch(&self, id: Uuid) -> Result<Artifact> {
            self.artifacts
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(Error::ArtifactNotFound(id))
        }

        async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Artifact>> {
            Ok(self
                .artifacts
                .lock()
                .unwrap()
                .values()
                .filter(|a| a.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn append_review_session(
            &self,
            artifact_id: Uuid,
            session: ReviewSession,
        ) -> Result<Artifact> {
            let mut artifacts = self.artifacts.lock().unwrap();
            let artifact = artifacts
                .get_mut(&artifact_id)
                .ok_or(Error::ArtifactNotFound(artifact_id))?;
            artifact.review_history.push(session);
            artifact.updated_at = Utc::now();
            Ok(artifact.clone())
        }
    }

    #[derive(Default)]
    struct FakeDispatch {
        scheduled: Mutex<Vec<ScheduleNotificationRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationDispatch for FakeDispatch {
        async fn schedule(&self, req: ScheduleNotificationRequest) -> Result<Option<Uuid>> {
            if self.fail {
                return Err(Error::Store("queue down".into()));
            }
            let mut scheduled = self.scheduled.lock().unwrap();
            if let Some(key) = &req.dedup_key {
                let duplicate = scheduled
                    .iter()
                    .any(|r| r.user_id == req.user_id && r.dedup_key.as_ref() == Some(key));
                if duplicate {
                    return Ok(None);
                }
            }
            scheduled.push(req);
            Ok(Some(Uuid::new_v4()))
        }

        async fn cancel_pending(
            &self,
            user_id: Uuid,
            notification_type: NotificationType,
        ) -> Result<u64> {
            let mut scheduled = self.scheduled.lock().unwrap();
            let before = scheduled.len();
            scheduled
                .retain(|r| !(r.user_id == user_id && r.notification_type == notification_type));
            Ok((before - scheduled.len()) as u64)
        }
    }

    struct FakePreferences {
        prefs: Option<NotificationPreferences>,
    }

    #[async_trait]
    impl PreferencesRepository for FakePreferences {
        async fn fetch(&self, _user_id: Uuid) -> Result<Option<NotificationPreferences>> {
            Ok(self.prefs.clone())
        }
    }

    fn artifact(user_id: Uuid, completed_at: DateTime<Utc>) -> Artifact {
        Artifact {
            id: Uuid::new_v4(),
            user_id,
            framework_name: "SWOT Analysis".to_string(),
            kind: "analysis".to_string(),
            completed_at,
            review_history: Vec::new(),
            created_at: completed_at,
            updated_at: completed_at,
        }
    }

    fn scheduler(
        artifacts: Vec<Artifact>,
        prefs: Option<NotificationPreferences>,
    ) -> (ReviewScheduler, Arc<FakeDispatch>) {
        let dispatch = Arc::new(FakeDispatch::default());
        let scheduler = ReviewScheduler::new(
            Arc::new(FakeArtifacts::new(artifacts)),
            dispatch.clone(),
            Arc::new(FakePreferences { prefs }),
        );
        (scheduler, dispatch)
    }

    #[tokio::test]
    async fn test_schedule_reviews_enqueues_future_intervals_only() {
        let user = Uuid::new_v4();
        // Completed two days ago: the +1d interval is already past
        let art = artifact(user, Utc::now() - Duration::days(2));
        let (scheduler, dispatch) = scheduler(vec![art.clone()], None);

        let ids = scheduler.schedule_reviews(&art).await.unwrap();
        assert_eq!(ids.len(), 3);
        let scheduled = dispatch.scheduled.lock().unwrap();
        assert!(scheduled
            .iter()
            .all(|r| r.notification_type == NotificationType::ReviewReminder));
        assert!(scheduled.iter().all(|r| r.scheduled_at > Utc::now()));
    }

    #[tokio::test]
    async fn test_schedule_reviews_is_idempotent() {
        let user = Uuid::new_v4();
        let art = artifact(user, Utc::now());
        let (scheduler, dispatch) = scheduler(vec![art.clone()], None);

        let first = scheduler.schedule_reviews(&art).await.unwrap();
        assert_eq!(first.len(), 4);
        let second = scheduler.schedule_reviews(&art).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(dispatch.scheduled.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_schedule_reviews_skips_when_reminders_disabled() {
        let user = Uuid::new_v4();
        let art = artifact(user, Utc::now());
        let prefs = NotificationPreferences {
            user_id: user,
            email_enabled: true,
            push_enabled: true,
            review_reminders_enabled: false,
            reminder_time: None,
        };
        let (scheduler, dispatch) = scheduler(vec![art.clone()], Some(prefs));

        let ids = scheduler.schedule_reviews(&art).await.unwrap();
        assert!(ids.is_empty());
        assert!(dispatch.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_reviews_uses_preferred_channels() {
        let user = Uuid::new_v4();
        let art = artifact(user, Utc::now());
        let prefs = NotificationPreferences {
            user_id: user,
            email_enabled: false,
            push_enabled: true,
            review_reminders_enabled: true,
            reminder_time: None,
        };
        let (scheduler, dispatch) = scheduler(vec![art.clone()], Some(prefs));

        scheduler.schedule_reviews(&art).await.unwrap();
        let scheduled = dispatch.scheduled.lock().unwrap();
        assert_eq!(
            scheduled[0].channels,
            vec![DeliveryChannel::Push, DeliveryChannel::InApp]
        );
    }

    #[tokio::test]
    async fn test_record_review_validates_score() {
        let user = Uuid::new_v4();
        let art = artifact(user, Utc::now());
        let (scheduler, _) = scheduler(vec![art.clone()], None);

        let err = scheduler
            .record_review_completion(art.id, 101, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_record_review_high_score_grants_two_weeks() {
        let user = Uuid::new_v4();
        let art = artifact(user, Utc::now() - Duration::days(1));
        let (scheduler, _) = scheduler(vec![art.clone()], None);

        let completion = scheduler
            .record_review_completion(art.id, 95, 10)
            .await
            .unwrap();
        assert_eq!(completion.total_reviews, 1);
        let days = (completion.next_review_due - Utc::now()).num_days();
        assert!((13..=14).contains(&days), "expected ~14 days, got {days}");
    }

    #[tokio::test]
    async fn test_record_review_low_score_resets_to_three_days() {
        let user = Uuid::new_v4();
        let art = artifact(user, Utc::now() - Duration::days(20));
        let (scheduler, _) = scheduler(vec![art.clone()], None);

        scheduler
            .record_review_completion(art.id, 95, 10)
            .await
            .unwrap();
        let completion = scheduler
            .record_review_completion(art.id, 55, 10)
            .await
            .unwrap();
        assert_eq!(completion.total_reviews, 2);
        // Counts from this session, not from the earlier 14-day grant
        let days = (completion.next_review_due - Utc::now()).num_days();
        assert!((2..=3).contains(&days), "expected ~3 days, got {days}");
    }

    #[tokio::test]
    async fn test_record_review_survives_notification_failure() {
        let user = Uuid::new_v4();
        let art = artifact(user, Utc::now());
        let dispatch = Arc::new(FakeDispatch {
            scheduled: Mutex::new(Vec::new()),
            fail: true,
        });
        let scheduler = ReviewScheduler::new(
            Arc::new(FakeArtifacts::new(vec![art.clone()])),
            dispatch,
            Arc::new(FakePreferences { prefs: None }),
        );

        let completion = scheduler
            .record_review_completion(art.id, 80, 10)
            .await
            .unwrap();
        assert_eq!(completion.total_reviews, 1);
    }

    #[tokio::test]
    async fn test_get_schedule_splits_overdue_and_upcoming() {
        let user = Uuid::new_v4();
        // No reviews, completed 2 days ago: first interval (+1d) is overdue
        let overdue = artifact(user, Utc::now() - Duration::days(2));
        // No reviews, completed now: first interval (+1d) is upcoming
        let upcoming = artifact(user, Utc::now());
        let (scheduler, _) = scheduler(vec![overdue.clone(), upcoming.clone()], None);

        let schedule = scheduler.get_schedule(user).await.unwrap();
        assert_eq!(schedule.overdue.len(), 1);
        assert_eq!(schedule.upcoming.len(), 1);
        assert_eq!(schedule.total_pending, 2);
        assert_eq!(schedule.overdue[0].artifact_id, overdue.id);
        assert_eq!(schedule.overdue[0].interval_index, Some(0));
    }

    #[tokio::test]
    async fn test_get_schedule_counts_sessions_today() {
        let user = Uuid::new_v4();
        let mut art = artifact(user, Utc::now() - Duration::days(5));
        art.review_history.push(ReviewSession {
            reviewed_at: Utc::now() - Duration::hours(1),
            score: 88,
            minutes_spent: 12,
        });
        let (scheduler, _) = scheduler(vec![art], None);

        let schedule = scheduler.get_schedule(user).await.unwrap();
        assert_eq!(schedule.completed_today, 1);
        // One review done: next fixed index is 1
        let all: Vec<_> = schedule.upcoming.iter().chain(&schedule.overdue).collect();
        assert_eq!(all[0].interval_index, Some(1));
    }

    #[tokio::test]
    async fn test_get_schedule_adaptive_after_fixed_intervals() {
        let user = Uuid::new_v4();
        let mut art = artifact(user, Utc::now() - Duration::days(60));
        let base = Utc::now() - Duration::days(10);
        for i in 0..4 {
            art.review_history.push(ReviewSession {
                reviewed_at: base + Duration::days(i),
                score: 85,
                minutes_spent: 10,
            });
        }
        let (scheduler, _) = scheduler(vec![art.clone()], None);

        let schedule = scheduler.get_schedule(user).await.unwrap();
        let all: Vec<_> = schedule.upcoming.iter().chain(&schedule.overdue).collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].interval_index, None);
        // Latest 85 -> 10 days from the last session
        assert_eq!(
            all[0].due_at,
            art.review_history.last().unwrap().reviewed_at + Duration::days(10)
        );
    }

    #[tokio::test]
    async fn test_daily_digest_only_when_reviews_due() {
        let user = Uuid::new_v4();
        // Nothing overdue
        let fresh = artifact(user, Utc::now());
        let (scheduler, _) = scheduler(vec![fresh], None);
        assert_eq!(scheduler.schedule_daily_digest(user).await.unwrap(), None);

        // Overdue artifact: digest scheduled, second call dedups
        let overdue = artifact(user, Utc::now() - Duration::days(3));
        let (scheduler, dispatch) = self::scheduler(vec![overdue], None);
        let first = scheduler.schedule_daily_digest(user).await.unwrap();
        assert!(first.is_some());
        let second = scheduler.schedule_daily_digest(user).await.unwrap();
        assert!(second.is_none());
        assert_eq!(dispatch.scheduled.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_next_reminder_instant_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let morning = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let at = next_reminder_instant(Some(morning), now);
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 5, 11, 9, 0, 0).unwrap());

        let evening = NaiveTime::from_hms_opt(20, 0, 0).unwrap();
        let at = next_reminder_instant(Some(evening), now);
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 5, 10, 20, 0, 0).unwrap());
    }
}
