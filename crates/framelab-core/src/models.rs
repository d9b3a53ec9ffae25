//! Domain models shared across framelab crates.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// USERS & SUBSCRIPTION
// =============================================================================

/// Subscription tier controlling feature access and rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
        }
    }

    /// Parse from the string form stored in the user row.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(SubscriptionTier::Free),
            "premium" => Some(SubscriptionTier::Premium),
            _ => None,
        }
    }
}

/// A platform user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub subscription_tier: SubscriptionTier,
    pub is_active: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// LEARNING ARTIFACTS & REVIEW HISTORY
// =============================================================================

/// One completed review session, appended to an artifact's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSession {
    pub reviewed_at: DateTime<Utc>,
    /// Self-assessed recall score, 0-100.
    pub score: u8,
    pub minutes_spent: i32,
}

/// A completed learning artifact (framework output) eligible for
/// spaced-repetition review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Business framework the artifact applies (e.g. "SWOT Analysis").
    pub framework_name: String,
    /// Artifact kind (e.g. "analysis", "journey_map").
    pub kind: String,
    /// When the artifact was finalized; review intervals count from here.
    pub completed_at: DateTime<Utc>,
    /// Append-only review history, oldest first.
    pub review_history: Vec<ReviewSession>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One pending review slot in a user's schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewScheduleEntry {
    pub artifact_id: Uuid,
    pub framework_name: String,
    pub kind: String,
    pub due_at: DateTime<Utc>,
    /// Fixed Ebbinghaus interval index, or `None` once the adaptive
    /// policy governs (all fixed intervals consumed).
    pub interval_index: Option<usize>,
    pub days_since_completion: i64,
}

/// A user's review schedule, split by due state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewSchedule {
    pub upcoming: Vec<ReviewScheduleEntry>,
    pub overdue: Vec<ReviewScheduleEntry>,
    pub completed_today: usize,
    pub total_pending: usize,
}

/// Outcome of recording a review session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCompletion {
    pub artifact_id: Uuid,
    pub total_reviews: usize,
    pub next_review_due: DateTime<Utc>,
}

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Endpoint category for quota accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    GeneralApi,
    AiCopilot,
    OutputGeneration,
}

impl EndpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::GeneralApi => "general_api",
            EndpointType::AiCopilot => "ai_copilot",
            EndpointType::OutputGeneration => "output_generation",
        }
    }

    pub const ALL: [EndpointType; 3] = [
        EndpointType::GeneralApi,
        EndpointType::AiCopilot,
        EndpointType::OutputGeneration,
    ];
}

/// Rate limiting algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    SlidingWindow,
    FixedWindow,
    TokenBucket,
}

impl RateLimitAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAlgorithm::SlidingWindow => "sliding_window",
            RateLimitAlgorithm::FixedWindow => "fixed_window",
            RateLimitAlgorithm::TokenBucket => "token_bucket",
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the caller can expect fresh quota; usable as a Retry-After hint.
    pub reset_at: DateTime<Utc>,
}

// =============================================================================
// ACCOUNT DELETION
// =============================================================================

/// Stage of the GDPR staged account removal workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStage {
    Requested,
    SoftDeleted,
    Anonymized,
    HardDeleted,
    Cancelled,
}

impl DeletionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionStage::Requested => "requested",
            DeletionStage::SoftDeleted => "soft_deleted",
            DeletionStage::Anonymized => "anonymized",
            DeletionStage::HardDeleted => "hard_deleted",
            DeletionStage::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(DeletionStage::Requested),
            "soft_deleted" => Some(DeletionStage::SoftDeleted),
            "anonymized" => Some(DeletionStage::Anonymized),
            "hard_deleted" => Some(DeletionStage::HardDeleted),
            "cancelled" => Some(DeletionStage::Cancelled),
            _ => None,
        }
    }

    /// Whether the workflow may move from `self` to `next`.
    ///
    /// Forward transitions are strictly monotonic; `Cancelled` is reachable
    /// only from `Requested` and `SoftDeleted` (deadline enforced by the
    /// service, not here).
    pub fn can_transition_to(&self, next: DeletionStage) -> bool {
        use DeletionStage::*;
        matches!(
            (self, next),
            (Requested, SoftDeleted)
                | (SoftDeleted, Anonymized)
                | (Anonymized, HardDeleted)
                | (Requested, Cancelled)
                | (SoftDeleted, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeletionStage::HardDeleted | DeletionStage::Cancelled)
    }
}

/// Why an account is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    UserRequest,
    GdprRight,
    Inactivity,
    PolicyViolation,
    DataRetention,
}

impl DeletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionReason::UserRequest => "user_request",
            DeletionReason::GdprRight => "gdpr_right",
            DeletionReason::Inactivity => "inactivity",
            DeletionReason::PolicyViolation => "policy_violation",
            DeletionReason::DataRetention => "data_retention",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_request" => Some(DeletionReason::UserRequest),
            "gdpr_right" => Some(DeletionReason::GdprRight),
            "inactivity" => Some(DeletionReason::Inactivity),
            "policy_violation" => Some(DeletionReason::PolicyViolation),
            "data_retention" => Some(DeletionReason::DataRetention),
            _ => None,
        }
    }
}

/// A staged account deletion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stage: DeletionStage,
    pub reason: DeletionReason,
    pub requested_at: DateTime<Utc>,
    pub cancellable_until: DateTime<Utc>,
    pub soft_deleted_at: Option<DateTime<Utc>>,
    pub anonymized_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl DeletionRequest {
    /// Whether the request can still be cancelled at `now`.
    pub fn can_cancel(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.stage,
            DeletionStage::Requested | DeletionStage::SoftDeleted
        ) && now < self.cancellable_until
    }
}

/// Placeholder email written over a user's address during anonymization.
/// Derived from the user id so the row stays unique but unlinkable.
pub fn anonymized_email(user_id: Uuid) -> String {
    let id = user_id.simple().to_string();
    format!(
        "deleted_user_{}@{}",
        &id[..8],
        crate::defaults::ANONYMIZED_EMAIL_DOMAIN
    )
}

/// Per-entity row counts a deletion would remove.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionImpact {
    pub artifacts: i64,
    pub learning_sessions: i64,
    pub badges: i64,
    pub notifications: i64,
    pub preferences: i64,
}

impl DeletionImpact {
    pub fn total(&self) -> i64 {
        self.artifacts + self.learning_sessions + self.badges + self.notifications
            + self.preferences
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Category of an outbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ReviewReminder,
    DeletionUpdate,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ReviewReminder => "review_reminder",
            NotificationType::DeletionUpdate => "deletion_update",
        }
    }
}

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    Push,
    InApp,
    Websocket,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::Push => "push",
            DeliveryChannel::InApp => "in_app",
            DeliveryChannel::Websocket => "websocket",
        }
    }
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Rendered notification content handed to the dispatch layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationContent {
    pub subject: String,
    pub message: String,
    pub action_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

/// Request to enqueue a notification for later delivery.
#[derive(Debug, Clone)]
pub struct ScheduleNotificationRequest {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub channels: Vec<DeliveryChannel>,
    pub content: NotificationContent,
    pub scheduled_at: DateTime<Utc>,
    pub priority: Priority,
    /// Optional dedup key; a pending notification with the same key for the
    /// same user suppresses the enqueue.
    pub dedup_key: Option<String>,
}

/// Per-user notification delivery preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub review_reminders_enabled: bool,
    /// Preferred local time for digest reminders.
    pub reminder_time: Option<NaiveTime>,
}

impl NotificationPreferences {
    /// Channels to deliver on, derived from the preference flags.
    /// In-app is always included.
    pub fn delivery_channels(&self) -> Vec<DeliveryChannel> {
        let mut channels = Vec::new();
        if self.email_enabled {
            channels.push(DeliveryChannel::Email);
        }
        if self.push_enabled {
            channels.push(DeliveryChannel::Push);
        }
        channels.push(DeliveryChannel::InApp);
        channels
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Type of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Deletion stage 2: anonymize personal data (runs at +1 day).
    AnonymizeAccount,
    /// Deletion stage 3: physically delete user data (runs at +30 days).
    HardDeleteAccount,
    /// Deliver a due scheduled notification.
    DispatchReminder,
}

impl JobType {
    /// Default priority for this job type (higher = more urgent).
    pub fn default_priority(&self) -> i32 {
        match self {
            // Hard delete completes a compliance obligation, highest priority
            JobType::HardDeleteAccount => 9,
            JobType::AnonymizeAccount => 7,
            JobType::DispatchReminder => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::AnonymizeAccount => "anonymize_account",
            JobType::HardDeleteAccount => "hard_delete_account",
            JobType::DispatchReminder => "dispatch_reminder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anonymize_account" => Some(JobType::AnonymizeAccount),
            "hard_delete_account" => Some(JobType::HardDeleteAccount),
            "dispatch_reminder" => Some(JobType::DispatchReminder),
            _ => None,
        }
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Option<JsonValue>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Earliest time the job may be claimed (delayed execution).
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
