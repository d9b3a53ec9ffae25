//! Centralized default constants for framelab.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates should reference these constants instead of defining
//! their own magic numbers.

// =============================================================================
// REVIEW SCHEDULING
// =============================================================================

/// Fixed Ebbinghaus forgetting-curve intervals, in days after completion.
pub const EBBINGHAUS_INTERVAL_DAYS: [i64; 4] = [1, 3, 7, 30];

/// Floor for the adaptive review interval.
pub const ADAPTIVE_MIN_DAYS: i64 = 3;

/// Cap for the adaptive review interval.
pub const ADAPTIVE_MAX_DAYS: i64 = 14;

/// Number of trailing sessions considered for the score trend.
pub const TREND_WINDOW: usize = 3;

/// Trend magnitude (score points) that triggers an interval adjustment.
pub const TREND_THRESHOLD: f64 = 5.0;

/// Days added/removed when the trend threshold is crossed.
pub const TREND_ADJUST_DAYS: i64 = 2;

/// Fallback local reminder time when preferences carry none.
pub const DEFAULT_REMINDER_TIME: &str = "09:00";

// =============================================================================
// ACCOUNT DELETION
// =============================================================================

/// Days after the request during which cancellation is allowed.
pub const CANCELLATION_WINDOW_DAYS: i64 = 30;

/// Delay before the anonymization stage runs.
pub const ANONYMIZE_DELAY_DAYS: i64 = 1;

/// Delay before the hard-delete stage runs.
pub const HARD_DELETE_DELAY_DAYS: i64 = 30;

/// Notification history newer than this survives hard delete for audit.
pub const NOTIFICATION_RETENTION_DAYS: i64 = 180;

/// Sentinel written over the password hash during anonymization.
pub const ANONYMIZED_PASSWORD_SENTINEL: &str = "ANONYMIZED";

/// Domain for anonymized placeholder email addresses.
pub const ANONYMIZED_EMAIL_DOMAIN: &str = "anonymized.local";

// =============================================================================
// JOBS
// =============================================================================

/// Max concurrent jobs processed by the worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Worker polling interval when the queue is empty.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default retry budget per job.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Wall-clock budget for a single job execution.
pub const JOB_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8000;
