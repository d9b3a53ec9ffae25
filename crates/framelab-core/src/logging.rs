//! Structured logging schema and field name constants for framelab.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → job → sub-calls.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "limits", "review", "gdpr", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "worker", "scheduler", "counter_store"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "check_and_consume", "schedule_reviews", "apply_hard_delete"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// User UUID being operated on.
pub const USER_ID: &str = "user_id";

/// Learning artifact UUID.
pub const ARTIFACT_ID: &str = "artifact_id";

/// Deletion request UUID.
pub const DELETION_ID: &str = "deletion_id";

/// Deletion workflow stage.
pub const STAGE: &str = "stage";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

// ─── Rate limiting fields ──────────────────────────────────────────────────

/// Endpoint category being rate limited.
pub const ENDPOINT_TYPE: &str = "endpoint_type";

/// Subscription tier governing the quota.
pub const TIER: &str = "tier";

/// Rate limiting algorithm in effect.
pub const ALGORITHM: &str = "algorithm";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows affected by a mutation.
pub const ROW_COUNT: &str = "row_count";

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
