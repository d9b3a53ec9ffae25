//! Fixed Ebbinghaus forgetting-curve intervals.
//!
//! Newly completed artifacts are reviewed 1, 3, 7 and 30 days after
//! completion. Each review consumed moves the artifact to the next
//! interval; once all four are consumed the adaptive policy in
//! [`crate::adaptive`] governs alone.

use chrono::{DateTime, Duration, Utc};

use framelab_core::defaults::EBBINGHAUS_INTERVAL_DAYS;

/// Number of fixed intervals before the adaptive policy takes over.
pub const FIXED_INTERVAL_COUNT: usize = EBBINGHAUS_INTERVAL_DAYS.len();

/// All fixed review dates for an artifact completed at `completed_at`.
pub fn interval_dates(completed_at: DateTime<Utc>) -> [DateTime<Utc>; FIXED_INTERVAL_COUNT] {
    EBBINGHAUS_INTERVAL_DAYS.map(|days| completed_at + Duration::days(days))
}

/// Due date for one interval index.
pub fn interval_date(completed_at: DateTime<Utc>, index: usize) -> Option<DateTime<Utc>> {
    EBBINGHAUS_INTERVAL_DAYS
        .get(index)
        .map(|&days| completed_at + Duration::days(days))
}

/// The next fixed review slot given how many reviews are already done,
/// or `None` once every fixed interval has been consumed.
pub fn next_fixed_due(
    completed_at: DateTime<Utc>,
    reviews_done: usize,
) -> Option<(usize, DateTime<Utc>)> {
    interval_date(completed_at, reviews_done).map(|due| (reviews_done, due))
}
