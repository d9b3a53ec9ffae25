//! Spaced-repetition review scheduling for framelab.
//!
//! Completed learning artifacts are reviewed on the fixed Ebbinghaus
//! intervals (1, 3, 7, 30 days); once those are consumed, a score-adaptive
//! policy picks each following interval from the user's recall scores.

pub mod adaptive;
pub mod intervals;
pub mod scheduler;

pub use adaptive::{adaptive_interval_days, band_days, next_adaptive_due, score_trend};
pub use intervals::{interval_date, interval_dates, next_fixed_due, FIXED_INTERVAL_COUNT};
pub use scheduler::ReviewScheduler;
