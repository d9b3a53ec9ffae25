//! Score-adaptive review interval policy.
//!
//! After a review session the next interval is chosen from the latest
//! recall score, then nudged by the score trend across the history:
//!
//! | latest score | base interval |
//! |--------------|---------------|
//! | >= 90        | 14 days       |
//! | >= 80        | 10 days       |
//! | >= 70        | 7 days        |
//! | >= 60        | 5 days        |
//! | < 60         | 3 days        |
//!
//! With at least three sessions on record, the trend is the mean of the
//! last three scores minus the mean of the first three. A clearly rising
//! trend extends the interval by 2 days, a clearly falling one shortens
//! it by 2, always clamped to [3, 14].

use chrono::{DateTime, Duration, Utc};

use framelab_core::defaults::{
    ADAPTIVE_MAX_DAYS, ADAPTIVE_MIN_DAYS, TREND_ADJUST_DAYS, TREND_THRESHOLD, TREND_WINDOW,
};
use framelab_core::ReviewSession;

/// Base interval for a single recall score.
pub fn band_days(score: u8) -> i64 {
    match score {
        90..=u8::MAX => 14,
        80..=89 => 10,
        70..=79 => 7,
        60..=69 => 5,
        _ => 3,
    }
}

/// Mean of last `TREND_WINDOW` scores minus mean of the first
/// `TREND_WINDOW`, or `None` with fewer sessions than the window.
pub fn score_trend(history: &[ReviewSession]) -> Option<f64> {
    if history.len() < TREND_WINDOW {
        return None;
    }
    let mean = |sessions: &[ReviewSession]| {
        sessions.iter().map(|s| s.score as f64).sum::<f64>() / sessions.len() as f64
    };
    let first = mean(&history[..TREND_WINDOW]);
    let last = mean(&history[history.len() - TREND_WINDOW..]);
    Some(last - first)
}

/// Days until the next review given the full (non-empty) session history,
/// newest last.
pub fn adaptive_interval_days(history: &[ReviewSession]) -> Option<i64> {
    let latest = history.last()?;
    let mut days = band_days(latest.score);

    if let Some(trend) = score_trend(history) {
        if trend > TREND_THRESHOLD {
            days += TREND_ADJUST_DAYS;
        } else if trend < -TREND_THRESHOLD {
            days -= TREND_ADJUST_DAYS;
        }
    }

    Some(days.clamp(ADAPTIVE_MIN_DAYS, ADAPTIVE_MAX_DAYS))
}

/// Next due date: the latest session's time plus the adaptive interval.
/// Intervals count from each session, they do not accumulate.
pub fn next_adaptive_due(history: &[ReviewSession]) -> Option<DateTime<Utc>> {
    let latest = history.last()?;
    let days = adaptive_interval_days(history)?;
    Some(latest.reviewed_at + Duration::days(days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(reviewed_at: DateTime<Utc>, score: u8) -> ReviewSession {
        ReviewSession {
            reviewed_at,
            score,
            minutes_spent: 10,
        }
    }

    fn sessions(scores: &[u8]) -> Vec<ReviewSession> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        scores
            .iter()
            .enumerate()
            .map(|(i, &s)| session(start + Duration::days(i as i64), s))
            .collect()
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(band_days(100), 14);
        assert_eq!(band_days(90), 14);
        assert_eq!(band_days(89), 10);
        assert_eq!(band_days(80), 10);
        assert_eq!(band_days(79), 7);
        assert_eq!(band_days(70), 7);
        assert_eq!(band_days(69), 5);
        assert_eq!(band_days(60), 5);
        assert_eq!(band_days(59), 3);
        assert_eq!(band_days(0), 3);
    }

    #[test]
    fn test_high_score_first_review_gets_two_weeks() {
        // Review on 2024-01-02 with score 95: next due 2024-01-16
        let reviewed = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        let history = vec![session(reviewed, 95)];
        let due = next_adaptive_due(&history).unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_low_score_shortens_from_latest_session_not_cumulative() {
        let history = sessions(&[95, 55]);
        let due = next_adaptive_due(&history).unwrap();
        // 3 days after the second session, regardless of the earlier 14-day grant
        assert_eq!(due, history[1].reviewed_at + Duration::days(3));
    }

    #[test]
    fn test_trend_needs_three_sessions() {
        assert_eq!(score_trend(&sessions(&[50, 90])), None);
        assert!(score_trend(&sessions(&[50, 70, 90])).is_some());
    }

    #[test]
    fn test_rising_trend_extends_interval() {
        // First three mean 55, last three mean 85: trend +30
        let history = sessions(&[50, 55, 60, 80, 85, 90]);
        // Latest 90 -> 14 base, +2 trend, capped at 14
        assert_eq!(adaptive_interval_days(&history), Some(14));

        // Same trend with a mid band score stays under the cap
        let history = sessions(&[50, 55, 60, 80, 85, 82]);
        // Latest 82 -> 10 base, +2 trend = 12
        assert_eq!(adaptive_interval_days(&history), Some(12));
    }

    #[test]
    fn test_falling_trend_shortens_interval_with_floor() {
        // Means 85 then 55: trend -30. Latest 50 -> 3 base, -2 clamped to 3
        let history = sessions(&[80, 85, 90, 60, 55, 50]);
        assert_eq!(adaptive_interval_days(&history), Some(3));

        // Latest 72 -> 7 base, -2 trend = 5
        let history = sessions(&[80, 85, 90, 60, 55, 72]);
        assert_eq!(adaptive_interval_days(&history), Some(5));
    }

    #[test]
    fn test_flat_trend_leaves_band_untouched() {
        let history = sessions(&[75, 75, 75, 75]);
        assert_eq!(adaptive_interval_days(&history), Some(7));
    }

    #[test]
    fn test_empty_history_has_no_adaptive_due() {
        assert_eq!(adaptive_interval_days(&[]), None);
        assert_eq!(next_adaptive_due(&[]), None);
    }
}
