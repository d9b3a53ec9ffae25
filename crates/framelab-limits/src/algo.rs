//! Synchronous rate limiting state transitions.
//!
//! Each algorithm is a pure function over an explicit state struct. The
//! in-memory store executes these directly; the Redis store executes Lua
//! scripts implementing the same transitions so that prune + count +
//! insert (or read + increment, or refill + subtract) happens in a single
//! atomic store round trip.
//!
//! All times are millisecond Unix timestamps; callers supply `now` so the
//! transitions stay deterministic under test.

use crate::config::QuotaSpec;

/// Outcome of one consume/peek transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgoOutcome {
    pub allowed: bool,
    /// Permits still available after this transition.
    pub remaining: u32,
    /// When fresh quota becomes available, as a millisecond timestamp.
    pub reset_at_ms: i64,
}

// =============================================================================
// SLIDING WINDOW
// =============================================================================

/// Ordered set of request timestamps within the current window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlidingWindowState {
    /// Sorted ascending.
    pub timestamps_ms: Vec<i64>,
}

/// Prune expired entries, then admit iff `count + weight <= max`.
/// Denial inserts nothing.
pub fn sliding_window_consume(
    state: &mut SlidingWindowState,
    now_ms: i64,
    spec: QuotaSpec,
    weight: u32,
) -> AlgoOutcome {
    let window_ms = spec.window_seconds as i64 * 1000;
    state.timestamps_ms.retain(|&ts| ts > now_ms - window_ms);

    let count = state.timestamps_ms.len() as u32;
    let allowed = count + weight <= spec.max_requests;
    if allowed {
        for _ in 0..weight {
            state.timestamps_ms.push(now_ms);
        }
    }

    let remaining = spec
        .max_requests
        .saturating_sub(state.timestamps_ms.len() as u32);
    // Quota frees up when the oldest tracked request ages out.
    let reset_at_ms = state
        .timestamps_ms
        .first()
        .map(|&oldest| oldest + window_ms)
        .unwrap_or(now_ms);

    AlgoOutcome {
        allowed,
        remaining,
        reset_at_ms,
    }
}

/// Read-only view of the sliding window at `now`.
pub fn sliding_window_peek(
    state: &SlidingWindowState,
    now_ms: i64,
    spec: QuotaSpec,
) -> AlgoOutcome {
    let window_ms = spec.window_seconds as i64 * 1000;
    let live: Vec<i64> = state
        .timestamps_ms
        .iter()
        .copied()
        .filter(|&ts| ts > now_ms - window_ms)
        .collect();
    AlgoOutcome {
        allowed: (live.len() as u32) < spec.max_requests,
        remaining: spec.max_requests.saturating_sub(live.len() as u32),
        reset_at_ms: live.first().map(|&o| o + window_ms).unwrap_or(now_ms),
    }
}

// =============================================================================
// FIXED WINDOW
// =============================================================================

/// Counter scoped to one aligned window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedWindowState {
    /// Aligned start of the window this count belongs to.
    pub window_start_ms: i64,
    pub count: u32,
}

/// Aligned window start containing `now`.
pub fn fixed_window_start(now_ms: i64, spec: QuotaSpec) -> i64 {
    let window_ms = spec.window_seconds as i64 * 1000;
    (now_ms / window_ms) * window_ms
}

/// Roll the counter into the current window if needed, then admit iff
/// `count + weight <= max`. Denial leaves the count unchanged.
pub fn fixed_window_consume(
    state: &mut FixedWindowState,
    now_ms: i64,
    spec: QuotaSpec,
    weight: u32,
) -> AlgoOutcome {
    let window_ms = spec.window_seconds as i64 * 1000;
    let start = fixed_window_start(now_ms, spec);
    if state.window_start_ms != start {
        state.window_start_ms = start;
        state.count = 0;
    }

    let allowed = state.count + weight <= spec.max_requests;
    if allowed {
        state.count += weight;
    }

    AlgoOutcome {
        allowed,
        remaining: spec.max_requests.saturating_sub(state.count),
        reset_at_ms: start + window_ms,
    }
}

/// Read-only view of the fixed window at `now`.
pub fn fixed_window_peek(state: &FixedWindowState, now_ms: i64, spec: QuotaSpec) -> AlgoOutcome {
    let window_ms = spec.window_seconds as i64 * 1000;
    let start = fixed_window_start(now_ms, spec);
    let count = if state.window_start_ms == start {
        state.count
    } else {
        0
    };
    AlgoOutcome {
        allowed: count < spec.max_requests,
        remaining: spec.max_requests.saturating_sub(count),
        reset_at_ms: start + window_ms,
    }
}

// =============================================================================
// TOKEN BUCKET
// =============================================================================

/// Continuously refilled token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub last_refill_ms: i64,
}

impl TokenBucketState {
    /// A bucket starting full at `now`.
    pub fn full(spec: QuotaSpec, now_ms: i64) -> Self {
        Self {
            tokens: spec.max_requests as f64,
            last_refill_ms: now_ms,
        }
    }
}

fn refill(state: &mut TokenBucketState, now_ms: i64, spec: QuotaSpec) {
    let elapsed_ms = (now_ms - state.last_refill_ms).max(0) as f64;
    let rate_per_ms = spec.max_requests as f64 / (spec.window_seconds as f64 * 1000.0);
    state.tokens = (state.tokens + elapsed_ms * rate_per_ms).min(spec.max_requests as f64);
    state.last_refill_ms = now_ms;
}

/// Refill continuously, then admit iff `tokens >= weight`.
/// Denial subtracts nothing.
pub fn token_bucket_consume(
    state: &mut TokenBucketState,
    now_ms: i64,
    spec: QuotaSpec,
    weight: u32,
) -> AlgoOutcome {
    refill(state, now_ms, spec);

    let allowed = state.tokens >= weight as f64;
    if allowed {
        state.tokens -= weight as f64;
    }

    AlgoOutcome {
        allowed,
        remaining: state.tokens.floor() as u32,
        reset_at_ms: token_bucket_reset_at(state, now_ms, spec, weight),
    }
}

/// Read-only view of the bucket at `now`.
pub fn token_bucket_peek(state: &TokenBucketState, now_ms: i64, spec: QuotaSpec) -> AlgoOutcome {
    let mut projected = *state;
    refill(&mut projected, now_ms, spec);
    AlgoOutcome {
        allowed: projected.tokens >= 1.0,
        remaining: projected.tokens.floor() as u32,
        reset_at_ms: token_bucket_reset_at(&projected, now_ms, spec, 1),
    }
}

/// Time until `weight` tokens are available (now, when they already are).
fn token_bucket_reset_at(
    state: &TokenBucketState,
    now_ms: i64,
    spec: QuotaSpec,
    weight: u32,
) -> i64 {
    let deficit = weight as f64 - state.tokens;
    if deficit <= 0.0 {
        return now_ms;
    }
    let rate_per_ms = spec.max_requests as f64 / (spec.window_seconds as f64 * 1000.0);
    now_ms + (deficit / rate_per_ms).ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: QuotaSpec = QuotaSpec {
        max_requests: 5,
        window_seconds: 60,
    };

    #[test]
    fn test_sliding_window_allows_exactly_max_within_window() {
        let mut state = SlidingWindowState::default();
        let now = 1_000_000;
        for i in 0..5 {
            let out = sliding_window_consume(&mut state, now + i, SPEC, 1);
            assert!(out.allowed, "request {i} should be allowed");
        }
        let out = sliding_window_consume(&mut state, now + 5, SPEC, 1);
        assert!(!out.allowed);
        assert_eq!(out.remaining, 0);
        // Sixth attempt must not have been recorded
        assert_eq!(state.timestamps_ms.len(), 5);
    }

    #[test]
    fn test_sliding_window_full_quota_after_window_elapses() {
        let mut state = SlidingWindowState::default();
        let now = 1_000_000;
        for _ in 0..5 {
            sliding_window_consume(&mut state, now, SPEC, 1);
        }
        let later = now + 60_001;
        let out = sliding_window_consume(&mut state, later, SPEC, 1);
        assert!(out.allowed);
        assert_eq!(out.remaining, 4);
    }

    #[test]
    fn test_sliding_window_denial_reset_at_oldest_plus_window() {
        let mut state = SlidingWindowState::default();
        let now = 1_000_000;
        for i in 0..5 {
            sliding_window_consume(&mut state, now + i * 1000, SPEC, 1);
        }
        let out = sliding_window_consume(&mut state, now + 5000, SPEC, 1);
        assert!(!out.allowed);
        assert_eq!(out.reset_at_ms, now + 60_000);
    }

    #[test]
    fn test_sliding_window_weight_denied_without_partial_insert() {
        let mut state = SlidingWindowState::default();
        let now = 1_000_000;
        for _ in 0..4 {
            sliding_window_consume(&mut state, now, SPEC, 1);
        }
        // Weight 2 with 1 permit left: deny, consume nothing
        let out = sliding_window_consume(&mut state, now + 1, SPEC, 2);
        assert!(!out.allowed);
        assert_eq!(state.timestamps_ms.len(), 4);
        // A weight-1 request still fits
        assert!(sliding_window_consume(&mut state, now + 2, SPEC, 1).allowed);
    }

    #[test]
    fn test_fixed_window_resets_on_rollover() {
        let mut state = FixedWindowState::default();
        let now = 120_000; // aligned to the 60s window
        for _ in 0..5 {
            assert!(fixed_window_consume(&mut state, now + 10, SPEC, 1).allowed);
        }
        assert!(!fixed_window_consume(&mut state, now + 20, SPEC, 1).allowed);

        // Next window: implicit reset
        let out = fixed_window_consume(&mut state, now + 60_000, SPEC, 1);
        assert!(out.allowed);
        assert_eq!(out.remaining, 4);
    }

    #[test]
    fn test_fixed_window_reset_at_is_window_boundary() {
        let mut state = FixedWindowState::default();
        let out = fixed_window_consume(&mut state, 125_000, SPEC, 1);
        assert_eq!(out.reset_at_ms, 180_000);
    }

    #[test]
    fn test_token_bucket_instant_exhaustion() {
        let now = 1_000_000;
        let mut state = TokenBucketState::full(SPEC, now);
        for _ in 0..5 {
            assert!(token_bucket_consume(&mut state, now, SPEC, 1).allowed);
        }
        let out = token_bucket_consume(&mut state, now, SPEC, 1);
        assert!(!out.allowed);
        assert_eq!(out.remaining, 0);
    }

    #[test]
    fn test_token_bucket_refills_one_token_per_window_over_max() {
        let now = 1_000_000;
        let mut state = TokenBucketState::full(SPEC, now);
        for _ in 0..5 {
            token_bucket_consume(&mut state, now, SPEC, 1);
        }
        // W/N = 12s refills exactly one token
        let out = token_bucket_consume(&mut state, now + 12_000, SPEC, 1);
        assert!(out.allowed);
        assert!(!token_bucket_consume(&mut state, now + 12_000, SPEC, 1).allowed);
    }

    #[test]
    fn test_token_bucket_refill_is_continuous_and_capped() {
        let now = 1_000_000;
        let mut state = TokenBucketState::full(SPEC, now);
        token_bucket_consume(&mut state, now, SPEC, 1);
        // Half a refill period: 0.5 tokens back, not a full step
        refill(&mut state, now + 6_000, SPEC);
        assert!((state.tokens - 4.5).abs() < 1e-9);
        // Far future: capped at max
        refill(&mut state, now + 10_000_000, SPEC);
        assert!((state.tokens - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_token_bucket_denial_reset_hint() {
        let now = 1_000_000;
        let mut state = TokenBucketState::full(SPEC, now);
        for _ in 0..5 {
            token_bucket_consume(&mut state, now, SPEC, 1);
        }
        let out = token_bucket_consume(&mut state, now, SPEC, 1);
        assert!(!out.allowed);
        // One token accrues in W/N = 12s
        assert_eq!(out.reset_at_ms, now + 12_000);
    }

    #[test]
    fn test_peeks_do_not_mutate() {
        let now = 1_000_000;

        let mut sw = SlidingWindowState::default();
        sliding_window_consume(&mut sw, now, SPEC, 1);
        let before = sw.clone();
        sliding_window_peek(&sw, now + 10, SPEC);
        assert_eq!(sw, before);

        let mut tb = TokenBucketState::full(SPEC, now);
        token_bucket_consume(&mut tb, now, SPEC, 1);
        let before = tb;
        token_bucket_peek(&tb, now + 10, SPEC);
        assert_eq!(tb, before);
    }
}
