//! Counter store abstraction for rate limit state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use framelab_core::{EndpointType, RateLimitAlgorithm, Result};

use crate::algo::AlgoOutcome;
use crate::config::QuotaSpec;

/// Key prefix shared by all rate limit entries.
pub const KEY_PREFIX: &str = "fl:rl";

/// Identity of one rate limit counter: (user, endpoint category).
///
/// The algorithm's representation suffix is appended by the store, so a
/// `reset` can clear every representation of the same logical counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub user_id: Uuid,
    pub endpoint: EndpointType,
}

impl CounterKey {
    pub fn new(user_id: Uuid, endpoint: EndpointType) -> Self {
        Self { user_id, endpoint }
    }

    /// Storage key for one algorithm's state.
    pub fn storage_key(&self, algorithm: RateLimitAlgorithm) -> String {
        format!(
            "{}:{}:{}:{}",
            KEY_PREFIX,
            self.user_id,
            self.endpoint.as_str(),
            algorithm.as_str()
        )
    }
}

/// Backing store for rate limit counters.
///
/// `consume` must be atomic with respect to concurrent calls for the same
/// key: prune + count + insert (or read + increment, or refill + subtract)
/// happens as one indivisible operation, never as separate read/write
/// round trips.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Run one consume transition. Denial consumes nothing.
    async fn consume(
        &self,
        key: &CounterKey,
        algorithm: RateLimitAlgorithm,
        now: DateTime<Utc>,
        spec: QuotaSpec,
        weight: u32,
    ) -> Result<AlgoOutcome>;

    /// Inspect the counter without mutating any state.
    async fn peek(
        &self,
        key: &CounterKey,
        algorithm: RateLimitAlgorithm,
        now: DateTime<Utc>,
        spec: QuotaSpec,
    ) -> Result<AlgoOutcome>;

    /// Clear every algorithm representation of the counter.
    async fn reset(&self, key: &CounterKey) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_shape() {
        let id = Uuid::nil();
        let key = CounterKey::new(id, EndpointType::AiCopilot);
        assert_eq!(
            key.storage_key(RateLimitAlgorithm::TokenBucket),
            format!("fl:rl:{id}:ai_copilot:token_bucket")
        );
    }
}
