//! In-memory counter store for tests and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use framelab_core::{RateLimitAlgorithm, Result};

use crate::algo::{
    fixed_window_consume, fixed_window_peek, sliding_window_consume, sliding_window_peek,
    token_bucket_consume, token_bucket_peek, AlgoOutcome, FixedWindowState, SlidingWindowState,
    TokenBucketState,
};
use crate::config::QuotaSpec;
use crate::store::{CounterKey, CounterStore};

enum AlgoState {
    Sliding(SlidingWindowState),
    Fixed(FixedWindowState),
    Bucket(TokenBucketState),
}

/// Counter store holding all state in process memory.
///
/// The single mutex makes every consume an atomic transition, mirroring
/// the atomicity the Redis store gets from server-side scripts.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, AlgoState>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn consume(
        &self,
        key: &CounterKey,
        algorithm: RateLimitAlgorithm,
        now: DateTime<Utc>,
        spec: QuotaSpec,
        weight: u32,
    ) -> Result<AlgoOutcome> {
        let now_ms = now.timestamp_millis();
        let storage_key = key.storage_key(algorithm);
        let mut entries = self.entries.lock().await;

        let outcome = match algorithm {
            RateLimitAlgorithm::SlidingWindow => {
                let state = match entries
                    .entry(storage_key)
                    .or_insert_with(|| AlgoState::Sliding(SlidingWindowState::default()))
                {
                    AlgoState::Sliding(s) => s,
                    _ => unreachable!("state keyed by algorithm"),
                };
                sliding_window_consume(state, now_ms, spec, weight)
            }
            RateLimitAlgorithm::FixedWindow => {
                let state = match entries
                    .entry(storage_key)
                    .or_insert_with(|| AlgoState::Fixed(FixedWindowState::default()))
                {
                    AlgoState::Fixed(s) => s,
                    _ => unreachable!("state keyed by algorithm"),
                };
                fixed_window_consume(state, now_ms, spec, weight)
            }
            RateLimitAlgorithm::TokenBucket => {
                let state = match entries
                    .entry(storage_key)
                    .or_insert_with(|| AlgoState::Bucket(TokenBucketState::full(spec, now_ms)))
                {
                    AlgoState::Bucket(s) => s,
                    _ => unreachable!("state keyed by algorithm"),
                };
                token_bucket_consume(state, now_ms, spec, weight)
            }
        };

        Ok(outcome)
    }

    async fn peek(
        &self,
        key: &CounterKey,
        algorithm: RateLimitAlgorithm,
        now: DateTime<Utc>,
        spec: QuotaSpec,
    ) -> Result<AlgoOutcome> {
        let now_ms = now.timestamp_millis();
        let storage_key = key.storage_key(algorithm);
        let entries = self.entries.lock().await;

        let outcome = match (algorithm, entries.get(&storage_key)) {
            (RateLimitAlgorithm::SlidingWindow, Some(AlgoState::Sliding(s))) => {
                sliding_window_peek(s, now_ms, spec)
            }
            (RateLimitAlgorithm::FixedWindow, Some(AlgoState::Fixed(s))) => {
                fixed_window_peek(s, now_ms, spec)
            }
            (RateLimitAlgorithm::TokenBucket, Some(AlgoState::Bucket(s))) => {
                token_bucket_peek(s, now_ms, spec)
            }
            // No state yet: full quota
            _ => AlgoOutcome {
                allowed: spec.max_requests > 0,
                remaining: spec.max_requests,
                reset_at_ms: now_ms,
            },
        };

        Ok(outcome)
    }

    async fn reset(&self, key: &CounterKey) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for algorithm in [
            RateLimitAlgorithm::SlidingWindow,
            RateLimitAlgorithm::FixedWindow,
            RateLimitAlgorithm::TokenBucket,
        ] {
            entries.remove(&key.storage_key(algorithm));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn key() -> CounterKey {
        CounterKey::new(Uuid::new_v4(), framelab_core::EndpointType::GeneralApi)
    }

    #[tokio::test]
    async fn test_consume_then_peek_sees_same_remaining() {
        let store = MemoryCounterStore::new();
        let key = key();
        let spec = QuotaSpec::new(10, 60);
        let now = Utc::now();

        store
            .consume(&key, RateLimitAlgorithm::SlidingWindow, now, spec, 3)
            .await
            .unwrap();
        let peeked = store
            .peek(&key, RateLimitAlgorithm::SlidingWindow, now, spec)
            .await
            .unwrap();
        assert_eq!(peeked.remaining, 7);
    }

    #[tokio::test]
    async fn test_reset_clears_all_algorithms() {
        let store = MemoryCounterStore::new();
        let key = key();
        let spec = QuotaSpec::new(2, 60);
        let now = Utc::now();

        for algorithm in [
            RateLimitAlgorithm::SlidingWindow,
            RateLimitAlgorithm::FixedWindow,
            RateLimitAlgorithm::TokenBucket,
        ] {
            store.consume(&key, algorithm, now, spec, 2).await.unwrap();
            assert!(!store.consume(&key, algorithm, now, spec, 1).await.unwrap().allowed);
        }

        store.reset(&key).await.unwrap();

        for algorithm in [
            RateLimitAlgorithm::SlidingWindow,
            RateLimitAlgorithm::FixedWindow,
            RateLimitAlgorithm::TokenBucket,
        ] {
            assert!(store.consume(&key, algorithm, now, spec, 1).await.unwrap().allowed);
        }
    }

    #[tokio::test]
    async fn test_peek_on_untouched_key_reports_full_quota() {
        let store = MemoryCounterStore::new();
        let spec = QuotaSpec::new(10, 60);
        let out = store
            .peek(&key(), RateLimitAlgorithm::TokenBucket, Utc::now(), spec)
            .await
            .unwrap();
        assert_eq!(out.remaining, 10);
        assert!(out.allowed);
    }
}
