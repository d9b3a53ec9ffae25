//! Rate limiter front end: quota lookup, consume, failure policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use framelab_core::{EndpointType, Error, RateLimitDecision, Result, SubscriptionTier};

use crate::algo::AlgoOutcome;
use crate::config::{FailurePolicy, QuotaSpec, RateLimiterConfig};
use crate::store::{CounterKey, CounterStore};

/// Tier-aware rate limiter over a pluggable counter store.
///
/// Configuration errors (a tier/endpoint pair with no quota entry) and
/// tier gates (quota of zero) surface as errors before the store is ever
/// touched. Store failures are absorbed by the configured
/// [`FailurePolicy`] rather than propagated.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimiterConfig,
    /// Set while the store is failing, so the incident is logged at
    /// ERROR once instead of once per request.
    store_incident: AtomicBool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimiterConfig) -> Self {
        Self {
            store,
            config,
            store_incident: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Look up the quota for a tier/endpoint pair, enforcing the
    /// zero-quota tier gate.
    fn quota(&self, tier: SubscriptionTier, endpoint: EndpointType) -> Result<QuotaSpec> {
        let spec = self.config.limits.get(tier, endpoint).ok_or_else(|| {
            Error::InvalidConfiguration(format!(
                "no rate limit configured for tier={} endpoint={}",
                tier.as_str(),
                endpoint.as_str()
            ))
        })?;
        if spec.max_requests == 0 {
            return Err(Error::FeatureNotAvailable(endpoint.as_str().to_string()));
        }
        Ok(spec)
    }

    /// Check quota and consume `weight` permits if available.
    ///
    /// Returns the decision for both outcomes; a denial consumes nothing.
    pub async fn check_and_consume(
        &self,
        key: &CounterKey,
        tier: SubscriptionTier,
        weight: u32,
    ) -> Result<RateLimitDecision> {
        let spec = self.quota(tier, key.endpoint)?;
        let now = Utc::now();

        match self
            .store
            .consume(key, self.config.algorithm, now, spec, weight)
            .await
        {
            Ok(outcome) => {
                self.note_store_recovered();
                let decision = decision_from(outcome, spec, now);
                debug!(
                    user_id = %key.user_id,
                    endpoint_type = key.endpoint.as_str(),
                    tier = tier.as_str(),
                    algorithm = self.config.algorithm.as_str(),
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit check"
                );
                Ok(decision)
            }
            Err(e) => Ok(self.apply_failure_policy(e, spec, now)),
        }
    }

    /// Check and consume, converting a denial into `Err(QuotaExceeded)`.
    pub async fn enforce(
        &self,
        key: &CounterKey,
        tier: SubscriptionTier,
        weight: u32,
    ) -> Result<RateLimitDecision> {
        let decision = self.check_and_consume(key, tier, weight).await?;
        if !decision.allowed {
            let retry_after = (decision.reset_at - Utc::now()).num_seconds().max(1);
            return Err(Error::QuotaExceeded { retry_after });
        }
        Ok(decision)
    }

    /// Current quota usage without consuming anything.
    pub async fn peek(
        &self,
        key: &CounterKey,
        tier: SubscriptionTier,
    ) -> Result<RateLimitDecision> {
        let spec = self.quota(tier, key.endpoint)?;
        let now = Utc::now();

        match self.store.peek(key, self.config.algorithm, now, spec).await {
            Ok(outcome) => {
                self.note_store_recovered();
                Ok(decision_from(outcome, spec, now))
            }
            Err(e) => Ok(self.apply_failure_policy(e, spec, now)),
        }
    }

    /// Usage across every endpoint category configured for the tier.
    ///
    /// Zero-quota entries are reported as exhausted rather than erroring,
    /// so a status view can show the whole tier matrix.
    pub async fn usage_report(
        &self,
        user_id: uuid::Uuid,
        tier: SubscriptionTier,
    ) -> Result<Vec<(EndpointType, RateLimitDecision)>> {
        let mut report = Vec::new();
        for (endpoint, spec) in self.config.limits.endpoints_for_tier(tier) {
            let now = Utc::now();
            if spec.max_requests == 0 {
                report.push((
                    endpoint,
                    RateLimitDecision {
                        allowed: false,
                        limit: 0,
                        remaining: 0,
                        reset_at: now,
                    },
                ));
                continue;
            }
            let key = CounterKey::new(user_id, endpoint);
            let decision = match self.store.peek(&key, self.config.algorithm, now, spec).await {
                Ok(outcome) => {
                    self.note_store_recovered();
                    decision_from(outcome, spec, now)
                }
                Err(e) => self.apply_failure_policy(e, spec, now),
            };
            report.push((endpoint, decision));
        }
        Ok(report)
    }

    /// Clear a user's counter for one endpoint category.
    pub async fn reset(&self, key: &CounterKey) -> Result<()> {
        self.store.reset(key).await?;
        info!(
            user_id = %key.user_id,
            endpoint_type = key.endpoint.as_str(),
            "Rate limit counter reset"
        );
        Ok(())
    }

    /// Turn a store failure into a decision per the configured policy.
    fn apply_failure_policy(
        &self,
        err: Error,
        spec: QuotaSpec,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        // Log the incident once at ERROR, then stay quiet until recovery.
        if !self.store_incident.swap(true, Ordering::Relaxed) {
            error!(
                error = %err,
                policy = ?self.config.failure_policy,
                "Rate limit store unavailable, applying failure policy"
            );
        }

        match self.config.failure_policy {
            FailurePolicy::FailOpen => RateLimitDecision {
                allowed: true,
                limit: spec.max_requests,
                remaining: spec.max_requests,
                reset_at: now,
            },
            FailurePolicy::FailClosed => RateLimitDecision {
                allowed: false,
                limit: spec.max_requests,
                remaining: 0,
                reset_at: now + chrono::Duration::seconds(spec.window_seconds as i64),
            },
        }
    }

    fn note_store_recovered(&self) {
        if self.store_incident.swap(false, Ordering::Relaxed) {
            warn!("Rate limit store recovered");
        }
    }
}

fn decision_from(outcome: AlgoOutcome, spec: QuotaSpec, now: DateTime<Utc>) -> RateLimitDecision {
    let reset_at = Utc
        .timestamp_millis_opt(outcome.reset_at_ms)
        .single()
        .unwrap_or(now);
    RateLimitDecision {
        allowed: outcome.allowed,
        limit: spec.max_requests,
        remaining: outcome.remaining,
        reset_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCounterStore;
    use async_trait::async_trait;
    use framelab_core::RateLimitAlgorithm;
    use uuid::Uuid;

    fn limiter(policy: FailurePolicy) -> RateLimiter {
        let config = RateLimiterConfig {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            failure_policy: policy,
            limits: crate::config::LimitsTable::defaults(),
        };
        RateLimiter::new(Arc::new(MemoryCounterStore::new()), config)
    }

    #[tokio::test]
    async fn test_consume_decrements_remaining() {
        let limiter = limiter(FailurePolicy::FailOpen);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::GeneralApi);

        let d = limiter
            .check_and_consume(&key, SubscriptionTier::Free, 1)
            .await
            .unwrap();
        assert!(d.allowed);
        assert_eq!(d.limit, 100);
        assert_eq!(d.remaining, 99);
    }

    #[tokio::test]
    async fn test_zero_quota_is_a_tier_gate() {
        let limiter = limiter(FailurePolicy::FailOpen);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::AiCopilot);

        let err = limiter
            .check_and_consume(&key, SubscriptionTier::Free, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FeatureNotAvailable(_)));

        // Same endpoint is live for premium
        let d = limiter
            .check_and_consume(&key, SubscriptionTier::Premium, 1)
            .await
            .unwrap();
        assert!(d.allowed);
    }

    #[tokio::test]
    async fn test_missing_table_entry_is_configuration_error() {
        let config = RateLimiterConfig {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            failure_policy: FailurePolicy::FailOpen,
            limits: crate::config::LimitsTable::empty(),
        };
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), config);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::GeneralApi);

        let err = limiter
            .check_and_consume(&key, SubscriptionTier::Free, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_enforce_returns_quota_exceeded_with_retry_hint() {
        let mut config = RateLimiterConfig {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            failure_policy: FailurePolicy::FailOpen,
            limits: crate::config::LimitsTable::empty(),
        };
        config.limits.set(
            SubscriptionTier::Free,
            EndpointType::GeneralApi,
            QuotaSpec::new(2, 3600),
        );
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), config);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::GeneralApi);

        limiter.enforce(&key, SubscriptionTier::Free, 1).await.unwrap();
        limiter.enforce(&key, SubscriptionTier::Free, 1).await.unwrap();
        let err = limiter
            .enforce(&key, SubscriptionTier::Free, 1)
            .await
            .unwrap_err();
        match err {
            Error::QuotaExceeded { retry_after } => {
                assert!(retry_after >= 1 && retry_after <= 3600);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let limiter = limiter(FailurePolicy::FailOpen);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::GeneralApi);

        limiter
            .check_and_consume(&key, SubscriptionTier::Free, 1)
            .await
            .unwrap();
        for _ in 0..3 {
            let d = limiter.peek(&key, SubscriptionTier::Free).await.unwrap();
            assert_eq!(d.remaining, 99);
        }
    }

    #[tokio::test]
    async fn test_usage_report_covers_full_tier_matrix() {
        let limiter = limiter(FailurePolicy::FailOpen);
        let user = Uuid::new_v4();

        let report = limiter
            .usage_report(user, SubscriptionTier::Free)
            .await
            .unwrap();
        assert_eq!(report.len(), 3);
        let copilot = report
            .iter()
            .find(|(e, _)| *e == EndpointType::AiCopilot)
            .unwrap();
        assert_eq!(copilot.1.limit, 0);
        assert!(!copilot.1.allowed);
    }

    #[tokio::test]
    async fn test_reset_restores_full_quota() {
        let limiter = limiter(FailurePolicy::FailOpen);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::GeneralApi);

        for _ in 0..10 {
            limiter
                .check_and_consume(&key, SubscriptionTier::Free, 1)
                .await
                .unwrap();
        }
        limiter.reset(&key).await.unwrap();
        let d = limiter.peek(&key, SubscriptionTier::Free).await.unwrap();
        assert_eq!(d.remaining, 100);
    }

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn consume(
            &self,
            _key: &CounterKey,
            _algorithm: RateLimitAlgorithm,
            _now: DateTime<Utc>,
            _spec: QuotaSpec,
            _weight: u32,
        ) -> Result<AlgoOutcome> {
            Err(Error::Store("connection refused".into()))
        }

        async fn peek(
            &self,
            _key: &CounterKey,
            _algorithm: RateLimitAlgorithm,
            _now: DateTime<Utc>,
            _spec: QuotaSpec,
        ) -> Result<AlgoOutcome> {
            Err(Error::Store("connection refused".into()))
        }

        async fn reset(&self, _key: &CounterKey) -> Result<()> {
            Err(Error::Store("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_fail_open_admits_when_store_is_down() {
        let config = RateLimiterConfig {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            failure_policy: FailurePolicy::FailOpen,
            limits: crate::config::LimitsTable::defaults(),
        };
        let limiter = RateLimiter::new(Arc::new(FailingStore), config);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::GeneralApi);

        let d = limiter
            .check_and_consume(&key, SubscriptionTier::Free, 1)
            .await
            .unwrap();
        assert!(d.allowed);
    }

    #[tokio::test]
    async fn test_fail_closed_denies_when_store_is_down() {
        let config = RateLimiterConfig {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            failure_policy: FailurePolicy::FailClosed,
            limits: crate::config::LimitsTable::defaults(),
        };
        let limiter = RateLimiter::new(Arc::new(FailingStore), config);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::GeneralApi);

        let d = limiter
            .check_and_consume(&key, SubscriptionTier::Free, 1)
            .await
            .unwrap();
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);

        // Tier gates still apply before the store is consulted
        let gated = CounterKey::new(key.user_id, EndpointType::AiCopilot);
        let err = limiter
            .check_and_consume(&gated, SubscriptionTier::Free, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FeatureNotAvailable(_)));
    }

    #[tokio::test]
    async fn test_store_failure_does_not_surface_on_reset_policy_paths() {
        // reset is an admin operation: store errors propagate there
        let config = RateLimiterConfig {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            failure_policy: FailurePolicy::FailOpen,
            limits: crate::config::LimitsTable::defaults(),
        };
        let limiter = RateLimiter::new(Arc::new(FailingStore), config);
        let key = CounterKey::new(Uuid::new_v4(), EndpointType::GeneralApi);
        assert!(limiter.reset(&key).await.is_err());
    }
}
