//! Rate limit configuration: per-tier quota tables and failure policy.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use framelab_core::{EndpointType, Error, RateLimitAlgorithm, Result, SubscriptionTier};

/// Quota for one tier + endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSpec {
    /// Maximum granted permits per window. Zero means the endpoint
    /// category is not available at this tier.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_seconds: u64,
}

impl QuotaSpec {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Quota table keyed by subscription tier and endpoint category.
#[derive(Debug, Clone)]
pub struct LimitsTable {
    entries: HashMap<(SubscriptionTier, EndpointType), QuotaSpec>,
}

impl LimitsTable {
    /// Empty table (every lookup fails with `InvalidConfiguration`).
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Built-in defaults matching the product's tier matrix:
    ///
    /// | tier    | general_api | ai_copilot | output_generation |
    /// |---------|-------------|------------|-------------------|
    /// | free    | 100/hour    | disabled   | disabled          |
    /// | premium | 1000/hour   | 50/hour    | 20/day            |
    pub fn defaults() -> Self {
        use EndpointType::*;
        use SubscriptionTier::*;

        let mut entries = HashMap::new();
        entries.insert((Free, GeneralApi), QuotaSpec::new(100, 3600));
        entries.insert((Free, AiCopilot), QuotaSpec::new(0, 3600));
        entries.insert((Free, OutputGeneration), QuotaSpec::new(0, 86400));
        entries.insert((Premium, GeneralApi), QuotaSpec::new(1000, 3600));
        entries.insert((Premium, AiCopilot), QuotaSpec::new(50, 3600));
        entries.insert((Premium, OutputGeneration), QuotaSpec::new(20, 86400));
        Self { entries }
    }

    pub fn get(&self, tier: SubscriptionTier, endpoint: EndpointType) -> Option<QuotaSpec> {
        self.entries.get(&(tier, endpoint)).copied()
    }

    pub fn set(&mut self, tier: SubscriptionTier, endpoint: EndpointType, spec: QuotaSpec) {
        self.entries.insert((tier, endpoint), spec);
    }

    /// All configured endpoint categories for a tier.
    pub fn endpoints_for_tier(
        &self,
        tier: SubscriptionTier,
    ) -> Vec<(EndpointType, QuotaSpec)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|((t, _), _)| *t == tier)
            .map(|((_, e), spec)| (*e, *spec))
            .collect();
        out.sort_by_key(|(e, _)| e.as_str());
        out
    }
}

impl Default for LimitsTable {
    fn default() -> Self {
        Self::defaults()
    }
}

/// What the limiter does when the counter store is unreachable.
///
/// There is deliberately no implicit default: deployments must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit requests while the store is down.
    FailOpen,
    /// Deny requests while the store is down.
    FailClosed,
}

/// Top-level limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub algorithm: RateLimitAlgorithm,
    pub failure_policy: FailurePolicy,
    pub limits: LimitsTable,
}

impl RateLimiterConfig {
    pub fn new(algorithm: RateLimitAlgorithm, failure_policy: FailurePolicy) -> Self {
        Self {
            algorithm,
            failure_policy,
            limits: LimitsTable::defaults(),
        }
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RATE_LIMIT_ALGORITHM` | `sliding_window` | `sliding_window`, `fixed_window`, or `token_bucket` |
    /// | `RATE_LIMIT_FAILURE_POLICY` | `fail_open` | `fail_open` or `fail_closed` |
    pub fn from_env() -> Result<Self> {
        let algorithm = match std::env::var("RATE_LIMIT_ALGORITHM").as_deref() {
            Ok("sliding_window") | Err(_) => RateLimitAlgorithm::SlidingWindow,
            Ok("fixed_window") => RateLimitAlgorithm::FixedWindow,
            Ok("token_bucket") => RateLimitAlgorithm::TokenBucket,
            Ok(other) => {
                return Err(Error::Config(format!(
                    "unknown RATE_LIMIT_ALGORITHM: {other}"
                )))
            }
        };

        let failure_policy = match std::env::var("RATE_LIMIT_FAILURE_POLICY").as_deref() {
            Ok("fail_open") | Err(_) => FailurePolicy::FailOpen,
            Ok("fail_closed") => FailurePolicy::FailClosed,
            Ok(other) => {
                return Err(Error::Config(format!(
                    "unknown RATE_LIMIT_FAILURE_POLICY: {other}"
                )))
            }
        };

        Ok(Self {
            algorithm,
            failure_policy,
            limits: LimitsTable::defaults(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_matches_tier_matrix() {
        let table = LimitsTable::defaults();
        assert_eq!(
            table.get(SubscriptionTier::Free, EndpointType::GeneralApi),
            Some(QuotaSpec::new(100, 3600))
        );
        assert_eq!(
            table
                .get(SubscriptionTier::Free, EndpointType::AiCopilot)
                .unwrap()
                .max_requests,
            0
        );
        assert_eq!(
            table.get(SubscriptionTier::Premium, EndpointType::OutputGeneration),
            Some(QuotaSpec::new(20, 86400))
        );
    }

    #[test]
    fn test_endpoints_for_tier_sorted_and_complete() {
        let table = LimitsTable::defaults();
        let free = table.endpoints_for_tier(SubscriptionTier::Free);
        assert_eq!(free.len(), 3);
        assert_eq!(free[0].0, EndpointType::AiCopilot);
    }

    #[test]
    fn test_empty_table_has_no_entries() {
        let table = LimitsTable::empty();
        assert_eq!(
            table.get(SubscriptionTier::Free, EndpointType::GeneralApi),
            None
        );
    }
}
