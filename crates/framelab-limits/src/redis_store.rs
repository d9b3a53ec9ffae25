//! Redis-backed counter store.
//!
//! Every consume runs as a single server-side Lua script, so the prune +
//! count + insert (or read + increment, or refill + subtract) transition
//! is atomic across concurrent API instances. The scripts implement the
//! same transitions as the synchronous functions in [`crate::algo`];
//! those functions are the behavioral reference and carry the tests.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::sync::RwLock;
use tracing::{info, warn};

use framelab_core::{Error, RateLimitAlgorithm, Result};

use crate::algo::AlgoOutcome;
use crate::config::QuotaSpec;
use crate::store::{CounterKey, CounterStore};

/// Prune expired members, admit iff count + weight <= max, record the
/// admitted permits. A side counter provides unique member names for
/// permits landing on the same millisecond.
const SLIDING_CONSUME: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
local weight = tonumber(ARGV[4])

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
local allowed = 0
if count + weight <= max then
  allowed = 1
  for i = 1, weight do
    local seq = redis.call('INCR', KEYS[2])
    redis.call('ZADD', KEYS[1], now, now .. '-' .. seq)
  end
  count = count + weight
end

local reset = now
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if oldest[2] then
  reset = tonumber(oldest[2]) + window
end
redis.call('PEXPIRE', KEYS[1], window)
redis.call('PEXPIRE', KEYS[2], window)
return {allowed, math.max(max - count, 0), reset}
"#;

const SLIDING_PEEK: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])

local live = redis.call('ZCOUNT', KEYS[1], '(' .. (now - window), '+inf')
local reset = now
local oldest = redis.call('ZRANGEBYSCORE', KEYS[1], '(' .. (now - window), '+inf', 'LIMIT', 0, 1, 'WITHSCORES')
if oldest[2] then
  reset = tonumber(oldest[2]) + window
end
local allowed = 0
if live < max then allowed = 1 end
return {allowed, math.max(max - live, 0), reset}
"#;

/// Hash of {ws, count}; rolls the counter into the aligned window
/// containing now before admitting.
const FIXED_CONSUME: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
local weight = tonumber(ARGV[4])

local start = now - (now % window)
local ws = tonumber(redis.call('HGET', KEYS[1], 'ws') or '-1')
local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
if ws ~= start then
  count = 0
end

local allowed = 0
if count + weight <= max then
  allowed = 1
  count = count + weight
end
redis.call('HSET', KEYS[1], 'ws', start, 'count', count)
redis.call('PEXPIRE', KEYS[1], window)
return {allowed, math.max(max - count, 0), start + window}
"#;

const FIXED_PEEK: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])

local start = now - (now % window)
local ws = tonumber(redis.call('HGET', KEYS[1], 'ws') or '-1')
local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
if ws ~= start then
  count = 0
end
local allowed = 0
if count < max then allowed = 1 end
return {allowed, math.max(max - count, 0), start + window}
"#;

/// Hash of {tokens, ts}; continuous refill capped at max. An absent key
/// means an untouched bucket, which starts full.
const BUCKET_CONSUME: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
local weight = tonumber(ARGV[4])

local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens') or tostring(max))
local ts = tonumber(redis.call('HGET', KEYS[1], 'ts') or tostring(now))
local rate = max / window
local elapsed = now - ts
if elapsed < 0 then elapsed = 0 end
tokens = math.min(tokens + elapsed * rate, max)

local allowed = 0
if tokens >= weight then
  allowed = 1
  tokens = tokens - weight
end
redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'ts', now)
redis.call('PEXPIRE', KEYS[1], window * 2)

local reset = now
if tokens < weight then
  reset = now + math.ceil((weight - tokens) / rate)
end
return {allowed, math.floor(tokens), reset}
"#;

const BUCKET_PEEK: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])

local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens') or tostring(max))
local ts = tonumber(redis.call('HGET', KEYS[1], 'ts') or tostring(now))
local rate = max / window
local elapsed = now - ts
if elapsed < 0 then elapsed = 0 end
tokens = math.min(tokens + elapsed * rate, max)

local allowed = 0
if tokens >= 1 then allowed = 1 end
local reset = now
if tokens < 1 then
  reset = now + math.ceil((1 - tokens) / rate)
end
return {allowed, math.floor(tokens), reset}
"#;

/// Counter store backed by Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    inner: Arc<RedisCounterStoreInner>,
}

struct RedisCounterStoreInner {
    /// Redis connection manager (None if the initial connect failed).
    connection: RwLock<Option<ConnectionManager>>,
    consume_sliding: Script,
    consume_fixed: Script,
    consume_bucket: Script,
    peek_sliding: Script,
    peek_fixed: Script,
    peek_bucket: Script,
}

impl RedisCounterStore {
    fn with_connection(connection: Option<ConnectionManager>) -> Self {
        Self {
            inner: Arc::new(RedisCounterStoreInner {
                connection: RwLock::new(connection),
                consume_sliding: Script::new(SLIDING_CONSUME),
                consume_fixed: Script::new(FIXED_CONSUME),
                consume_bucket: Script::new(BUCKET_CONSUME),
                peek_sliding: Script::new(SLIDING_PEEK),
                peek_fixed: Script::new(FIXED_PEEK),
                peek_bucket: Script::new(BUCKET_PEEK),
            }),
        }
    }

    /// Connect to Redis at the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::Store(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        info!("Rate limit counter store connected to Redis");
        Ok(Self::with_connection(Some(connection)))
    }

    /// Create a store from environment configuration.
    ///
    /// Reads `REDIS_URL` (default: redis://localhost:6379). If the initial
    /// connection fails the store is created disconnected; every operation
    /// then errors and the limiter's failure policy decides the outcome.
    pub async fn from_env() -> Self {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        match Self::connect(&url).await {
            Ok(store) => store,
            Err(e) => {
                warn!("Failed to connect to Redis for rate limiting: {}", e);
                Self::with_connection(None)
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.connection.read().await.is_some()
    }

    fn consume_script(&self, algorithm: RateLimitAlgorithm) -> &Script {
        match algorithm {
            RateLimitAlgorithm::SlidingWindow => &self.inner.consume_sliding,
            RateLimitAlgorithm::FixedWindow => &self.inner.consume_fixed,
            RateLimitAlgorithm::TokenBucket => &self.inner.consume_bucket,
        }
    }

    fn peek_script(&self, algorithm: RateLimitAlgorithm) -> &Script {
        match algorithm {
            RateLimitAlgorithm::SlidingWindow => &self.inner.peek_sliding,
            RateLimitAlgorithm::FixedWindow => &self.inner.peek_fixed,
            RateLimitAlgorithm::TokenBucket => &self.inner.peek_bucket,
        }
    }

    /// Unique-member counter key used by the sliding window script.
    fn seq_key(key: &CounterKey) -> String {
        format!("{}:seq", key.storage_key(RateLimitAlgorithm::SlidingWindow))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn consume(
        &self,
        key: &CounterKey,
        algorithm: RateLimitAlgorithm,
        now: DateTime<Utc>,
        spec: QuotaSpec,
        weight: u32,
    ) -> Result<AlgoOutcome> {
        let mut conn_guard = self.inner.connection.write().await;
        let conn = conn_guard
            .as_mut()
            .ok_or_else(|| Error::Store("redis not connected".into()))?;

        let mut invocation = self.consume_script(algorithm).prepare_invoke();
        invocation.key(key.storage_key(algorithm));
        if algorithm == RateLimitAlgorithm::SlidingWindow {
            invocation.key(Self::seq_key(key));
        }
        let (allowed, remaining, reset_at_ms): (i64, i64, i64) = invocation
            .arg(now.timestamp_millis())
            .arg(spec.window_seconds as i64 * 1000)
            .arg(spec.max_requests)
            .arg(weight)
            .invoke_async(conn)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        Ok(AlgoOutcome {
            allowed: allowed == 1,
            remaining: remaining.max(0) as u32,
            reset_at_ms,
        })
    }

    async fn peek(
        &self,
        key: &CounterKey,
        algorithm: RateLimitAlgorithm,
        now: DateTime<Utc>,
        spec: QuotaSpec,
    ) -> Result<AlgoOutcome> {
        let mut conn_guard = self.inner.connection.write().await;
        let conn = conn_guard
            .as_mut()
            .ok_or_else(|| Error::Store("redis not connected".into()))?;

        let (allowed, remaining, reset_at_ms): (i64, i64, i64) = self
            .peek_script(algorithm)
            .prepare_invoke()
            .key(key.storage_key(algorithm))
            .arg(now.timestamp_millis())
            .arg(spec.window_seconds as i64 * 1000)
            .arg(spec.max_requests)
            .invoke_async(conn)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        Ok(AlgoOutcome {
            allowed: allowed == 1,
            remaining: remaining.max(0) as u32,
            reset_at_ms,
        })
    }

    async fn reset(&self, key: &CounterKey) -> Result<()> {
        let mut conn_guard = self.inner.connection.write().await;
        let conn = conn_guard
            .as_mut()
            .ok_or_else(|| Error::Store("redis not connected".into()))?;

        let keys = vec![
            key.storage_key(RateLimitAlgorithm::SlidingWindow),
            Self::seq_key(key),
            key.storage_key(RateLimitAlgorithm::FixedWindow),
            key.storage_key(RateLimitAlgorithm::TokenBucket),
        ];
        redis::cmd("DEL")
            .arg(&keys)
            .query_async::<()>(conn)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }
}
