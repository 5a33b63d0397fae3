//! Per-client request rate limiting.
//!
//! Counters live behind [`CounterStore`], implemented by an in-process
//! sliding-window log ([`MemoryStore`]) and by Redis ([`RedisStore`]).
//! A store failure never blocks traffic: the request is let through and the
//! failure is logged.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use redis::{Client, Script, aio::ConnectionManager};
use thiserror::Error;
use tokio::time::Instant;

use crate::{error::AppError, middleware::client::client_key, state::JwtSecret};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of counting one hit against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub count: u64,
    pub reset_after: Duration,
}

#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Current number of hits counted for `key` in its live window.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Counts one hit and reports the total inside the window. Stores may
    /// stop recording hits once `limit` is reached; the reported count is then
    /// `limit + 1`.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowHit, StoreError>;

    async fn reset(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug)]
struct SlidingLog {
    hits: VecDeque<Instant>,
    window: Duration,
}

impl SlidingLog {
    fn prune(&mut self, now: Instant) {
        while let Some(first) = self.hits.front() {
            if now.saturating_duration_since(*first) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn reset_after(&self, now: Instant) -> Duration {
        self.hits
            .front()
            .map(|first| {
                self.window
                    .saturating_sub(now.saturating_duration_since(*first))
            })
            .unwrap_or(self.window)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: DashMap<String, SlidingLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops keys whose window holds no hits any more.
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.logs.len();
        self.logs.retain(|_, log| {
            log.prune(now);
            !log.hits.is_empty()
        });
        before.saturating_sub(self.logs.len())
    }

    pub fn spawn_purger(store: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                store.purge_idle();
            }
        })
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        Ok(self.logs.get_mut(key).map(|mut log| {
            log.prune(now);
            log.hits.len() as u64
        }))
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowHit, StoreError> {
        let now = Instant::now();
        let mut log = self
            .logs
            .entry(key.to_string())
            .or_insert_with(|| SlidingLog {
                hits: VecDeque::new(),
                window,
            });
        log.window = window;
        log.prune(now);

        // Denied hits are not recorded, so the log never grows past `limit`.
        let kept = log.hits.len() as u64;
        if kept < limit {
            log.hits.push_back(now);
        }

        Ok(WindowHit {
            count: kept + 1,
            reset_after: log.reset_after(now),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.logs.remove(key);
        Ok(())
    }
}

// INCR and PEXPIRE run atomically inside the script; the expiry is only set
// by the first hit of a window (or repaired if a key lost its TTL).
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    script: Arc<Script>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            script: Arc::new(Script::new(INCREMENT_SCRIPT)),
        })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        _limit: u64,
    ) -> Result<WindowHit, StoreError> {
        let mut conn = self.conn.clone();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let (count, ttl_ms): (u64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;
        if ttl_ms < 0 {
            return Err(StoreError::Unavailable(format!(
                "key {key} has no expiry after increment"
            )));
        }
        Ok(WindowHit {
            count,
            reset_after: Duration::from_millis(ttl_ms as u64),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub max_requests: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn api(max_requests: u64, window: Duration) -> Self {
        Self {
            name: "api",
            max_requests,
            window,
        }
    }

    /// Login and registration: 10 attempts per 15 minutes.
    pub fn auth() -> Self {
        Self {
            name: "auth",
            max_requests: 10,
            window: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Whole seconds until the window frees a slot, never zero.
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        let secs = if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        secs.max(1)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policy: RateLimitPolicy,
    secret: Option<JwtSecret>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy,
            secret: None,
        }
    }

    /// Keys callers with a valid bearer token by user instead of by address.
    pub fn with_secret(mut self, secret: JwtSecret) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        let key = format!("rl:{}:{}", self.policy.name, identifier);
        let limit = self.policy.max_requests;
        match self
            .store
            .increment(&key, self.policy.window, limit)
            .await
        {
            Ok(hit) => RateLimitDecision {
                allowed: hit.count <= limit,
                limit,
                remaining: limit.saturating_sub(hit.count),
                reset_after: hit.reset_after,
            },
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    policy = self.policy.name,
                    "rate limit store failed, allowing request"
                );
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_after: self.policy.window,
                }
            }
        }
    }
}

pub async fn rate_limit_layer(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let secret = limiter.secret.as_ref().map(|JwtSecret(secret)| secret.as_ref());
    let identifier = client_key(&request, secret);
    let decision = limiter.check(&identifier).await;

    if !decision.allowed {
        tracing::warn!(
            policy = limiter.policy().name,
            client = %identifier,
            uri = %request.uri(),
            "rate limit exceeded"
        );
        let mut response = AppError::TooManyRequests.into_response();
        apply_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(decision.reset_secs()));
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_secs()));
}
