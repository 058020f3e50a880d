//! Shared, cross-process RPM/TPM budget per vision model (spec §4.11).
//!
//! Grounded on `monokrome-foiacquire/src/rate_limit/redis.rs`'s
//! `RedisRateLimitBackend`: atomic Lua scripts against Redis so multiple
//! worker processes share one budget, with TTL-based window reset instead
//! of caller-side compare-and-reset.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Script;
use thiserror::Error;

const KEY_PREFIX: &str = "greffier:ratelimit:";
const WINDOW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit backend error: {0}")]
    Backend(String),
    #[error("cancelled while waiting for rate limit permit")]
    Cancelled,
}

pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// An in-flight reservation against the active-calls gauge (spec §4.11).
/// Dropping it without calling [`RateLimiter::release`] still decrements
/// the gauge — spawned as a best-effort background task, since `Drop` has
/// no async context — so a cancelled caller can't leak a reservation.
pub struct Permit {
    model: String,
    released: bool,
    conn: ConnectionManager,
}

/// One shared counter set per vision model, backed by Redis atomic
/// increment-and-expire (spec §4.11).
pub struct RateLimiter {
    conn: ConnectionManager,
}

impl RateLimiter {
    pub async fn connect(redis_url: &str) -> RateLimitResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }

    fn requests_key(model: &str) -> String {
        format!("{KEY_PREFIX}{model}:requests")
    }
    fn tokens_key(model: &str) -> String {
        format!("{KEY_PREFIX}{model}:tokens")
    }
    fn active_key(model: &str) -> String {
        format!("{KEY_PREFIX}{model}:active")
    }

    /// Blocks (sleeping until the next minute boundary and retrying) until
    /// the request-count and estimated-token budget both fit (spec §4.11
    /// "atomically checks ... If the check fails, the caller sleeps until
    /// the next minute boundary and retries").
    pub async fn acquire(
        &self,
        model: &str,
        token_estimate: u32,
        rpm_limit: u32,
        tpm_limit: u32,
    ) -> RateLimitResult<Permit> {
        let script = Script::new(
            r#"
            local req_key = KEYS[1]
            local tok_key = KEYS[2]
            local estimate = tonumber(ARGV[1])
            local rpm_limit = tonumber(ARGV[2])
            local tpm_limit = tonumber(ARGV[3])
            local window = tonumber(ARGV[4])

            local requests = tonumber(redis.call('GET', req_key)) or 0
            local tokens = tonumber(redis.call('GET', tok_key)) or 0

            if requests + 1 > rpm_limit or tokens + estimate > tpm_limit then
                return 0
            end

            redis.call('INCR', req_key)
            redis.call('EXPIRE', req_key, window)
            redis.call('INCRBY', tok_key, estimate)
            redis.call('EXPIRE', tok_key, window)
            return 1
            "#,
        );

        let mut conn = self.conn.clone();
        loop {
            let req_key = Self::requests_key(model);
            let tok_key = Self::tokens_key(model);

            let granted: i64 = script
                .key(&req_key)
                .key(&tok_key)
                .arg(token_estimate)
                .arg(rpm_limit)
                .arg(tpm_limit)
                .arg(WINDOW_SECS)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| RateLimitError::Backend(e.to_string()))?;

            if granted == 1 {
                let _: () = redis::cmd("INCR")
                    .arg(Self::active_key(model))
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| RateLimitError::Backend(e.to_string()))?;
                return Ok(Permit {
                    model: model.to_string(),
                    released: false,
                    conn: conn.clone(),
                });
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Reconciles the estimated token reservation with the measured actual
    /// usage and decrements the active-calls gauge (spec §4.11).
    pub async fn release(&self, mut permit: Permit, actual_tokens: u32, estimate: u32) -> RateLimitResult<()> {
        let mut conn = self.conn.clone();
        let model = permit.model.clone();

        if actual_tokens != estimate {
            let delta = actual_tokens as i64 - estimate as i64;
            let _: () = redis::cmd("INCRBY")
                .arg(Self::tokens_key(&model))
                .arg(delta)
                .query_async(&mut conn)
                .await
                .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        }

        let _: () = redis::cmd("DECR")
            .arg(Self::active_key(&model))
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        permit.released = true;
        Ok(())
    }

    pub async fn active_calls(&self, model: &str) -> RateLimitResult<u32> {
        let mut conn = self.conn.clone();
        let n: Option<i64> = redis::AsyncCommands::get(&mut conn, Self::active_key(model))
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;
        Ok(n.unwrap_or(0).max(0) as u32)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(model = %self.model, "rate limit permit dropped without release, decrementing active gauge");
        let mut conn = self.conn.clone();
        let key = RateLimiter::active_key(&self.model);
        tokio::spawn(async move {
            let _: Result<(), _> = redis::cmd("DECR").arg(key).query_async::<()>(&mut conn).await;
        });
    }
}
