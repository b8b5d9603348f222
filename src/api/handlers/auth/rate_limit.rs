//! Persistent sliding-window rate limiting with progressive blocking.
//!
//! One row per key in `panel_rate_limits`. A probe is a single guarded
//! upsert, so two concurrent probes under the same key can never both slip
//! past the threshold. A live block rejects before the upsert and never
//! touches the row; retrying while blocked cannot extend the block.
//!
//! Scaling: synchronized through `PostgreSQL`, so limits hold across
//! multiple panel instances.

use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::Instrument;

/// Attempt budget for one guarded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: i32,
    pub window_minutes: i64,
    pub block_minutes: i64,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(max_attempts: i32, window_minutes: i64, block_minutes: i64) -> Self {
        Self {
            max_attempts,
            window_minutes,
            block_minutes,
        }
    }

    /// Seconds reported by the probe that trips the threshold.
    #[must_use]
    pub const fn block_seconds(self) -> i64 {
        self.block_minutes * 60
    }
}

/// Outcome of a probe. Being limited is an ordinary outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: i32 },
    Blocked { retry_after_seconds: i64 },
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Counter store unreachable. Callers must fail closed.
    #[error("rate limit store unavailable: {0}")]
    Database(#[from] sqlx::Error),
}

/// Sliding-window limiter with a fixed-duration block per key.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    pool: PgPool,
}

impl RateLimiter {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a probe under `key` and decide whether to admit it.
    ///
    /// A fresh key is admitted with `max_attempts - 1` remaining. The probe
    /// whose post-increment count reaches `max_attempts` installs the block
    /// and is rejected with the full block duration. An expired block, or a
    /// last attempt older than the window, restarts the counter at 1 inside
    /// the same statement.
    pub async fn check(
        &self,
        key: &str,
        policy: RateLimitPolicy,
    ) -> Result<RateLimitDecision, RateLimitError> {
        if let Some(retry_after) = self.active_block(key).await? {
            return Ok(RateLimitDecision::Blocked {
                retry_after_seconds: retry_after,
            });
        }

        let query = r"
            INSERT INTO panel_rate_limits AS rl (key, attempts, last_attempt, blocked_until)
            VALUES ($1, 1, NOW(), CASE WHEN 1 >= $2 THEN NOW() + ($3 * INTERVAL '1 minute') END)
            ON CONFLICT (key) DO UPDATE SET
                attempts = CASE
                    WHEN rl.blocked_until IS NOT NULL THEN 1
                    WHEN rl.last_attempt < NOW() - ($4 * INTERVAL '1 minute') THEN 1
                    ELSE rl.attempts + 1
                END,
                last_attempt = NOW(),
                blocked_until = CASE
                    WHEN (CASE
                        WHEN rl.blocked_until IS NOT NULL THEN 1
                        WHEN rl.last_attempt < NOW() - ($4 * INTERVAL '1 minute') THEN 1
                        ELSE rl.attempts + 1
                    END) >= $2 THEN NOW() + ($3 * INTERVAL '1 minute')
                END
            WHERE rl.blocked_until IS NULL OR rl.blocked_until <= NOW()
            RETURNING attempts, blocked_until IS NOT NULL AS blocked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(policy.max_attempts)
            .bind(policy.block_minutes)
            .bind(policy.window_minutes)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        let Some(row) = row else {
            // The guarded update matched nothing: a concurrent probe
            // installed a block between our two statements.
            let retry_after = self.active_block(key).await?.unwrap_or(1);
            return Ok(RateLimitDecision::Blocked {
                retry_after_seconds: retry_after,
            });
        };

        let attempts: i32 = row.get("attempts");
        let blocked: bool = row.get("blocked");
        Ok(decide(attempts, blocked, policy))
    }

    /// Clear the record for a key (used after a successful login).
    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let query = "DELETE FROM panel_rate_limits WHERE key = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    /// Delete rows idle past the retention horizon. Garbage collection,
    /// not correctness-critical.
    pub async fn sweep(&self, stale_minutes: i64) -> Result<u64, RateLimitError> {
        let query = r"
            DELETE FROM panel_rate_limits
            WHERE COALESCE(blocked_until, last_attempt) < NOW() - ($1 * INTERVAL '1 minute')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(stale_minutes)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }

    /// Remaining seconds of a live block, if any.
    async fn active_block(&self, key: &str) -> Result<Option<i64>, RateLimitError> {
        let query = r"
            SELECT GREATEST(EXTRACT(EPOCH FROM (blocked_until - NOW()))::BIGINT, 1) AS retry_after
            FROM panel_rate_limits
            WHERE key = $1 AND blocked_until > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.map(|row| row.get("retry_after")))
    }
}

/// Map the post-upsert counter state onto a decision.
const fn decide(attempts: i32, blocked: bool, policy: RateLimitPolicy) -> RateLimitDecision {
    if blocked {
        RateLimitDecision::Blocked {
            retry_after_seconds: policy.block_seconds(),
        }
    } else {
        let remaining = policy.max_attempts - attempts;
        RateLimitDecision::Allowed {
            remaining: if remaining > 0 { remaining } else { 0 },
        }
    }
}
