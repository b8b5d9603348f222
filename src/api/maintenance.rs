//! Background maintenance for expiring panel state.
//!
//! Sessions, rate-limit counters and unconfirmed registrations all expire
//! by timestamp and expired rows are invisible to reads, so the sweeper
//! only keeps the tables from growing. Each pass logs what it removed.

use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use super::handlers::auth::{RateLimiter, delete_expired_registrations, delete_expired_sessions};

#[derive(Clone, Copy, Debug)]
pub struct MaintenanceConfig {
    sweep_interval: Duration,
    rate_limit_retention_minutes: i64,
}

impl MaintenanceConfig {
    /// Default: sweep every 10 minutes, drop rate-limit rows idle for an
    /// hour.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sweep_interval: Duration::from_secs(600),
            rate_limit_retention_minutes: 60,
        }
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_rate_limit_retention_minutes(mut self, minutes: i64) -> Self {
        self.rate_limit_retention_minutes = minutes;
        self
    }

    /// Clamp zeroed knobs so a misconfigured sweeper idles instead of
    /// spinning.
    #[must_use]
    pub fn normalize(self) -> Self {
        let sweep_interval = if self.sweep_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            self.sweep_interval
        };
        Self {
            sweep_interval,
            rate_limit_retention_minutes: self.rate_limit_retention_minutes.max(1),
        }
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    #[must_use]
    pub fn rate_limit_retention_minutes(&self) -> i64 {
        self.rate_limit_retention_minutes
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that periodically sweeps expired rows.
pub fn spawn_maintenance_worker(
    pool: PgPool,
    config: MaintenanceConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let limiter = RateLimiter::new(pool.clone());

        loop {
            run_sweep(&pool, &limiter, &config).await;
            sleep(config.sweep_interval()).await;
        }
    })
}

async fn run_sweep(pool: &PgPool, limiter: &RateLimiter, config: &MaintenanceConfig) {
    match delete_expired_sessions(pool).await {
        Ok(0) => {}
        Ok(swept) => info!(swept, "expired sessions removed"),
        Err(err) => error!("session sweep failed: {err}"),
    }

    match limiter.sweep(config.rate_limit_retention_minutes()).await {
        Ok(0) => {}
        Ok(swept) => info!(swept, "stale rate limit rows removed"),
        Err(err) => error!("rate limit sweep failed: {err}"),
    }

    match delete_expired_registrations(pool).await {
        Ok(0) => {}
        Ok(swept) => info!(swept, "expired registrations removed"),
        Err(err) => error!("registration sweep failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_zeroed_knobs() {
        let config = MaintenanceConfig::new()
            .with_sweep_interval_seconds(0)
            .with_rate_limit_retention_minutes(0)
            .normalize();

        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.rate_limit_retention_minutes(), 1);
    }

    #[test]
    fn defaults_survive_normalize() {
        let config = MaintenanceConfig::new().normalize();

        assert_eq!(config.sweep_interval(), Duration::from_secs(600));
        assert_eq!(config.rate_limit_retention_minutes(), 60);
    }
}
