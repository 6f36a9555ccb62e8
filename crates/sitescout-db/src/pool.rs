//! PostgreSQL pool setup.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use sitescout_core::{Error, Result};

/// Sizing and timeouts for the shared pool.
///
/// The job worker holds at most one connection at a time, so the API
/// request load dominates sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Wait for a free connection before failing the query.
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(15),
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

impl PoolConfig {
    /// Environment variables:
    /// - `DATABASE_MAX_CONNECTIONS` (default: 8)
    /// - `DATABASE_MIN_CONNECTIONS` (default: 1)
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS` (default: 15)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_connections = env_u64("DATABASE_MAX_CONNECTIONS")
            .map(|n| n as u32)
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);
        let min_connections = env_u64("DATABASE_MIN_CONNECTIONS")
            .map(|n| n as u32)
            .unwrap_or(defaults.min_connections)
            .min(max_connections);
        let acquire_timeout = env_u64("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.acquire_timeout);

        Self {
            max_connections,
            min_connections,
            acquire_timeout,
            ..defaults
        }
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Open a pool and check out one connection to prove the URL works.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}
