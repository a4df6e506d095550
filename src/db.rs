//! Database pool setup for the Fleetsync API.
//!
//! Builds the SeaORM connection pool against Postgres, retrying transient
//! startup failures, and exposes the trivial-query health check behind the
//! readiness endpoint.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Initializes the connection pool, retrying transient failures with
/// exponential backoff.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut options = ConnectOptions::new(&cfg.database_url);
    options
        .max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    connect_with_retry(options).await
}

async fn connect_with_retry(options: ConnectOptions) -> Result<DatabaseConnection> {
    let mut backoff = Duration::from_millis(100);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match Database::connect(options.clone()).await {
            Ok(pool) => {
                tracing::info!(attempt, "connected to database");
                return Ok(pool);
            }
            Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                tracing::warn!(attempt, error = %e, retry_in = ?backoff, "database connection failed, retrying");
                sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                tracing::error!(attempts = MAX_CONNECT_ATTEMPTS, error = %e, "giving up on database connection");
                return Err(DatabaseError::ConnectionFailed { source: e }.into());
            }
        }
    }
}

/// Verifies the pool is still usable by running a trivial query.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let probe = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(probe)
        .await
        .context("Database health check failed")?;
    Ok(())
}
