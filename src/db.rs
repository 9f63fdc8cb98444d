//! Database connection and pool management.
//!
//! Initializes a SeaORM connection pool (Postgres in production, SQLite in
//! tests) and applies the schema migrations on startup.

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Database connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Initializes a database connection pool with the given configuration.
///
/// Transient connection failures are retried with exponential backoff, up to
/// five attempts starting at 100ms.
///
/// ```no_run
/// use creditsync::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let options = connect_options(cfg)?;
    let backend = backend_label(&cfg.database_url);
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match Database::connect(options.clone()).await {
            Ok(conn) => {
                log::info!("Connected to {} database (attempt {})", backend, attempt);
                return Ok(conn);
            }
            Err(e) if attempt == MAX_CONNECT_ATTEMPTS => {
                log::error!(
                    "Failed to connect to {} database after {} attempts: {}",
                    backend,
                    MAX_CONNECT_ATTEMPTS,
                    e
                );
                return Err(DatabaseError::ConnectionFailed { source: e }.into());
            }
            Err(e) => {
                log::warn!(
                    "Database connection attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    retry_delay
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
            }
        }
    }

    Err(DatabaseError::ConnectionTimeout {
        timeout_ms: cfg.db_acquire_timeout_ms,
    }
    .into())
}

fn connect_options(cfg: &AppConfig) -> Result<ConnectOptions, DatabaseError> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        });
    }
    if cfg.db_max_connections == 0 {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Pool must allow at least one connection".to_string(),
        });
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600)) // 10 minutes
        .max_lifetime(Duration::from_secs(1800)) // 30 minutes
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    Ok(opt)
}

/// Scheme of the database URL, for logs that must not leak credentials.
fn backend_label(url: &str) -> &str {
    url.split_once(':').map_or("unknown", |(scheme, _)| scheme)
}

/// Applies all pending schema migrations.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("Failed to apply database migrations")?;
    log::info!("Database migrations applied");
    Ok(())
}

/// Health check for the database connection.
///
/// Verifies that the connection is still active by executing `SELECT 1`.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_database_url() {
        let config = AppConfig {
            database_url: String::new(),
            ..Default::default()
        };

        let result = init_pool(&config).await;

        assert!(matches!(
            result.unwrap_err().downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_pool_size_is_rejected() {
        let config = AppConfig {
            db_max_connections: 0,
            ..Default::default()
        };

        let err = init_pool(&config).await.unwrap_err();
        assert!(err.to_string().contains("at least one connection"));
    }

    #[test]
    fn test_backend_label_hides_credentials() {
        assert_eq!(backend_label("postgresql://user:secret@db/creditsync"), "postgresql");
        assert_eq!(backend_label("sqlite::memory:"), "sqlite");
        assert_eq!(backend_label("nonsense"), "unknown");
    }

    #[tokio::test]
    async fn test_sqlite_pool_migrates_and_passes_health_check() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            ..Default::default()
        };

        let db = init_pool(&config).await.unwrap();
        run_migrations(&db).await.unwrap();
        health_check(&db).await.unwrap();
    }
}
