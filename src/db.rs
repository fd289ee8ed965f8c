use crate::config::AppConfig;
use metrics::{counter, gauge, histogram};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Database metrics tracking prefix
const METRICS_PREFIX: &str = "stockledger_db";

/// Configuration for database connections
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Maximum idle time before a connection is closed
    pub idle_timeout: Duration,
    /// How long to wait when acquiring a connection from the pool
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.database_url.clone(),
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            connect_timeout: Duration::from_secs(config.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(config.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(config.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a database connection pool with default settings.
pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };
    establish_connection_with_config(config).await
}

/// Establishes a database connection pool with custom settings.
pub async fn establish_connection_with_config(
    config: DbConfig,
) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(false);

    let start = Instant::now();
    match Database::connect(options).await {
        Ok(conn) => {
            info!(
                max_connections = config.max_connections,
                elapsed_ms = %start.elapsed().as_millis(),
                "Database connection established"
            );
            gauge!(
                format!("{}.pool_max_connections", METRICS_PREFIX),
                config.max_connections as f64
            );
            Ok(conn)
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            counter!(format!("{}.connection_failures", METRICS_PREFIX), 1);
            Err(e)
        }
    }
}

/// Establishes a connection pool from application configuration.
pub async fn establish_connection_from_app_config(
    config: &AppConfig,
) -> Result<DatabaseConnection, DbErr> {
    establish_connection_with_config(DbConfig::from(config)).await
}

/// Creates a shared database pool for use across commands and services.
pub async fn create_db_pool(database_url: &str) -> Result<Arc<DbPool>, DbErr> {
    let conn = establish_connection(database_url).await?;
    Ok(Arc::new(conn))
}

/// Runs all pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbErr> {
    info!("Running database migrations");
    let start = Instant::now();

    match migrations::Migrator::up(pool, None).await {
        Ok(()) => {
            let elapsed = start.elapsed();
            info!(elapsed_ms = %elapsed.as_millis(), "Database migrations completed");
            histogram!(
                format!("{}.migration_seconds", METRICS_PREFIX),
                elapsed.as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Database migration failed");
            counter!(format!("{}.migration_failures", METRICS_PREFIX), 1);
            Err(e)
        }
    }
}

/// Verifies that the database is reachable.
pub async fn check_connection(pool: &DbPool) -> Result<(), DbErr> {
    match pool.ping().await {
        Ok(()) => Ok(()),
        Err(e) => {
            counter!(format!("{}.ping_failures", METRICS_PREFIX), 1);
            Err(e)
        }
    }
}

/// Closes the connection pool, waiting for in-flight queries to finish.
pub async fn close_pool(pool: DbPool) -> Result<(), DbErr> {
    info!("Closing database connection pool");
    pool.close().await
}
