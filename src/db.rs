use crate::config::AppConfig;
use metrics::{counter, gauge};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, SqlErr,
};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
///
/// # Errors
/// Returns the driver error if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, DbErr> {
    let (max_connections, min_connections) = pool_size(config);
    if max_connections < config.max_connections {
        warn!(
            requested = config.max_connections,
            "SQLite pool limited to a single connection"
        );
    }
    debug!(
        max_connections,
        min_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("bazaar_db_max_connections", max_connections as f64);

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Database connection establishment failed");
        e
    })?;

    info!(
        backend = ?db_pool.get_database_backend(),
        "Database connection pool established"
    );
    Ok(db_pool)
}

/// Pool bounds actually used for `config`.
///
/// SQLite admits one writer per database and a deferred transaction that
/// read first cannot later take the write lock while another connection
/// holds it, so SQLite pools get exactly one connection and concurrent
/// writers queue on the pool instead of failing with `SQLITE_BUSY`.
pub fn pool_size(config: &DbConfig) -> (u32, u32) {
    if is_sqlite_url(&config.url) {
        (1, 1)
    } else {
        let max = config.max_connections.max(1);
        (max, config.min_connections.min(max))
    }
}

fn is_sqlite_url(url: &str) -> bool {
    url.starts_with("sqlite:")
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs the embedded migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbErr> {
    info!("Running database migrations");
    let start = std::time::Instant::now();

    let result = crate::migrator::Migrator::up(pool, None).await;

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), DbErr> {
    let result = pool.ping().await;
    if let Err(e) = &result {
        error!(error = %e, "Database connection check failed");
        counter!("bazaar_db_connection_failures_total", 1);
    }
    result
}

/// True when the error is a unique-constraint violation on any backend.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Row locks are only meaningful on Postgres; SQLite serializes writers itself.
pub fn supports_row_locks(pool_backend: DbBackend) -> bool {
    pool_backend == DbBackend::Postgres
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> DbConfig {
        DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn migrations_apply_on_fresh_sqlite() {
        let pool = establish_connection_with_config(&memory_config())
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        check_connection(&pool).await.unwrap();

        // Running twice is a no-op
        run_migrations(&pool).await.unwrap();
    }

    #[rstest::rstest]
    #[case("sqlite::memory:", 16, 4, (1, 1))]
    #[case("sqlite://data/bazaar.db?mode=rwc", 8, 2, (1, 1))]
    #[case("postgres://app@localhost/bazaar", 16, 4, (16, 4))]
    #[case("postgres://app@localhost/bazaar", 2, 5, (2, 2))]
    fn pool_size_serializes_sqlite_writers(
        #[case] url: &str,
        #[case] max_connections: u32,
        #[case] min_connections: u32,
        #[case] expected: (u32, u32),
    ) {
        let config = DbConfig {
            url: url.to_string(),
            max_connections,
            min_connections,
            ..Default::default()
        };
        assert_eq!(pool_size(&config), expected);
    }

    #[test]
    fn row_locks_only_on_postgres() {
        assert!(supports_row_locks(DbBackend::Postgres));
        assert!(!supports_row_locks(DbBackend::Sqlite));
    }

    #[test]
    fn custom_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&DbErr::Custom("boom".into())));
    }
}
