use std::time::Duration;

use db_migration::Migrator;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

pub mod entities;
pub mod models;
mod retry;
pub mod types;

pub use sea_orm::{DbErr, TransactionTrait};

pub type DbPool = DatabaseConnection;

#[derive(Debug, Clone)]
pub struct DbPoolOptions {
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DbPoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns the process-wide connection pool. Opened once at startup and
/// closed explicitly at shutdown.
#[derive(Clone)]
pub struct DBService {
    pub pool: DbPool,
}

impl DBService {
    pub async fn new(database_url: &str, options: &DbPoolOptions) -> Result<DBService, DbErr> {
        // Every connection to an in-memory SQLite database is a separate database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            options.max_connections
        };

        let mut connect_options = ConnectOptions::new(database_url.to_string());
        connect_options
            .max_connections(max_connections)
            .connect_timeout(options.connect_timeout)
            .acquire_timeout(options.connect_timeout)
            .sqlx_logging(false);

        let pool = Database::connect(connect_options).await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing connection and brings its schema up to date.
    pub async fn from_pool(pool: DbPool) -> Result<DBService, DbErr> {
        Migrator::up(&pool, None).await?;
        tracing::info!(backend = ?pool.get_database_backend(), "Database ready");
        Ok(DBService { pool })
    }

    pub async fn ping(&self) -> Result<(), DbErr> {
        self.pool.ping().await
    }

    pub async fn close(self) -> Result<(), DbErr> {
        self.pool.close().await
    }
}
