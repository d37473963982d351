//! PostgreSQL pool, schema migrations and token reference data.
//!
//! The shared PostgreSQL store is the only coordination point of the engine:
//! every invariant-bearing operation is a single transaction against this pool.

use sqlx::Row;
use sqlx::migrate::MigrateError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod repository;

pub use config::DatabaseConfig;
pub use repository::{PgTokenRepository, TokenRepository};

/// Ledger database handle
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the connection pool
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tip_ledger::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), sqlx::Error> {
    ///     let db = Database::new(&DatabaseConfig::from_env()).await?;
    ///     println!("Connected to {}", db.health_check().await?);
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        log::debug!(
            "Ledger pool open ({}..={} connections)",
            config.min_connections,
            config.max_connections
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Pool handle in the form the managers share
    pub fn shared_pool(&self) -> Arc<PgPool> {
        Arc::new(self.pool.clone())
    }

    /// Apply the embedded ledger schema
    ///
    /// Concurrent callers are serialized by the migrator's advisory lock.
    pub async fn migrate(&self) -> Result<(), MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        log::info!("Ledger schema up to date");
        Ok(())
    }

    /// Round-trip to the server; returns its version string
    pub async fn health_check(&self) -> Result<String, sqlx::Error> {
        let row = sqlx::query("SELECT version() AS version")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("version"))
    }

    /// Wait for in-flight transactions and close every connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}
