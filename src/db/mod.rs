//! Database connection management

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::store::postgres::PgStore;

const SCHEMA: &str = include_str!("../../schema/0001_init.sql");

/// PostgreSQL database connection pool
pub struct PgDatabase {
    pool: PgPool,
    config: DatabaseConfig,
}

impl PgDatabase {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str, config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(database_url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Storage handle for units of work, with the configured lock timeout
    pub fn store(&self) -> PgStore {
        let store = PgStore::new(self.pool.clone());
        match self.config.lock_timeout() {
            Some(timeout) => store.with_lock_timeout(timeout),
            None => store,
        }
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Schema applied");
        Ok(())
    }
}
