//! Database connection management.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::Result;

/// Type alias for the database connection pool.
pub type DatabasePool = SqlitePool;

/// Database handle wrapping the connection pool.
#[derive(Clone)]
pub struct Database {
    pool: DatabasePool,
}

impl Database {
    /// Connect with the default pool size (5).
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, 5).await
    }

    /// Connect with an explicit pool size.
    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same in-memory instance.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::connect_with("sqlite::memory:", 1).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Run the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Connection pool reference.
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Health probe.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
