//! Connection pool for the SQLite index.

use std::str::FromStr;
use std::time::Duration;

use kuro_core::error::AppError;
use kuro_core::DbConfig;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, instrument};

/// Embedded migrations, applied on every connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle on the index database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(AppError::DatabaseError)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Opens (creating if needed) the database behind a `sqlite://` URL.
    pub async fn connect(url: &str, config: &DbConfig) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(AppError::DatabaseError)?
            .create_if_missing(true);
        debug!("Connecting to {}", url);
        Self::new(Self::tune(options), config.max_connections).await
    }

    /// Fresh database that lives as long as the pool.
    ///
    /// Not test-gated so other crates can use it in their own tests.
    pub async fn connect_in_memory() -> Result<Self, AppError> {
        let options = SqliteConnectOptions::new().filename(":memory:");
        // Every pooled connection to :memory: would see its own database.
        Self::new(Self::tune(options), 1).await
    }

    fn tune(options: SqliteConnectOptions) -> SqliteConnectOptions {
        options
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // A long reconciliation holds the write lock for many short
            // statements; readers must not give up immediately.
            .busy_timeout(Duration::from_millis(1500))
    }

    #[instrument("applying database migrations", skip(self))]
    async fn migrate(&self) -> Result<(), AppError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.into()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_has_schema() {
        let db = Database::connect_in_memory().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('titles', 'chapters', 'pages') ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();
        assert_eq!(names, vec!["chapters", "pages", "titles"]);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::connect_in_memory().await.unwrap();
        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let url = format!("sqlite://{}", path.display());
        let db = Database::connect(&url, &DbConfig::default()).await.unwrap();
        db.close().await;
        assert!(path.exists());

        // Reopening an already migrated file is fine.
        let db = Database::connect(&url, &DbConfig::default()).await.unwrap();
        db.close().await;
    }
}
