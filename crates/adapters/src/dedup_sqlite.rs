//! SQLite dedup store implementation

use async_trait::async_trait;
use dropwatch_domain::{DedupStore, InsertOutcome, StateError};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

/// SQLite-backed seen-key ledger
pub struct SqliteDedupStore {
    pool: SqlitePool,
}

impl SqliteDedupStore {
    /// Open (or create) the database and ensure the schema exists
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StateError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StateError::Database(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub async fn in_memory() -> Result<Self, StateError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StateError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen (
                key TEXT PRIMARY KEY,
                ts INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Database(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_seen_ts ON seen(ts)")
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(())
    }

    /// Number of recorded keys
    pub async fn count(&self) -> Result<i64, StateError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;
        Ok(count.0)
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn contains(&self, key: &str) -> Result<bool, StateError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(count.0 > 0)
    }

    async fn insert(&self, key: &str, ts_millis: i64) -> Result<InsertOutcome, StateError> {
        let result = sqlx::query("INSERT INTO seen (key, ts) VALUES (?, ?)")
            .bind(key)
            .bind(ts_millis)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e)
                if e.as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
            {
                Ok(InsertOutcome::AlreadyPresent)
            }
            Err(e) => Err(StateError::Database(e.to_string())),
        }
    }

    async fn purge_older_than(&self, cutoff_millis: i64) -> Result<u64, StateError> {
        let result = sqlx::query("DELETE FROM seen WHERE ts < ?")
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
