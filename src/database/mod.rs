use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use std::path::Path;
use tracing::info;

use crate::error::StoreError;
use crate::traits::SlotStore;

mod memory;

pub use memory::MemorySlotStore;

/// SQLite-backed slot storage
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self, StoreError> {
        if let Some(parent) = sqlite_file_path(db_url).and_then(Path::parent)
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Persistence(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database file");
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;
        Self::migrate(pool).await
    }

    /// A private in-memory database, gone when the value is dropped
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StoreError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }
}

#[async_trait]
impl SlotStore for Database {
    async fn read_slot(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM storage_slots WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn write_slot(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO storage_slots (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_slot(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM storage_slots WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

/// File path of a `sqlite:` URL, or `None` for in-memory databases
fn sqlite_file_path(db_url: &str) -> Option<&Path> {
    let rest = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);

    if path.is_empty() || path.starts_with(":memory:") {
        None
    } else {
        Some(Path::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_slot_reads_as_none() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.read_slot("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_replace_the_slot() {
        let db = Database::in_memory().await.unwrap();
        db.write_slot("slot", "[1]").await.unwrap();
        db.write_slot("slot", "[2,1]").await.unwrap();
        assert_eq!(db.read_slot("slot").await.unwrap().as_deref(), Some("[2,1]"));

        db.delete_slot("slot").await.unwrap();
        db.delete_slot("slot").await.unwrap();
        assert_eq!(db.read_slot("slot").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("nested/collection.db").display());

        {
            let db = Database::new(&url).await.unwrap();
            db.write_slot("slot", "persisted").await.unwrap();
        }

        let reopened = Database::new(&url).await.unwrap();
        assert_eq!(
            reopened.read_slot("slot").await.unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[test]
    fn file_path_is_extracted_from_url() {
        assert_eq!(
            sqlite_file_path("sqlite:database/collection.db"),
            Some(Path::new("database/collection.db"))
        );
        assert_eq!(
            sqlite_file_path("sqlite:///tmp/x.db?mode=rwc"),
            Some(Path::new("/tmp/x.db"))
        );
        assert_eq!(sqlite_file_path("sqlite::memory:"), None);
        assert_eq!(sqlite_file_path("postgres://localhost/db"), None);
    }
}
