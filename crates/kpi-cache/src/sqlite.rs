//! SQLite-based blob store implementation.

use async_trait::async_trait;
use chrono::Utc;
use kpi_core::{BlobStore, KpiError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, instrument};

/// SQLite-backed durable storage for the KPI cache.
///
/// Blobs live in a single key-value table, providing persistence across
/// application restarts.
#[derive(Debug)]
pub struct SqliteBlobStore {
    conn: Mutex<Connection>,
}

impl SqliteBlobStore {
    /// Open (or create) a store at the given path.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| KpiError::Storage(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| KpiError::Storage(e.to_string()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KpiError::Storage(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| KpiError::Storage(e.to_string()))?;

        debug!("SQLite blob store schema initialized");
        Ok(())
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    #[instrument(skip(self))]
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KpiError::Storage(e.to_string()))?;

        let result = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| KpiError::Storage(e.to_string()))?;

        match &result {
            Some(bytes) => debug!("Loaded {} bytes", bytes.len()),
            None => debug!("Nothing stored"),
        }
        Ok(result)
    }

    #[instrument(skip(self, value), fields(len = value.len()))]
    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        let conn = self
            .conn
            .lock()
            .map_err(|e| KpiError::Storage(e.to_string()))?;

        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, value, updated_at],
        )
        .map_err(|e| KpiError::Storage(e.to_string()))?;

        debug!("Stored blob");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| KpiError::Storage(e.to_string()))?;

        let deleted = conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .map_err(|e| KpiError::Storage(e.to_string()))?;

        debug!("Removed {} blobs", deleted);
        Ok(())
    }
}
