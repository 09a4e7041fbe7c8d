use crate::dataset::Dataset;
use crate::error::{LineageError, Result};
use crate::node::StorageNode;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed storage.
///
/// Each location is one row in the `datasets` table, keyed by name and
/// location, holding the JSON-encoded dataset. Schema is created on first use.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (or creates) a file-based database.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established or the schema
    /// cannot be created.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Creates an in-memory database. Useful for testing.
    pub fn new_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS datasets (
                name TEXT NOT NULL,
                location TEXT NOT NULL,
                payload TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                written_at TEXT NOT NULL,
                PRIMARY KEY (name, location)
            )",
            [],
        )?;
        Ok(SqliteStorage {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self, node: &StorageNode) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LineageError::storage(node.location(), "connection lock poisoned"))
    }

    /// When `node` was last written, if ever.
    pub fn written_at(&self, node: &StorageNode) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock(node)?;
        let written_at = conn
            .query_row(
                "SELECT written_at FROM datasets WHERE name = ?1 AND location = ?2",
                params![node.name(), node.location()],
                |row| row.get::<_, DateTime<Utc>>(0),
            )
            .optional()
            .map_err(|e| LineageError::storage(node.location(), e))?;
        Ok(written_at)
    }
}

impl Storage for SqliteStorage {
    fn read(&self, node: &StorageNode) -> Result<Dataset> {
        let conn = self.lock(node)?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM datasets WHERE name = ?1 AND location = ?2",
                params![node.name(), node.location()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LineageError::storage(node.location(), e))?;

        let payload =
            payload.ok_or_else(|| LineageError::storage(node.location(), "no data stored"))?;
        serde_json::from_str(&payload).map_err(|e| LineageError::storage(node.location(), e))
    }

    fn write(&self, node: &StorageNode, data: &Dataset) -> Result<()> {
        let payload =
            serde_json::to_string(data).map_err(|e| LineageError::storage(node.location(), e))?;
        let conn = self.lock(node)?;
        conn.execute(
            "INSERT OR REPLACE INTO datasets (name, location, payload, row_count, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![node.name(), node.location(), payload, data.len() as i64, Utc::now()],
        )
        .map_err(|e| LineageError::storage(node.location(), e))?;

        log::debug!("sqlite storage wrote {} rows to {}", data.len(), node.id());
        Ok(())
    }

    fn exists(&self, node: &StorageNode) -> Result<bool> {
        let conn = self.lock(node)?;
        let mut stmt = conn
            .prepare("SELECT 1 FROM datasets WHERE name = ?1 AND location = ?2")
            .map_err(|e| LineageError::storage(node.location(), e))?;
        let exists = stmt
            .exists(params![node.name(), node.location()])
            .map_err(|e| LineageError::storage(node.location(), e))?;
        Ok(exists)
    }

    fn kind(&self) -> &'static str {
        "sqlite"
    }
}
