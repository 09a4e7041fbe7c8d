//! Durable Storage
//!
//! Where sources are read from and step outputs are materialized to.
//! Implementations can be:
//! - In-memory map (for testing)
//! - Local filesystem (CSV or JSON files)
//! - SQLite database

pub mod fs;
pub mod memory;
pub mod sqlite;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::node::StorageNode;

pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Read/write access to storage locations.
///
/// Writes overwrite whatever is at the location, so re-running a step is
/// idempotent.
pub trait Storage: Send + Sync {
    /// Reads the dataset stored at `node`'s location.
    ///
    /// # Errors
    /// Returns `LineageError::Storage` if nothing is stored there or it cannot be decoded.
    fn read(&self, node: &StorageNode) -> Result<Dataset>;

    /// Writes `data` to `node`'s location, replacing any previous content.
    fn write(&self, node: &StorageNode, data: &Dataset) -> Result<()>;

    /// Returns true if something is stored at `node`'s location.
    fn exists(&self, node: &StorageNode) -> Result<bool>;

    /// Short backend name for logs.
    fn kind(&self) -> &'static str;
}
