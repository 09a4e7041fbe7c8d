use crate::dataset::Dataset;
use crate::error::{LineageError, Result};
use crate::node::{StorageId, StorageNode};
use crate::storage::Storage;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for tests and demos.
///
/// Counts writes per location so callers can check what was materialized.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<StorageId, Dataset>>,
    writes: RwLock<HashMap<StorageId, usize>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a location without counting it as a write.
    pub fn insert(&self, node: &StorageNode, data: Dataset) {
        if let Ok(mut map) = self.data.write() {
            map.insert(node.id().clone(), data);
        }
    }

    pub fn get(&self, id: &StorageId) -> Option<Dataset> {
        self.data.read().ok().and_then(|map| map.get(id).cloned())
    }

    /// Number of `write` calls made for `id`.
    pub fn write_count(&self, id: &StorageId) -> usize {
        self.writes
            .read()
            .ok()
            .and_then(|map| map.get(id).copied())
            .unwrap_or(0)
    }

    fn poisoned(node: &StorageNode) -> LineageError {
        LineageError::storage(node.location(), "storage lock poisoned")
    }
}

impl Storage for MemoryStorage {
    fn read(&self, node: &StorageNode) -> Result<Dataset> {
        let map = self.data.read().map_err(|_| Self::poisoned(node))?;
        map.get(node.id())
            .cloned()
            .ok_or_else(|| LineageError::storage(node.location(), "no data stored"))
    }

    fn write(&self, node: &StorageNode, data: &Dataset) -> Result<()> {
        self.data
            .write()
            .map_err(|_| Self::poisoned(node))?
            .insert(node.id().clone(), data.clone());
        *self
            .writes
            .write()
            .map_err(|_| Self::poisoned(node))?
            .entry(node.id().clone())
            .or_insert(0) += 1;
        log::debug!("memory storage wrote {} rows to {}", data.len(), node.id());
        Ok(())
    }

    fn exists(&self, node: &StorageNode) -> Result<bool> {
        let map = self.data.read().map_err(|_| Self::poisoned(node))?;
        Ok(map.contains_key(node.id()))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
