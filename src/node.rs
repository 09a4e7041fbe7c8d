//! Storage Nodes
//!
//! A `StorageNode` is an immutable handle to a data location. Chaining never
//! mutates a node: `.to()` returns a fresh handle that shares the target's
//! identity and carries the producing step.

use crate::step::TransformStep;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Identity of a storage location. Two handles with equal ids are aliases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageId {
    /// Logical name (e.g., "orders_clean")
    pub name: String,
    /// Physical location (e.g., "s3://lake/orders/clean")
    pub location: String,
}

impl StorageId {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        StorageId {
            name: name.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.location)
    }
}

/// Display metadata attached with `.with_name()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub display_name: String,
    pub description: Option<String>,
}

/// Kind of durable storage a node maps to when compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    /// Bucket / object prefix
    ObjectStore,
    /// Catalogued table
    Table,
    /// Mounted volume
    Volume,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::ObjectStore => "object_store",
            StorageClass::Table => "table",
            StorageClass::Volume => "volume",
        }
    }
}

/// Serialization format used when a node is materialized to files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Csv,
    Json,
}

impl DataFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
        }
    }
}

/// Storage declaration consumed by the compiler. Nodes without one are not
/// translated into storage resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageConfig {
    pub class: StorageClass,
    pub format: DataFormat,
    pub versioned: bool,
    pub retention_days: Option<u32>,
}

impl StorageConfig {
    fn with_class(class: StorageClass) -> Self {
        StorageConfig {
            class,
            format: DataFormat::default(),
            versioned: false,
            retention_days: None,
        }
    }

    pub fn object_store() -> Self {
        Self::with_class(StorageClass::ObjectStore)
    }

    pub fn table() -> Self {
        Self::with_class(StorageClass::Table)
    }

    pub fn volume() -> Self {
        Self::with_class(StorageClass::Volume)
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }
}

/// Latest step declared into a storage location, shared by every handle
/// derived from one `StorageNode::new` call.
///
/// Holds a weak reference: a producer nobody can reach any more does not
/// block a new declaration.
#[derive(Default)]
struct ProducerSlot(Mutex<Option<Weak<TransformStep>>>);

/// Immutable handle to a data location, optionally carrying its producing step.
///
/// Cloning is cheap: every field is shared behind an `Arc`.
#[derive(Clone)]
pub struct StorageNode {
    id: Arc<StorageId>,
    metadata: Option<Arc<NodeMetadata>>,
    storage: Option<Arc<StorageConfig>>,
    lineage: Option<Arc<TransformStep>>,
    producer: Arc<ProducerSlot>,
}

impl StorageNode {
    /// Declares a bare storage location (no lineage).
    ///
    /// # Arguments
    /// * `name` - Logical name, unique together with `location`
    /// * `location` - Physical location (path or URI)
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        StorageNode {
            id: Arc::new(StorageId::new(name, location)),
            metadata: None,
            storage: None,
            lineage: None,
            producer: Arc::new(ProducerSlot::default()),
        }
    }

    pub fn id(&self) -> &StorageId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn location(&self) -> &str {
        &self.id.location
    }

    pub fn metadata(&self) -> Option<&NodeMetadata> {
        self.metadata.as_deref()
    }

    /// Display name if one was attached, otherwise the logical name.
    pub fn display_name(&self) -> &str {
        self.metadata
            .as_deref()
            .map(|m| m.display_name.as_str())
            .unwrap_or(&self.id.name)
    }

    pub fn storage(&self) -> Option<&StorageConfig> {
        self.storage.as_deref()
    }

    /// The step that produces this node, if any.
    pub fn lineage(&self) -> Option<&Arc<TransformStep>> {
        self.lineage.as_ref()
    }

    /// True if no step produces this node.
    pub fn is_source(&self) -> bool {
        self.lineage.is_none()
    }

    /// Returns true if both handles refer to the same storage location.
    pub fn same_storage(&self, other: &StorageNode) -> bool {
        self.id == other.id
    }

    /// Attaches display metadata. Structure (identity and lineage) is unchanged.
    pub fn with_name(&self, display_name: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        let mut node = self.clone();
        node.metadata = Some(Arc::new(NodeMetadata {
            display_name: display_name.into(),
            description: (!description.is_empty()).then_some(description),
        }));
        node
    }

    /// Attaches a storage declaration used by the compiler.
    pub fn with_storage(&self, config: StorageConfig) -> Self {
        let mut node = self.clone();
        node.storage = Some(Arc::new(config));
        node
    }

    /// Same identity, metadata and storage, without lineage.
    pub(crate) fn bare(&self) -> Self {
        StorageNode {
            lineage: None,
            ..self.clone()
        }
    }

    pub(crate) fn with_lineage(&self, step: Arc<TransformStep>) -> Self {
        StorageNode {
            lineage: Some(step),
            ..self.clone()
        }
    }

    /// The most recent live step declared into this handle's location through
    /// any handle sharing its declaration. May differ from `lineage()` after an
    /// overwrite.
    pub(crate) fn current_producer(&self) -> Option<Arc<TransformStep>> {
        self.producer
            .0
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
    }

    pub(crate) fn register_producer(&self, step: &Arc<TransformStep>) {
        if let Ok(mut slot) = self.producer.0.lock() {
            *slot = Some(Arc::downgrade(step));
        }
    }
}

impl fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageNode")
            .field("id", &*self.id)
            .field("metadata", &self.metadata)
            .field("storage", &self.storage)
            .field(
                "producer",
                &self.lineage.as_ref().map(|s| s.task().name().to_string()),
            )
            .finish()
    }
}

impl fmt::Display for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
