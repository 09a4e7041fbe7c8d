//! Provider-neutral resource descriptions produced by the compiler.

use crate::error::{LineageError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stable resource address: `<kind>.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(kind: &str, name: &str) -> Self {
        ResourceId(format!("{}.{}", kind, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One infrastructure resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Provider resource type (e.g., "aws_s3_bucket")
    pub kind: String,
    /// Deterministic resource name
    pub name: String,
    pub properties: BTreeMap<String, Value>,
    pub depends_on: BTreeSet<ResourceId>,
    /// Node or step the resource was translated from
    pub origin: String,
}

impl Resource {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Resource {
            kind: kind.into(),
            name: name.into(),
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            origin: String::new(),
        }
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.kind, &self.name)
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn depends_on(mut self, id: ResourceId) -> Self {
        self.depends_on.insert(id);
        self
    }

    pub fn add_dependency(&mut self, id: ResourceId) {
        self.depends_on.insert(id);
    }

    pub fn from_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }
}

/// Resources plus dependency edges for one backend. Ordered by resource id
/// so output is identical across regenerations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    pub backend: String,
    pub resources: BTreeMap<ResourceId, Resource>,
}

impl ResourceGraph {
    pub fn new(backend: impl Into<String>) -> Self {
        ResourceGraph {
            backend: backend.into(),
            resources: BTreeMap::new(),
        }
    }

    /// Adds a resource and returns its id.
    ///
    /// # Errors
    /// Returns `LineageError::Compilation` if a resource from a different origin
    /// already uses the same id.
    pub fn insert(&mut self, resource: Resource) -> Result<ResourceId> {
        let id = resource.id();
        if let Some(existing) = self.resources.get(&id) {
            if existing.origin != resource.origin {
                return Err(LineageError::Compilation {
                    node: resource.origin,
                    capability: format!("a unique resource name ('{}' is taken by {})", id, existing.origin),
                    backend: self.backend.clone(),
                });
            }
        }
        self.resources.insert(id.clone(), resource);
        Ok(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources.values().filter(move |r| r.kind == kind)
    }

    /// Resources translated from `origin`.
    pub fn from_origin<'a>(&'a self, origin: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources.values().filter(move |r| r.origin == origin)
    }

    /// Dependency edges (dependent, dependency), sorted.
    pub fn edges(&self) -> Vec<(ResourceId, ResourceId)> {
        self.resources
            .iter()
            .flat_map(|(id, r)| r.depends_on.iter().map(move |dep| (id.clone(), dep.clone())))
            .collect()
    }

    /// Every dependency must point at a resource in the graph.
    pub(crate) fn check_dependencies(&self) -> Result<()> {
        for (id, resource) in &self.resources {
            if let Some(missing) = resource.depends_on.iter().find(|d| !self.contains(d)) {
                return Err(LineageError::Compilation {
                    node: resource.origin.clone(),
                    capability: format!("dependency '{}' of '{}'", missing, id),
                    backend: self.backend.clone(),
                });
            }
        }
        Ok(())
    }

    /// Pretty-printed JSON rendering.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
