//! Infrastructure Compiler
//!
//! Translates a lineage graph into a provider-specific [`ResourceGraph`].
//! Each backend implements the [`Backend`] capability set; the compiler walks
//! the graph in execution order, wires dependency edges and runs
//! per-node customization hooks.

pub mod aws;
pub mod dataproc;
pub mod kubernetes;
pub mod local;
pub mod naming;
pub mod resources;

use crate::error::{LineageError, Result};
use crate::graph::LineageGraph;
use crate::node::{StorageConfig, StorageId, StorageNode};
use crate::step::{StepId, TransformStep};
use crate::task::{Monitoring, Schedule};
use std::collections::HashMap;
use tracing::{debug, info};

pub use aws::AwsBackend;
pub use dataproc::DataprocBackend;
pub use kubernetes::KubernetesBackend;
pub use local::LocalBackend;
pub use resources::{Resource, ResourceGraph, ResourceId};

/// How a step uses a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

/// A storage node a step touches, with its translated resource if it has one.
#[derive(Debug, Clone)]
pub struct StorageBinding<'a> {
    pub node: &'a StorageNode,
    pub resource: Option<&'a Resource>,
    pub access: Access,
}

/// Everything a backend needs to translate one step.
#[derive(Debug)]
pub struct ComputeContext<'a> {
    pub step: &'a TransformStep,
    /// Inputs (read) in parameter order, then the output (write)
    pub bindings: Vec<StorageBinding<'a>>,
}

impl<'a> ComputeContext<'a> {
    /// Bindings that were translated into storage resources.
    pub fn translated(&self) -> impl Iterator<Item = (&StorageBinding<'a>, &'a Resource)> {
        self.bindings
            .iter()
            .filter_map(|b| b.resource.map(|r| (b, r)))
    }

    pub fn origin(&self) -> String {
        step_origin(self.step)
    }
}

/// A compute resource plus the access-policy resources it needs.
#[derive(Debug, Clone)]
pub struct ComputeTranslation {
    pub compute: Resource,
    pub access: Vec<Resource>,
}

/// Origin label for resources derived from a step.
pub fn step_origin(step: &TransformStep) -> String {
    format!("step:{}", step.output().id())
}

/// Error for a feature a backend cannot express.
pub fn unsupported(backend: &str, origin: impl Into<String>, capability: impl Into<String>) -> LineageError {
    LineageError::Compilation {
        node: origin.into(),
        capability: capability.into(),
        backend: backend.to_string(),
    }
}

/// Capability set of a target provider.
///
/// Backends are independent implementations; swapping one for another
/// requires no change to the lineage graph.
pub trait Backend: Send + Sync {
    /// Backend name used in errors and the resource graph.
    fn name(&self) -> &'static str;

    /// Deterministic resource name for a storage node.
    fn name_for(&self, node: &StorageNode) -> String;

    /// Translates a storage declaration into exactly one resource.
    fn translate_storage(&self, node: &StorageNode, config: &StorageConfig) -> Result<Resource>;

    /// Translates a step into its compute resource and access policies.
    ///
    /// Policies should depend on the storage they grant access to; the
    /// compiler adds the compute-side edges.
    fn translate_compute(&self, ctx: &ComputeContext<'_>) -> Result<ComputeTranslation>;

    /// Translates a schedule into a trigger resource.
    fn translate_schedule(
        &self,
        step: &TransformStep,
        _schedule: &Schedule,
        _compute: &ResourceId,
    ) -> Result<Resource> {
        Err(unsupported(self.name(), step_origin(step), "schedule"))
    }

    /// Translates monitoring into alerting resources.
    fn translate_monitoring(
        &self,
        step: &TransformStep,
        _monitoring: &Monitoring,
        _compute: &ResourceId,
    ) -> Result<Vec<Resource>> {
        Err(unsupported(self.name(), step_origin(step), "monitoring"))
    }
}

/// Callback adjusting a translated resource.
pub type ResourceHook = Box<dyn Fn(&mut Resource) + Send + Sync>;

/// Compiles lineage graphs with one backend and a set of hooks.
pub struct Compiler {
    backend: Box<dyn Backend>,
    storage_hooks: HashMap<StorageId, Vec<ResourceHook>>,
    compute_hooks: HashMap<StorageId, Vec<ResourceHook>>,
}

impl Compiler {
    pub fn new<B: Backend + 'static>(backend: B) -> Self {
        Compiler {
            backend: Box::new(backend),
            storage_hooks: HashMap::new(),
            compute_hooks: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Registers a hook run on `node`'s storage resource right after it is
    /// translated and before any step touching it is translated.
    pub fn customize_storage<F>(&mut self, node: &StorageNode, hook: F)
    where
        F: Fn(&mut Resource) + Send + Sync + 'static,
    {
        self.storage_hooks
            .entry(node.id().clone())
            .or_default()
            .push(Box::new(hook));
    }

    /// Registers a hook run on the compute resource of the step producing
    /// `output`, before its trigger, monitoring and downstream steps are translated.
    pub fn customize_compute<F>(&mut self, output: &StorageNode, hook: F)
    where
        F: Fn(&mut Resource) + Send + Sync + 'static,
    {
        self.compute_hooks
            .entry(output.id().clone())
            .or_default()
            .push(Box::new(hook));
    }

    /// Translates `graph` into a resource graph.
    ///
    /// # Errors
    /// Returns `LineageError::Compilation` if the backend cannot translate a
    /// requested feature or two resources collide on a name.
    pub fn compile(&self, graph: &LineageGraph) -> Result<ResourceGraph> {
        let backend = self.backend.name();
        let mut out = ResourceGraph::new(backend);
        let mut storage_ids: HashMap<StorageId, Option<ResourceId>> = HashMap::new();
        let mut compute_ids: HashMap<StepId, ResourceId> = HashMap::new();

        for step in graph.steps() {
            let touched: Vec<(&StorageId, Access)> = step
                .inputs()
                .iter()
                .map(|(_, node)| (node.id(), Access::Read))
                .chain(std::iter::once((step.output().id(), Access::Write)))
                .collect();
            for (id, _) in &touched {
                self.ensure_storage(graph, id, &mut out, &mut storage_ids)?;
            }

            let mut translation = {
                let bindings = touched
                    .iter()
                    .filter_map(|(id, access)| {
                        graph.node(id).map(|node| StorageBinding {
                            node,
                            resource: storage_ids
                                .get(*id)
                                .and_then(|rid| rid.as_ref())
                                .and_then(|rid| out.get(rid)),
                            access: *access,
                        })
                    })
                    .collect();
                self.backend.translate_compute(&ComputeContext { step, bindings })?
            };

            let origin = step_origin(step);
            let compute = &mut translation.compute;
            compute.origin = origin.clone();
            for (id, _) in &touched {
                if let Some(Some(rid)) = storage_ids.get(*id) {
                    compute.add_dependency(rid.clone());
                }
            }
            for policy in &translation.access {
                compute.add_dependency(policy.id());
            }
            for parent in graph.upstream_steps(step.id()) {
                if let Some(rid) = compute_ids.get(&parent) {
                    compute.add_dependency(rid.clone());
                }
            }
            if let Some(hooks) = self.compute_hooks.get(step.output().id()) {
                for hook in hooks {
                    hook(&mut *compute);
                }
            }

            let compute_id = out.insert(translation.compute)?;
            for policy in translation.access {
                out.insert(policy.from_origin(origin.clone()))?;
            }

            if let Some(schedule) = step.task().schedule() {
                let trigger = self
                    .backend
                    .translate_schedule(step, schedule, &compute_id)?
                    .depends_on(compute_id.clone())
                    .from_origin(origin.clone());
                out.insert(trigger)?;
            }
            if let Some(monitoring) = step.task().monitoring() {
                for alert in self.backend.translate_monitoring(step, monitoring, &compute_id)? {
                    out.insert(alert.depends_on(compute_id.clone()).from_origin(origin.clone()))?;
                }
            }

            debug!(step = %step.id(), compute = %compute_id, backend, "Translated step");
            compute_ids.insert(step.id(), compute_id);
        }

        for node in graph.nodes() {
            self.ensure_storage(graph, node.id(), &mut out, &mut storage_ids)?;
        }

        out.check_dependencies()?;
        info!(backend, resources = out.len(), "Compiled lineage graph");
        Ok(out)
    }

    fn ensure_storage(
        &self,
        graph: &LineageGraph,
        id: &StorageId,
        out: &mut ResourceGraph,
        storage_ids: &mut HashMap<StorageId, Option<ResourceId>>,
    ) -> Result<()> {
        if storage_ids.contains_key(id) {
            return Ok(());
        }
        let translated = match graph.node(id) {
            Some(node) => match node.storage() {
                Some(config) => {
                    let mut resource = self.backend.translate_storage(node, config)?;
                    resource.origin = id.to_string();
                    if let Some(hooks) = self.storage_hooks.get(id) {
                        for hook in hooks {
                            hook(&mut resource);
                        }
                    }
                    Some(out.insert(resource)?)
                }
                None => None,
            },
            None => None,
        };
        storage_ids.insert(id.clone(), translated);
        Ok(())
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("backend", &self.backend.name())
            .field("storage_hooks", &self.storage_hooks.len())
            .field("compute_hooks", &self.compute_hooks.len())
            .finish()
    }
}
