//! Compute engines and the per-kind engine registry.

use crate::dataset::Dataset;
use crate::error::TaskError;
use crate::resource::ResourceKind;
use crate::step::TransformStep;
use crate::task::TaskInputs;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Something that can run a task body.
///
/// The default engine calls the body in-process; remote engines (a serverless
/// invoker, a cluster submitter) implement the same trait.
pub trait ComputeEngine: Send + Sync {
    /// Engine name recorded in run reports
    fn name(&self) -> &str;

    /// Runs one step to completion on the calling thread.
    ///
    /// # Errors
    /// Returns the task's own error, or an engine error if the step could not run.
    fn run(&self, step: &TransformStep, inputs: &TaskInputs) -> Result<Dataset, TaskError>;
}

/// Runs task bodies in the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessEngine;

impl ComputeEngine for InProcessEngine {
    fn name(&self) -> &str {
        "in-process"
    }

    fn run(&self, step: &TransformStep, inputs: &TaskInputs) -> Result<Dataset, TaskError> {
        step.task().call(inputs)
    }
}

/// Maps resource kinds to engines. Kinds without a registered engine fall
/// back to the in-process engine.
#[derive(Clone)]
pub struct EngineRegistry {
    engines: HashMap<ResourceKind, Arc<dyn ComputeEngine>>,
    fallback: Arc<dyn ComputeEngine>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        EngineRegistry {
            engines: HashMap::new(),
            fallback: Arc::new(InProcessEngine),
        }
    }

    /// Registers an engine for a resource kind, replacing any previous one.
    pub fn register(&mut self, kind: ResourceKind, engine: Arc<dyn ComputeEngine>) {
        debug!(%kind, engine = engine.name(), "Registered compute engine");
        self.engines.insert(kind, engine);
    }

    /// Engine for `kind`, or the in-process engine if none is registered.
    pub fn engine_for(&self, kind: ResourceKind) -> Arc<dyn ComputeEngine> {
        self.engines
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// The in-process engine used in local mode.
    pub fn local(&self) -> Arc<dyn ComputeEngine> {
        Arc::clone(&self.fallback)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut engines: Vec<(ResourceKind, &str)> =
            self.engines.iter().map(|(k, e)| (*k, e.name())).collect();
        engines.sort();
        f.debug_struct("EngineRegistry")
            .field("engines", &engines)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
