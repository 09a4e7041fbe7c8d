//! Transform steps: one application of a task to named inputs.

use crate::node::StorageNode;
use crate::resource::ExecutionResource;
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_STEP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide sequence number assigned when a step is declared.
///
/// Ordering by `StepId` is declaration order, which breaks ties between
/// independent steps in the topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub u64);

impl StepId {
    pub(crate) fn next() -> Self {
        StepId(NEXT_STEP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One function application. Created atomically with its output node and
/// never mutated afterwards.
pub struct TransformStep {
    id: StepId,
    task: Task,
    inputs: Vec<(String, StorageNode)>,
    output: StorageNode,
    /// Declared with `.overwrite()`; wins over other producers of its output.
    replaces: bool,
}

impl TransformStep {
    /// `inputs` must already follow the task's parameter order.
    pub(crate) fn new(task: Task, inputs: Vec<(String, StorageNode)>, output: StorageNode) -> Arc<Self> {
        Self::declare(task, inputs, output, false)
    }

    pub(crate) fn declare(
        task: Task,
        inputs: Vec<(String, StorageNode)>,
        output: StorageNode,
        replaces: bool,
    ) -> Arc<Self> {
        Arc::new(TransformStep {
            id: StepId::next(),
            task,
            inputs,
            output: output.bare(),
            replaces,
        })
    }

    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn resource(&self) -> &ExecutionResource {
        self.task.resource()
    }

    /// Inputs as (parameter name, node) pairs in parameter order.
    pub fn inputs(&self) -> &[(String, StorageNode)] {
        &self.inputs
    }

    pub fn input(&self, param: &str) -> Option<&StorageNode> {
        self.inputs
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, node)| node)
    }

    /// The output declaration (without lineage).
    pub fn output(&self) -> &StorageNode {
        &self.output
    }

    /// True if the step was declared as an explicit override of its output.
    pub fn replaces(&self) -> bool {
        self.replaces
    }

    /// Short label used in logs and error messages.
    pub fn label(&self) -> String {
        format!("{} -> {}", self.task.name(), self.output.name())
    }
}

impl fmt::Debug for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformStep")
            .field("id", &self.id)
            .field("task", &self.task.name())
            .field(
                "inputs",
                &self
                    .inputs
                    .iter()
                    .map(|(p, n)| format!("{}={}", p, n.id()))
                    .collect::<Vec<_>>(),
            )
            .field("output", self.output.id())
            .field("replaces", &self.replaces)
            .finish()
    }
}
