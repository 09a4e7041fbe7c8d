//! Execution trace and run report.

use crate::dataset::Dataset;
use crate::node::StorageId;
use crate::resource::ResourceKind;
use crate::step::{StepId, TransformStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// How steps are dispatched to engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Every step runs in-process
    Local,
    /// Each step runs on the engine registered for its resource kind
    Cloud,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => f.write_str("local"),
            ExecutionMode::Cloud => f.write_str("cloud"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    StepStarted,
    StepFinished,
    Materialized,
    StepFailed,
}

/// One entry of the execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position in the trace, starting at 0
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: TraceKind,
    pub step: StepId,
    pub task: String,
    /// Node written, for `Materialized`
    pub node: Option<StorageId>,
}

/// Append-only event log shared between the scheduler and step workers.
#[derive(Debug, Default)]
pub struct ExecutionTrace {
    events: Mutex<Vec<TraceEvent>>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, kind: TraceKind, step: &TransformStep, node: Option<&StorageId>) {
        if let Ok(mut events) = self.events.lock() {
            let seq = events.len() as u64;
            events.push(TraceEvent {
                seq,
                at: Utc::now(),
                kind,
                step: step.id(),
                task: step.task().name().to_string(),
                node: node.cloned(),
            });
        }
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

/// Summary of one completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub step: StepId,
    pub task: String,
    pub output: StorageId,
    pub kind: ResourceKind,
    pub engine: String,
    pub rows: usize,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Steps in completion order
    pub completed: Vec<CompletedStep>,
    /// Nodes written to storage, in write order
    pub materialized: Vec<StorageId>,
    pub trace: Vec<TraceEvent>,
    /// In-memory results of the sink nodes
    #[serde(skip)]
    pub outputs: HashMap<StorageId, Arc<Dataset>>,
}

impl RunReport {
    pub fn output(&self, id: &StorageId) -> Option<&Dataset> {
        self.outputs.get(id).map(|d| d.as_ref())
    }

    /// Trace position of the first `kind` event for `step`.
    pub fn event_position(&self, kind: TraceKind, step: StepId) -> Option<usize> {
        self.trace
            .iter()
            .position(|e| e.kind == kind && e.step == step)
    }

    /// Trace position of the materialization of `node`.
    pub fn materialized_position(&self, node: &StorageId) -> Option<usize> {
        self.trace
            .iter()
            .position(|e| e.kind == TraceKind::Materialized && e.node.as_ref() == Some(node))
    }

    pub fn was_materialized(&self, node: &StorageId) -> bool {
        self.materialized.contains(node)
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StorageNode;
    use crate::task::Task;

    #[test]
    fn test_trace_sequence_numbers() {
        let task = Task::new("t", ["x"], |_| Ok(Dataset::default()));
        let step = TransformStep::new(
            task,
            vec![("x".into(), StorageNode::new("a", "/a"))],
            StorageNode::new("b", "/b"),
        );
        let trace = ExecutionTrace::new();
        trace.record(TraceKind::StepStarted, &step, None);
        trace.record(TraceKind::Materialized, &step, Some(step.output().id()));
        trace.record(TraceKind::StepFinished, &step, None);

        let events = trace.events();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(events[1].node.as_ref().map(|n| n.name.as_str()), Some("b"));
        assert!(events[0].at <= events[2].at);
    }

    #[test]
    fn test_trace_kind_serde() {
        let json = serde_json::to_string(&TraceKind::StepStarted).unwrap();
        assert_eq!(json, "\"step_started\"");
        assert_eq!(ExecutionMode::Cloud.to_string(), "cloud");
    }
}
