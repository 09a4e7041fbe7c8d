//! Pipeline Executor
//!
//! Runs a built lineage graph on a bounded pool of blocking workers. Steps
//! start once every producer has finished (and, across engine boundaries,
//! once the producer's output has been written to storage).

pub mod engine;
pub mod trace;

use crate::config::{EngineConfig, MaterializePolicy};
use crate::dataset::Dataset;
use crate::error::{LineageError, Result};
use crate::graph::LineageGraph;
use crate::node::{StorageId, StorageNode};
use crate::resource::ResourceKind;
use crate::step::TransformStep;
use crate::storage::Storage;
use crate::task::TaskInputs;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use engine::{ComputeEngine, EngineRegistry, InProcessEngine};
pub use trace::{CompletedStep, ExecutionMode, ExecutionTrace, RunReport, TraceEvent, TraceKind};

/// Where a step input comes from.
enum InputSource {
    /// Result of an earlier step in this run, same engine kind
    Memory(Arc<Dataset>),
    /// Durable storage: true sources and cross-engine boundaries
    Storage(StorageNode),
}

struct StepOutcome {
    data: Arc<Dataset>,
    materialized: bool,
    engine: String,
}

/// Executes lineage graphs against a storage backend.
pub struct Executor {
    storage: Arc<dyn Storage>,
    engines: EngineRegistry,
    max_workers: usize,
    materialize: MaterializePolicy,
    cancel: CancellationToken,
}

impl Executor {
    /// Creates an executor with default configuration.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::from_config(&EngineConfig::default(), storage)
    }

    pub fn from_config(config: &EngineConfig, storage: Arc<dyn Storage>) -> Self {
        Executor {
            storage,
            engines: EngineRegistry::new(),
            max_workers: config.max_workers.max(1),
            materialize: config.materialize,
            cancel: CancellationToken::new(),
        }
    }

    /// Registers the engine used for `kind` in cloud mode.
    pub fn with_engine(mut self, kind: ResourceKind, engine: Arc<dyn ComputeEngine>) -> Self {
        self.engines.register(kind, engine);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_materialize_policy(mut self, policy: MaterializePolicy) -> Self {
        self.materialize = policy;
        self
    }

    /// Uses an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops scheduling when cancelled. In-flight steps finish.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every step of `graph`.
    ///
    /// # Arguments
    /// * `graph` - A built lineage graph
    /// * `mode` - `Local` runs everything in-process; `Cloud` dispatches per resource kind
    ///
    /// # Returns
    /// A report with the trace, completed steps and sink outputs.
    ///
    /// # Errors
    /// * `Execution` for the earliest failing step in execution order
    /// * `Storage` if an input cannot be read or an output cannot be written
    /// * `Cancelled` if the token fired before every step was scheduled
    ///
    /// Outputs written before a failure stay in storage.
    pub async fn run(&self, graph: &LineageGraph, mode: ExecutionMode) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let steps = graph.steps();
        info!(%run_id, %mode, steps = steps.len(), workers = self.max_workers, "Starting run");

        let mut remaining: Vec<usize> = vec![0; steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
        for (pos, step) in steps.iter().enumerate() {
            for parent in graph.upstream_steps(step.id()) {
                if let Some(parent_pos) = graph.position(parent) {
                    remaining[pos] += 1;
                    dependents[parent_pos].push(pos);
                }
            }
        }
        let write_output: Vec<bool> = steps
            .iter()
            .map(|step| self.must_materialize(graph, step))
            .collect();

        let trace = Arc::new(ExecutionTrace::new());
        let mut outputs: HashMap<StorageId, Arc<Dataset>> = HashMap::new();
        let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&p| remaining[p] == 0).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut completed: Vec<CompletedStep> = Vec::new();
        let mut materialized: Vec<StorageId> = Vec::new();
        let mut failure: Option<(usize, LineageError)> = None;
        let mut cancelled = false;

        loop {
            while failure.is_none() && in_flight.len() < self.max_workers {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let Some(pos) = ready.pop_first() else {
                    break;
                };
                let Some(step) = steps.get(pos).cloned() else {
                    continue;
                };

                let plan = Self::input_plan(graph, &step, &outputs);
                let output = graph
                    .node(step.output().id())
                    .cloned()
                    .unwrap_or_else(|| step.output().clone());
                let engine = match mode {
                    ExecutionMode::Local => self.engines.local(),
                    ExecutionMode::Cloud => self.engines.engine_for(step.resource().kind),
                };
                let storage = Arc::clone(&self.storage);
                let step_trace = Arc::clone(&trace);
                let write = write_output[pos];

                trace.record(TraceKind::StepStarted, &step, None);
                debug!(step = %step.id(), label = %step.label(), engine = engine.name(), "Step started");

                let handle = tokio::task::spawn_blocking(move || {
                    Self::run_step(&step, engine.as_ref(), storage.as_ref(), plan, &output, write, &step_trace)
                });
                in_flight.push(async move { (pos, handle.await) });
            }

            let Some((pos, joined)) = in_flight.next().await else {
                break;
            };
            let Some(step) = steps.get(pos) else {
                continue;
            };

            let result = joined.unwrap_or_else(|join_err| {
                Err(LineageError::Execution {
                    step: step.id().to_string(),
                    task: step.task().name().to_string(),
                    cause: Box::new(join_err),
                })
            });

            match result {
                Ok(outcome) => {
                    trace.record(TraceKind::StepFinished, step, None);
                    debug!(step = %step.id(), rows = outcome.data.len(), "Step finished");

                    let output_id = step.output().id().clone();
                    if outcome.materialized {
                        materialized.push(output_id.clone());
                    }
                    completed.push(CompletedStep {
                        step: step.id(),
                        task: step.task().name().to_string(),
                        output: output_id.clone(),
                        kind: step.resource().kind,
                        engine: outcome.engine,
                        rows: outcome.data.len(),
                    });
                    outputs.insert(output_id, outcome.data);

                    for &child in &dependents[pos] {
                        remaining[child] -= 1;
                        if remaining[child] == 0 {
                            ready.insert(child);
                        }
                    }
                }
                Err(err) => {
                    trace.record(TraceKind::StepFailed, step, None);
                    warn!(step = %step.id(), label = %step.label(), error = %err, "Step failed");
                    // report the earliest failing step in execution order
                    if failure.as_ref().map_or(true, |(p, _)| pos < *p) {
                        failure = Some((pos, err));
                    }
                }
            }
        }

        if let Some((_, err)) = failure {
            error!(%run_id, completed = completed.len(), error = %err, "Run failed");
            return Err(err);
        }

        if cancelled && completed.len() < steps.len() {
            warn!(%run_id, completed = completed.len(), "Run cancelled");
            return Err(LineageError::Cancelled {
                completed: completed
                    .iter()
                    .map(|c| format!("{} -> {}", c.task, c.output.name))
                    .collect(),
            });
        }

        outputs.retain(|id, _| graph.is_sink(id));
        let finished_at = Utc::now();
        info!(
            %run_id,
            completed = completed.len(),
            materialized = materialized.len(),
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "Run finished"
        );

        Ok(RunReport {
            run_id,
            mode,
            started_at,
            finished_at,
            completed,
            materialized,
            trace: trace.events(),
            outputs,
        })
    }

    /// Sinks, cross-engine boundaries and (under `All`) every output are written.
    fn must_materialize(&self, graph: &LineageGraph, step: &TransformStep) -> bool {
        if self.materialize == MaterializePolicy::All {
            return true;
        }
        let output = step.output().id();
        if graph.is_sink(output) {
            return true;
        }
        let kind = step.resource().kind;
        graph
            .consumers_of(output)
            .iter()
            .any(|consumer| consumer.resource().kind != kind)
    }

    fn input_plan(
        graph: &LineageGraph,
        step: &TransformStep,
        outputs: &HashMap<StorageId, Arc<Dataset>>,
    ) -> Vec<(String, InputSource)> {
        let kind = step.resource().kind;
        step.inputs()
            .iter()
            .map(|(param, node)| {
                let canonical = graph.node(node.id()).cloned().unwrap_or_else(|| node.clone());
                let in_memory = graph
                    .producer_of(node.id())
                    .filter(|producer| producer.resource().kind == kind)
                    .and_then(|_| outputs.get(node.id()));
                let source = match in_memory {
                    Some(data) => InputSource::Memory(Arc::clone(data)),
                    None => InputSource::Storage(canonical),
                };
                (param.clone(), source)
            })
            .collect()
    }

    /// Body of a blocking worker: resolve inputs, run, and write the output
    /// before the step counts as finished.
    fn run_step(
        step: &TransformStep,
        engine: &dyn ComputeEngine,
        storage: &dyn Storage,
        plan: Vec<(String, InputSource)>,
        output: &StorageNode,
        write: bool,
        trace: &ExecutionTrace,
    ) -> Result<StepOutcome> {
        let mut inputs = TaskInputs::new();
        for (param, source) in plan {
            let data = match source {
                InputSource::Memory(data) => data,
                InputSource::Storage(node) => {
                    debug!(step = %step.id(), node = %node.id(), "Reading input from storage");
                    Arc::new(storage.read(&node)?)
                }
            };
            inputs.insert(param, data);
        }

        let data = engine
            .run(step, &inputs)
            .map_err(|cause| LineageError::Execution {
                step: step.id().to_string(),
                task: step.task().name().to_string(),
                cause,
            })?;

        if write {
            storage.write(output, &data)?;
            trace.record(TraceKind::Materialized, step, Some(output.id()));
        }

        Ok(StepOutcome {
            data: Arc::new(data),
            materialized: write,
            engine: engine.name().to_string(),
        })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("storage", &self.storage.kind())
            .field("engines", &self.engines)
            .field("max_workers", &self.max_workers)
            .field("materialize", &self.materialize)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::resource::ExecutionResource;
    use crate::storage::MemoryStorage;
    use crate::task::Task;
    use serde_json::json;

    fn add_one(name: &str) -> Task {
        Task::new(name, ["src"], |inputs| {
            let src = inputs.require("src")?;
            let mut out = Dataset::new(src.columns.clone());
            for row in &src.rows {
                let v = row.first().and_then(|v| v.as_i64()).ok_or("expected integer")?;
                out.push_row(vec![json!(v + 1)]);
            }
            Ok(out)
        })
    }

    fn seeded() -> (Arc<MemoryStorage>, StorageNode) {
        let storage = Arc::new(MemoryStorage::new());
        let raw = StorageNode::new("raw", "/raw");
        storage.insert(&raw, Dataset::with_rows(["v"], vec![vec![json!(1)], vec![json!(2)]]));
        (storage, raw)
    }

    #[tokio::test]
    async fn test_linear_run_only_writes_sink() {
        let (storage, raw) = seeded();
        let mid = raw.transform(&add_one("a")).unwrap().to(&StorageNode::new("mid", "/mid")).unwrap();
        let out = mid.transform(&add_one("b")).unwrap().to(&StorageNode::new("out", "/out")).unwrap();
        let graph = LineageGraph::build(&out).unwrap();

        let executor = Executor::new(storage.clone());
        let report = executor.run(&graph, ExecutionMode::Local).await.unwrap();

        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.materialized, vec![out.id().clone()]);
        assert_eq!(storage.write_count(mid.id()), 0);
        let result = report.output(out.id()).unwrap();
        assert_eq!(result.rows, vec![vec![json!(3)], vec![json!(4)]]);
    }

    #[tokio::test]
    async fn test_materialize_all_policy() {
        let (storage, raw) = seeded();
        let mid = raw.transform(&add_one("a")).unwrap().to(&StorageNode::new("mid", "/mid")).unwrap();
        let out = mid.transform(&add_one("b")).unwrap().to(&StorageNode::new("out", "/out")).unwrap();
        let graph = LineageGraph::build(&out).unwrap();

        let executor = Executor::new(storage.clone()).with_materialize_policy(MaterializePolicy::All);
        executor.run(&graph, ExecutionMode::Local).await.unwrap();
        assert_eq!(storage.write_count(mid.id()), 1);
        assert_eq!(storage.write_count(out.id()), 1);
    }

    #[tokio::test]
    async fn test_missing_source_is_storage_error() {
        let storage = Arc::new(MemoryStorage::new());
        let out = StorageNode::new("raw", "/raw")
            .transform(&add_one("a"))
            .unwrap()
            .to(&StorageNode::new("out", "/out"))
            .unwrap();
        let graph = LineageGraph::build(&out).unwrap();
        let err = Executor::new(storage).run(&graph, ExecutionMode::Local).await.unwrap_err();
        assert!(matches!(err, LineageError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_failure_names_step_and_keeps_prior_outputs() {
        let (storage, raw) = seeded();
        let failing = Task::new("explode", ["src"], |_| -> std::result::Result<Dataset, TaskError> {
            Err("bad row".into())
        });
        let mid = raw
            .transform(&add_one("a").on(ExecutionResource::serverless("fn")))
            .unwrap()
            .to(&StorageNode::new("mid", "/mid"))
            .unwrap();
        let out = mid.transform(&failing).unwrap().to(&StorageNode::new("out", "/out")).unwrap();
        let graph = LineageGraph::build(&out).unwrap();

        let err = Executor::new(storage.clone())
            .run(&graph, ExecutionMode::Local)
            .await
            .unwrap_err();
        match err {
            LineageError::Execution { task, cause, .. } => {
                assert_eq!(task, "explode");
                assert_eq!(cause.to_string(), "bad row");
            }
            other => panic!("unexpected error: {other}"),
        }
        // mid crossed an engine boundary, so it was written before the failure
        assert_eq!(storage.write_count(mid.id()), 1);
        assert_eq!(storage.write_count(out.id()), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (storage, raw) = seeded();
        let out = raw.transform(&add_one("a")).unwrap().to(&StorageNode::new("out", "/out")).unwrap();
        let graph = LineageGraph::build(&out).unwrap();

        let executor = Executor::new(storage);
        executor.cancellation_token().cancel();
        let err = executor.run(&graph, ExecutionMode::Local).await.unwrap_err();
        match err {
            LineageError::Cancelled { completed } => assert!(completed.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
