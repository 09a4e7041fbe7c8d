//! Mode dispatch: one pipeline definition, four ways to use it.
//!
//! The same terminal nodes are executed locally, executed on their bound
//! engines, analyzed or compiled depending on a mode string.

use crate::analyzer::{AnalysisReport, Analyzer};
use crate::compiler::{Compiler, ResourceGraph};
use crate::error::{LineageError, Result};
use crate::executor::{ExecutionMode, Executor, RunReport};
use crate::graph::LineageGraph;
use crate::node::StorageNode;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// What to do with a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Run every step in-process
    Local,
    /// Run every step on the engine registered for its resource kind
    Cloud,
    /// Estimate cost and latency
    Analyze,
    /// Compile to infrastructure resources
    Generate,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Cloud => "cloud",
            Mode::Analyze => "analyze",
            Mode::Generate => "generate",
        }
    }
}

impl FromStr for Mode {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Mode::Local),
            "cloud" => Ok(Mode::Cloud),
            "analyze" => Ok(Mode::Analyze),
            "generate" => Ok(Mode::Generate),
            _ => Err(LineageError::UnsupportedMode { mode: s.to_string() }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a dispatched pipeline.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum Outcome {
    Executed(RunReport),
    Analyzed(AnalysisReport),
    Generated(ResourceGraph),
}

impl Outcome {
    pub fn mode_name(&self) -> &'static str {
        match self {
            Outcome::Executed(report) => match report.mode {
                ExecutionMode::Local => Mode::Local.as_str(),
                ExecutionMode::Cloud => Mode::Cloud.as_str(),
            },
            Outcome::Analyzed(_) => Mode::Analyze.as_str(),
            Outcome::Generated(_) => Mode::Generate.as_str(),
        }
    }
}

/// Collaborators a pipeline is dispatched against.
#[derive(Debug)]
pub struct RunContext {
    pub executor: Executor,
    pub analyzer: Analyzer,
    pub compiler: Compiler,
}

impl RunContext {
    pub fn new(executor: Executor, compiler: Compiler) -> Self {
        RunContext {
            executor,
            analyzer: Analyzer::default(),
            compiler,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Analyzer) -> Self {
        self.analyzer = analyzer;
        self
    }
}

/// A set of terminal nodes whose combined lineage forms one graph.
#[derive(Debug, Clone)]
pub struct Pipeline {
    terminals: Vec<StorageNode>,
}

impl Pipeline {
    pub fn new(terminal: StorageNode) -> Self {
        Pipeline {
            terminals: vec![terminal],
        }
    }

    pub fn with_terminal(mut self, terminal: StorageNode) -> Self {
        self.terminals.push(terminal);
        self
    }

    pub fn terminals(&self) -> &[StorageNode] {
        &self.terminals
    }

    /// Builds the validated lineage graph of every terminal.
    pub fn build(&self) -> Result<LineageGraph> {
        LineageGraph::build_all(&self.terminals)
    }

    /// Parses `mode` and runs the pipeline in it.
    ///
    /// # Errors
    /// Returns `LineageError::UnsupportedMode` for an unknown mode string,
    /// before the graph is built. Otherwise any error from building, running,
    /// analyzing or compiling.
    pub async fn dispatch(&self, mode: &str, ctx: &RunContext) -> Result<Outcome> {
        let mode = mode.parse::<Mode>()?;
        self.run(mode, ctx).await
    }

    pub async fn run(&self, mode: Mode, ctx: &RunContext) -> Result<Outcome> {
        let graph = self.build()?;
        info!(%mode, steps = graph.len(), "Dispatching pipeline");
        match mode {
            Mode::Local => Ok(Outcome::Executed(ctx.executor.run(&graph, ExecutionMode::Local).await?)),
            Mode::Cloud => Ok(Outcome::Executed(ctx.executor.run(&graph, ExecutionMode::Cloud).await?)),
            Mode::Analyze => Ok(Outcome::Analyzed(ctx.analyzer.analyze(&graph))),
            Mode::Generate => Ok(Outcome::Generated(ctx.compiler.compile(&graph)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::LocalBackend;
    use crate::dataset::Dataset;
    use crate::node::StorageConfig;
    use crate::storage::MemoryStorage;
    use crate::task::Task;
    use serde_json::json;
    use std::sync::Arc;

    fn context(storage: Arc<MemoryStorage>) -> RunContext {
        RunContext::new(Executor::new(storage), Compiler::new(LocalBackend::new("/tmp/lineage")))
    }

    fn pipeline() -> (StorageNode, Pipeline) {
        let raw = StorageNode::new("raw", "mem://raw").with_storage(StorageConfig::volume());
        let task = Task::new("double", ["src"], |inputs| {
            let src = inputs.require("src")?;
            let mut out = Dataset::new(["n"]);
            for v in src.column("n") {
                out.push_row(vec![json!(v.as_i64().unwrap_or(0) * 2)]);
            }
            Ok(out)
        });
        let out = raw
            .transform(&task)
            .unwrap()
            .to(&StorageNode::new("out", "mem://out").with_storage(StorageConfig::volume()))
            .unwrap();
        (raw, Pipeline::new(out))
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("LOCAL".parse::<Mode>().unwrap(), Mode::Local);
        assert_eq!(" generate ".parse::<Mode>().unwrap(), Mode::Generate);
        match "batch".parse::<Mode>() {
            Err(LineageError::UnsupportedMode { mode }) => assert_eq!(mode, "batch"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_each_mode() {
        let storage = Arc::new(MemoryStorage::new());
        let (raw, pipeline) = pipeline();
        storage.insert(&raw, Dataset::with_rows(["n"], vec![vec![json!(2)], vec![json!(5)]]));
        let ctx = context(Arc::clone(&storage));

        let outcome = pipeline.dispatch("local", &ctx).await.unwrap();
        assert_eq!(outcome.mode_name(), "local");
        let Outcome::Executed(report) = outcome else {
            panic!("expected execution");
        };
        let out = report.output(pipeline.terminals()[0].id()).unwrap();
        assert_eq!(out.column("n").cloned().collect::<Vec<_>>(), vec![json!(4), json!(10)]);

        assert!(matches!(pipeline.dispatch("analyze", &ctx).await.unwrap(), Outcome::Analyzed(_)));

        let Outcome::Generated(resources) = pipeline.dispatch("generate", &ctx).await.unwrap() else {
            panic!("expected resources");
        };
        assert_eq!(resources.backend, "local");
        assert_eq!(resources.of_kind("local_process").count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_mode_fails_before_building() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = context(Arc::clone(&storage));
        let (raw, _) = pipeline();
        // a cyclic or broken graph is never reached
        let err = Pipeline::new(raw).dispatch("teleport", &ctx).await.unwrap_err();
        assert!(matches!(err, LineageError::UnsupportedMode { ref mode } if mode == "teleport"));
    }
}
