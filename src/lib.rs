pub mod analyzer;
pub mod chain;
pub mod compiler;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod graph;
pub mod mode;
pub mod node;
pub mod resource;
pub mod step;
pub mod storage;
pub mod task;
pub mod telemetry;

pub use analyzer::{AnalysisReport, Analyzer, CostModel, StepEstimate};
pub use chain::{JoinAccumulator, PendingTransform};
pub use compiler::{
    AwsBackend, Backend, Compiler, DataprocBackend, KubernetesBackend, LocalBackend, Resource, ResourceGraph,
    ResourceId,
};
pub use config::{EngineConfig, MaterializePolicy};
pub use dataset::Dataset;
pub use error::{LineageError, Result, TaskError};
pub use executor::{ComputeEngine, ExecutionMode, Executor, RunReport, TraceEvent, TraceKind};
pub use graph::{GraphVisualization, LineageGraph};
pub use mode::{Mode, Outcome, Pipeline, RunContext};
pub use node::{DataFormat, NodeMetadata, StorageClass, StorageConfig, StorageId, StorageNode};
pub use resource::{ExecutionResource, ResourceKind};
pub use step::{StepId, TransformStep};
pub use storage::{FsStorage, MemoryStorage, SqliteStorage, Storage};
pub use task::{Monitoring, Schedule, Task, TaskInputs};
pub use telemetry::init_tracing;
