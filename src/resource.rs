//! Execution resources: the compute target a transform step is bound to.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of compute engine a step runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// In-process on the machine driving the pipeline
    Local,
    /// Function-as-a-service runtime
    Serverless,
    /// Cluster engine (Spark-like)
    Distributed,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Local => "local",
            ResourceKind::Serverless => "serverless",
            ResourceKind::Distributed => "distributed",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Named compute-target configuration.
///
/// Only the fields relevant to `kind` are meaningful; the rest keep their
/// defaults. Backends size compute resources from these values and the
/// analyzer derives its estimates from them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionResource {
    /// Resource name (e.g., "etl-small")
    pub name: String,
    /// Engine class
    pub kind: ResourceKind,
    /// Memory per executor in MiB
    pub memory_mb: u32,
    /// vCPUs per executor
    pub vcpus: OrderedFloat<f64>,
    /// Maximum concurrent invocations (serverless) or threads (local)
    pub concurrency: u32,
    /// Worker count (distributed)
    pub workers: u32,
    /// Machine type for cluster workers
    pub machine_type: Option<String>,
    /// Region override
    pub region: Option<String>,
    /// Hard timeout in seconds
    pub timeout_secs: u64,
    /// Static runtime hint used for cost and latency estimates
    pub expected_duration_secs: Option<u64>,
}

impl ExecutionResource {
    fn base(name: impl Into<String>, kind: ResourceKind) -> Self {
        ExecutionResource {
            name: name.into(),
            kind,
            memory_mb: 1024,
            vcpus: OrderedFloat(1.0),
            concurrency: 1,
            workers: 0,
            machine_type: None,
            region: None,
            timeout_secs: 900,
            expected_duration_secs: None,
        }
    }

    /// In-process execution.
    pub fn local(name: impl Into<String>) -> Self {
        Self::base(name, ResourceKind::Local)
    }

    /// Serverless function with default sizing (1 GiB, 1 concurrent invocation).
    pub fn serverless(name: impl Into<String>) -> Self {
        Self::base(name, ResourceKind::Serverless)
    }

    /// Distributed cluster with the given number of workers.
    pub fn distributed(name: impl Into<String>, workers: u32) -> Self {
        let mut resource = Self::base(name, ResourceKind::Distributed);
        resource.workers = workers.max(1);
        resource.memory_mb = 8192;
        resource.vcpus = OrderedFloat(4.0);
        resource.machine_type = Some("n2-standard-4".to_string());
        resource.timeout_secs = 3600;
        resource
    }

    pub fn with_memory_mb(mut self, memory_mb: u32) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_vcpus(mut self, vcpus: f64) -> Self {
        self.vcpus = OrderedFloat(vcpus);
        self
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_type = Some(machine_type.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_expected_duration_secs(mut self, secs: u64) -> Self {
        self.expected_duration_secs = Some(secs);
        self
    }
}

impl Default for ExecutionResource {
    fn default() -> Self {
        ExecutionResource::local("local")
    }
}

impl fmt::Display for ExecutionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::Local => write!(f, "{} (local)", self.name),
            ResourceKind::Serverless => write!(
                f,
                "{} (serverless, {} MiB x{})",
                self.name, self.memory_mb, self.concurrency
            ),
            ResourceKind::Distributed => write!(
                f,
                "{} (distributed, {} x {})",
                self.name,
                self.workers,
                self.machine_type.as_deref().unwrap_or("default")
            ),
        }
    }
}
