//! Static analysis of a lineage graph: per-step cost and latency estimates,
//! totals, critical path and a visualization, without running any task.

use crate::graph::LineageGraph;
use crate::resource::{ExecutionResource, ResourceKind};
use crate::step::StepId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Prices and latencies used for estimates. Defaults approximate public
/// on-demand pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// USD per GB-second of serverless memory
    pub serverless_gb_second_usd: f64,
    /// USD per serverless invocation
    pub serverless_request_usd: f64,
    pub serverless_cold_start_secs: f64,
    /// USD per cluster node hour (driver counts as one node)
    pub distributed_node_hour_usd: f64,
    pub distributed_startup_secs: f64,
    /// Runtime assumed when a resource has no duration hint
    pub default_local_secs: f64,
    pub default_serverless_secs: f64,
    pub default_distributed_secs: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel {
            serverless_gb_second_usd: 0.000_016_666_7,
            serverless_request_usd: 0.000_000_2,
            serverless_cold_start_secs: 1.0,
            distributed_node_hour_usd: 0.19,
            distributed_startup_secs: 90.0,
            default_local_secs: 60.0,
            default_serverless_secs: 30.0,
            default_distributed_secs: 600.0,
        }
    }
}

impl CostModel {
    fn duration(&self, resource: &ExecutionResource) -> f64 {
        match resource.expected_duration_secs {
            Some(secs) => secs as f64,
            None => match resource.kind {
                ResourceKind::Local => self.default_local_secs,
                ResourceKind::Serverless => self.default_serverless_secs,
                ResourceKind::Distributed => self.default_distributed_secs,
            },
        }
    }

    /// Returns (runtime, cost in USD, latency) for one run of a step.
    pub fn estimate(&self, resource: &ExecutionResource) -> (f64, f64, f64) {
        let runtime = self.duration(resource);
        match resource.kind {
            ResourceKind::Local => (runtime, 0.0, runtime),
            ResourceKind::Serverless => {
                let gb = resource.memory_mb as f64 / 1024.0;
                let cost = gb * runtime * self.serverless_gb_second_usd + self.serverless_request_usd;
                (runtime, cost, self.serverless_cold_start_secs + runtime)
            }
            ResourceKind::Distributed => {
                let nodes = resource.workers as f64 + 1.0;
                let billed_hours = (self.distributed_startup_secs + runtime) / 3600.0;
                let cost = nodes * self.distributed_node_hour_usd * billed_hours;
                (runtime, cost, self.distributed_startup_secs + runtime)
            }
        }
    }
}

/// Estimate for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEstimate {
    pub step: StepId,
    /// Position in the execution order
    pub order: usize,
    pub task: String,
    pub output: String,
    pub resource: String,
    pub kind: ResourceKind,
    pub runtime_secs: f64,
    pub cost_usd: f64,
    pub latency_secs: f64,
    /// Earliest finish time if every step starts as soon as its producers finish
    pub finish_secs: f64,
}

/// Full analysis of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub steps: Vec<StepEstimate>,
    pub total_cost_usd: f64,
    /// Sum of step latencies
    pub sequential_latency_secs: f64,
    /// Longest dependency chain
    pub critical_path_latency_secs: f64,
    /// Tasks on the critical path, first to last
    pub critical_path: Vec<String>,
    /// Mermaid flowchart of the graph
    pub visualization: String,
}

impl AnalysisReport {
    pub fn step(&self, id: StepId) -> Option<&StepEstimate> {
        self.steps.iter().find(|s| s.step == id)
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<4} {:<24} {:<24} {:<12} {:>10} {:>12}",
            "#", "task", "output", "kind", "latency_s", "cost_usd"
        )?;
        for s in &self.steps {
            writeln!(
                f,
                "{:<4} {:<24} {:<24} {:<12} {:>10.1} {:>12.6}",
                s.order + 1,
                s.task,
                s.output,
                s.kind,
                s.latency_secs,
                s.cost_usd
            )?;
        }
        writeln!(f, "total cost:            ${:.6}", self.total_cost_usd)?;
        writeln!(f, "sequential latency:    {:.1}s", self.sequential_latency_secs)?;
        writeln!(f, "critical path latency: {:.1}s", self.critical_path_latency_secs)?;
        write!(f, "critical path:         {}", self.critical_path.join(" -> "))
    }
}

/// Produces analysis reports from the graph's static configuration.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    model: CostModel,
}

impl Analyzer {
    pub fn new(model: CostModel) -> Self {
        Analyzer { model }
    }

    pub fn model(&self) -> &CostModel {
        &self.model
    }

    /// Analyzes `graph` without invoking any task body.
    pub fn analyze(&self, graph: &LineageGraph) -> AnalysisReport {
        let mut finish: HashMap<StepId, f64> = HashMap::new();
        let mut via: HashMap<StepId, StepId> = HashMap::new();
        let mut steps = Vec::with_capacity(graph.len());

        for (order, step) in graph.steps().iter().enumerate() {
            let resource = step.resource();
            let (runtime, cost, latency) = self.model.estimate(resource);

            let mut start = 0.0;
            let mut slowest_parent = None;
            for parent in graph.upstream_steps(step.id()) {
                let parent_finish = finish.get(&parent).copied().unwrap_or(0.0);
                if slowest_parent.is_none() || parent_finish > start {
                    start = parent_finish;
                    slowest_parent = Some(parent);
                }
            }
            if let Some(parent) = slowest_parent {
                via.insert(step.id(), parent);
            }
            let done = start + latency;
            finish.insert(step.id(), done);

            steps.push(StepEstimate {
                step: step.id(),
                order,
                task: step.task().name().to_string(),
                output: step.output().display_name().to_string(),
                resource: resource.name.clone(),
                kind: resource.kind,
                runtime_secs: runtime,
                cost_usd: cost,
                latency_secs: latency,
                finish_secs: done,
            });
        }

        let total_cost_usd: f64 = steps.iter().map(|s| s.cost_usd).sum();
        let sequential_latency_secs: f64 = steps.iter().map(|s| s.latency_secs).sum();

        // walk back from the latest-finishing step; ties go to the earlier step
        let mut critical_path = Vec::new();
        let mut critical_path_latency_secs = 0.0;
        if let Some(last) = steps
            .iter()
            .fold(None::<&StepEstimate>, |best, s| match best {
                Some(b) if b.finish_secs >= s.finish_secs => Some(b),
                _ => Some(s),
            })
        {
            critical_path_latency_secs = last.finish_secs;
            let mut cursor = Some(last.step);
            while let Some(id) = cursor {
                if let Some(s) = steps.iter().find(|s| s.step == id) {
                    critical_path.push(s.task.clone());
                }
                cursor = via.get(&id).copied();
            }
            critical_path.reverse();
        }

        debug!(
            steps = steps.len(),
            total_cost_usd,
            critical_path_latency_secs,
            "Analyzed lineage graph"
        );

        AnalysisReport {
            steps,
            total_cost_usd,
            sequential_latency_secs,
            critical_path_latency_secs,
            critical_path,
            visualization: graph.to_mermaid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::JoinAccumulator;
    use crate::dataset::Dataset;
    use crate::node::StorageNode;
    use crate::task::Task;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_cost_formulas() {
        let model = CostModel::default();

        let (_, cost, latency) = model.estimate(&ExecutionResource::local("l").with_expected_duration_secs(10));
        assert_eq!(cost, 0.0);
        assert_eq!(latency, 10.0);

        let fn_res = ExecutionResource::serverless("fn")
            .with_memory_mb(2048)
            .with_expected_duration_secs(10);
        let (_, cost, latency) = model.estimate(&fn_res);
        assert!(approx(cost, 2.0 * 10.0 * model.serverless_gb_second_usd + model.serverless_request_usd));
        assert_eq!(latency, 11.0);

        let cluster = ExecutionResource::distributed("spark", 3).with_expected_duration_secs(270);
        let (_, cost, latency) = model.estimate(&cluster);
        assert!(approx(cost, 4.0 * model.distributed_node_hour_usd * 0.1));
        assert_eq!(latency, 360.0);
    }

    #[test]
    fn test_critical_path_through_diamond() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let make = move |name: &str, secs: u64| {
            let counter = Arc::clone(&counter);
            Task::new(name, ["src"], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Dataset::default())
            })
            .on(ExecutionResource::local("l").with_expected_duration_secs(secs))
        };

        let raw = StorageNode::new("raw", "/raw");
        let a = raw.transform(&make("a", 5)).unwrap().to(&StorageNode::new("a", "/a")).unwrap();
        let b = a.transform(&make("b", 20)).unwrap().to(&StorageNode::new("b", "/b")).unwrap();
        let c = a.transform(&make("c", 3)).unwrap().to(&StorageNode::new("c", "/c")).unwrap();
        let d_task = Task::new("d", ["b", "c"], |_| Ok(Dataset::default()))
            .on(ExecutionResource::local("l").with_expected_duration_secs(1));
        let d = JoinAccumulator::new([("b", b), ("c", c)])
            .unwrap()
            .transform(&d_task)
            .unwrap()
            .to(&StorageNode::new("d", "/d"))
            .unwrap();

        let report = Analyzer::default().analyze(&LineageGraph::build(&d).unwrap());
        assert_eq!(report.steps.len(), 4);
        assert_eq!(report.sequential_latency_secs, 29.0);
        assert_eq!(report.critical_path_latency_secs, 26.0);
        assert_eq!(report.critical_path, vec!["a", "b", "d"]);
        assert_eq!(report.total_cost_usd, 0.0);
        assert!(report.visualization.starts_with("flowchart LR"));
        // no task body was invoked
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let table = report.to_string();
        assert!(table.contains("critical path:         a -> b -> d"));
    }

    #[test]
    fn test_report_serializes() {
        let out = StorageNode::new("raw", "/raw")
            .transform(&Task::new("f", ["x"], |_| Ok(Dataset::default())))
            .unwrap()
            .to(&StorageNode::new("out", "/out"))
            .unwrap();
        let report = Analyzer::default().analyze(&LineageGraph::build(&out).unwrap());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["kind"], "local");
        assert_eq!(json["critical_path"][0], "f");
    }
}
