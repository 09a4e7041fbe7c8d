//! Lineage Graph Visualization
//!
//! Serializable node/edge structures plus Mermaid and Graphviz DOT renderings.
//! Output depends only on the execution order, so it is stable across runs.

use crate::graph::LineageGraph;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Vertex kind in a visualization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    Storage,
    Step,
}

/// Represents a node in the lineage visualization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationNode {
    /// Stable vertex id ("n0", "s1", ...)
    pub id: String,
    pub kind: VisualizationKind,
    /// Display name (storage) or task name (step)
    pub label: String,
    /// Storage location, for storage vertices
    pub location: Option<String>,
    /// Bound resource, for step vertices
    pub resource: Option<String>,
    /// Position in the execution order, for step vertices
    pub order: Option<usize>,
    pub description: Option<String>,
}

/// Represents an edge in the lineage visualization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationEdge {
    pub source: String,
    pub target: String,
    /// Parameter name for input edges
    pub label: Option<String>,
}

/// Summary counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub node_count: usize,
    pub step_count: usize,
    pub edge_count: usize,
    pub terminals: Vec<String>,
}

/// Complete lineage visualization structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphVisualization {
    pub nodes: Vec<VisualizationNode>,
    pub edges: Vec<VisualizationEdge>,
    pub metadata: GraphMetadata,
}

fn storage_key(index: usize) -> String {
    format!("n{}", index)
}

fn step_key(position: usize) -> String {
    format!("s{}", position)
}

fn escape(label: &str) -> String {
    label.replace('"', "'")
}

impl LineageGraph {
    fn storage_key_of(&self, id: &crate::node::StorageId) -> Option<String> {
        self.nodes().iter().position(|n| n.id() == id).map(storage_key)
    }

    /// Converts the graph into a serializable visualization structure.
    pub fn to_visualization(&self) -> GraphVisualization {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        for (index, node) in self.nodes().iter().enumerate() {
            nodes.push(VisualizationNode {
                id: storage_key(index),
                kind: VisualizationKind::Storage,
                label: node.display_name().to_string(),
                location: Some(node.location().to_string()),
                resource: None,
                order: None,
                description: node.metadata().and_then(|m| m.description.clone()),
            });
        }

        for (position, step) in self.steps().iter().enumerate() {
            let key = step_key(position);
            nodes.push(VisualizationNode {
                id: key.clone(),
                kind: VisualizationKind::Step,
                label: step.task().name().to_string(),
                location: None,
                resource: Some(step.resource().to_string()),
                order: Some(position),
                description: None,
            });
            for (param, input) in step.inputs() {
                if let Some(source) = self.storage_key_of(input.id()) {
                    edges.push(VisualizationEdge {
                        source,
                        target: key.clone(),
                        label: Some(param.clone()),
                    });
                }
            }
            if let Some(target) = self.storage_key_of(step.output().id()) {
                edges.push(VisualizationEdge {
                    source: key,
                    target,
                    label: None,
                });
            }
        }

        let metadata = GraphMetadata {
            node_count: self.nodes().len(),
            step_count: self.steps().len(),
            edge_count: edges.len(),
            terminals: self.terminals().iter().map(|t| t.to_string()).collect(),
        };

        GraphVisualization {
            nodes,
            edges,
            metadata,
        }
    }

    /// Renders a Mermaid flowchart (left to right).
    pub fn to_mermaid(&self) -> String {
        let viz = self.to_visualization();
        let mut out = String::from("flowchart LR\n");
        for node in &viz.nodes {
            let label = escape(&node.label);
            let _ = match node.kind {
                VisualizationKind::Storage => writeln!(out, "    {}[(\"{}\")]", node.id, label),
                VisualizationKind::Step => match node.order {
                    Some(order) => writeln!(out, "    {}[\"{}. {}\"]", node.id, order + 1, label),
                    None => writeln!(out, "    {}[\"{}\"]", node.id, label),
                },
            };
        }
        for edge in &viz.edges {
            let _ = match &edge.label {
                Some(label) => writeln!(out, "    {} -->|{}| {}", edge.source, escape(label), edge.target),
                None => writeln!(out, "    {} --> {}", edge.source, edge.target),
            };
        }
        out
    }

    /// Renders a Graphviz DOT digraph.
    pub fn to_dot(&self) -> String {
        let viz = self.to_visualization();
        let mut out = String::from("digraph lineage {\n    rankdir=LR;\n");
        for node in &viz.nodes {
            let shape = match node.kind {
                VisualizationKind::Storage => "cylinder",
                VisualizationKind::Step => "box",
            };
            let _ = writeln!(out, "    {} [label=\"{}\", shape={}];", node.id, escape(&node.label), shape);
        }
        for edge in &viz.edges {
            let _ = match &edge.label {
                Some(label) => writeln!(out, "    {} -> {} [label=\"{}\"];", edge.source, edge.target, escape(label)),
                None => writeln!(out, "    {} -> {};", edge.source, edge.target),
            };
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::dataset::Dataset;
    use crate::graph::LineageGraph;
    use crate::node::StorageNode;
    use crate::task::Task;

    fn graph() -> LineageGraph {
        let task = Task::new("clean", ["src"], |_| Ok(Dataset::default()));
        let out = StorageNode::new("raw", "/raw")
            .transform(&task)
            .unwrap()
            .to(&StorageNode::new("clean", "/clean").with_name("Clean orders", "deduplicated"))
            .unwrap();
        LineageGraph::build(&out).unwrap()
    }

    #[test]
    fn test_visualization_counts() {
        let viz = graph().to_visualization();
        assert_eq!(viz.metadata.node_count, 2);
        assert_eq!(viz.metadata.step_count, 1);
        assert_eq!(viz.edges.len(), 2);
        assert_eq!(viz.edges[0].label.as_deref(), Some("src"));
        assert_eq!(viz.metadata.terminals, vec!["clean@/clean".to_string()]);
    }

    #[test]
    fn test_mermaid_is_stable() {
        let g = graph();
        let first = g.to_mermaid();
        assert_eq!(first, g.to_mermaid());
        assert!(first.starts_with("flowchart LR\n"));
        assert!(first.contains("n1[(\"Clean orders\")]"));
        assert!(first.contains("s0[\"1. clean\"]"));
        assert!(first.contains("n0 -->|src| s0"));
        assert!(first.contains("s0 --> n1"));
    }

    #[test]
    fn test_dot_output() {
        let dot = graph().to_dot();
        assert!(dot.starts_with("digraph lineage {"));
        assert!(dot.contains("shape=cylinder"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
