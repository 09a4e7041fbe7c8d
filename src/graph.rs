//! Lineage Graph
//!
//! Builds a validated, topologically ordered DAG of transform steps from
//! terminal storage nodes, and renders it for inspection.

pub mod core;
pub mod visualization;

pub use self::core::{GraphVertex, LineageGraph};
pub use self::visualization::{
    GraphMetadata, GraphVisualization, VisualizationEdge, VisualizationKind, VisualizationNode,
};
