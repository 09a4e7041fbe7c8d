//! Lineage graph construction: backward walk, cycle detection and
//! deterministic topological ordering.

use crate::error::{LineageError, Result};
use crate::node::{StorageId, StorageNode};
use crate::step::{StepId, TransformStep};
use daggy::{Dag, NodeIndex, Walker};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Vertex of the bipartite lineage DAG.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GraphVertex {
    Storage(StorageId),
    Step(StepId),
}

/// Validated, topologically ordered view of everything reachable backward from
/// one or more terminal nodes.
///
/// Recomputed on every build; never persisted.
#[derive(Debug)]
pub struct LineageGraph {
    /// Terminal node ids, in the order given to the builder
    terminals: Vec<StorageId>,
    /// Canonical handle per storage identity
    nodes: Vec<StorageNode>,
    node_index: HashMap<StorageId, usize>,
    /// Steps in execution order
    steps: Vec<Arc<TransformStep>>,
    position: HashMap<StepId, usize>,
    /// Node id to the position of its producing step
    producers: HashMap<StorageId, usize>,
    /// Underlying daggy DAG (storage -> step -> storage)
    dag: Dag<GraphVertex, ()>,
    storage_vertex: HashMap<StorageId, NodeIndex>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

impl LineageGraph {
    /// Builds the graph rooted at a single terminal node.
    ///
    /// # Errors
    /// * `CyclicLineage` if a node transitively depends on itself
    /// * `Overwrite` if two aliases of one node carry different producers
    pub fn build(terminal: &StorageNode) -> Result<Self> {
        Self::build_all(std::slice::from_ref(terminal))
    }

    /// Builds the graph rooted at several terminal nodes.
    pub fn build_all(terminals: &[StorageNode]) -> Result<Self> {
        let (handles, producers) = Self::collect(terminals)?;
        let terminal_ids: Vec<StorageId> = terminals.iter().map(|t| t.id().clone()).collect();

        Self::detect_cycle(&terminal_ids, &producers)?;
        let steps = Self::topological_order(&producers)?;

        let mut graph = LineageGraph {
            terminals: terminal_ids,
            nodes: Vec::new(),
            node_index: HashMap::new(),
            steps: Vec::with_capacity(steps.len()),
            position: HashMap::new(),
            producers: HashMap::new(),
            dag: Dag::new(),
            storage_vertex: HashMap::new(),
        };

        for step in steps {
            let position = graph.steps.len();
            let step_vertex = graph.dag.add_node(GraphVertex::Step(step.id()));

            for (_, input) in step.inputs() {
                let vertex = graph.add_storage(input.id(), &handles);
                graph
                    .dag
                    .update_edge(vertex, step_vertex, ())
                    .map_err(|_| Self::edge_cycle(input.id(), &step))?;
            }

            let output = step.output().id();
            let vertex = graph.add_storage(output, &handles);
            graph
                .dag
                .update_edge(step_vertex, vertex, ())
                .map_err(|_| Self::edge_cycle(output, &step))?;

            graph.producers.insert(output.clone(), position);
            graph.position.insert(step.id(), position);
            graph.steps.push(step);
        }

        for id in graph.terminals.clone() {
            graph.add_storage(&id, &handles);
        }

        info!(
            steps = graph.steps.len(),
            nodes = graph.nodes.len(),
            terminals = graph.terminals.len(),
            "Built lineage graph"
        );
        Ok(graph)
    }

    /// Walks handles backward, merging aliases and collecting producers.
    ///
    /// A location's producer is the latest step declared into it through any
    /// handle of the same declaration. When aliases still disagree, a later
    /// override wins; two plain producers are a concurrent fan-in.
    #[allow(clippy::type_complexity)]
    fn collect(
        terminals: &[StorageNode],
    ) -> Result<(
        HashMap<StorageId, StorageNode>,
        HashMap<StorageId, Arc<TransformStep>>,
    )> {
        let mut handles: HashMap<StorageId, StorageNode> = HashMap::new();
        let mut producers: HashMap<StorageId, Arc<TransformStep>> = HashMap::new();
        let mut visited: HashSet<StepId> = HashSet::new();
        let mut stack: Vec<StorageNode> = terminals.iter().rev().cloned().collect();

        while let Some(node) = stack.pop() {
            Self::merge_handle(&mut handles, &node);

            let Some(step) = node.current_producer().or_else(|| node.lineage().cloned()) else {
                continue;
            };

            let winner = match producers.get(node.id()) {
                None => step,
                Some(existing) if existing.id() == step.id() => continue,
                Some(existing) => Self::preferred(node.id(), existing, &step)?,
            };
            if visited.insert(winner.id()) {
                stack.extend(winner.inputs().iter().rev().map(|(_, input)| input.clone()));
            }
            producers.insert(node.id().clone(), winner);
        }

        Self::retain_reachable(terminals, &mut producers);
        Ok((handles, producers))
    }

    fn preferred(
        id: &StorageId,
        existing: &Arc<TransformStep>,
        candidate: &Arc<TransformStep>,
    ) -> Result<Arc<TransformStep>> {
        let (older, newer) = if existing.id() < candidate.id() {
            (existing, candidate)
        } else {
            (candidate, existing)
        };
        if newer.replaces() {
            debug!(node = %id, kept = %newer.label(), dropped = %older.label(), "Override supersedes producer");
            Ok(Arc::clone(newer))
        } else {
            Err(LineageError::Overwrite {
                node: id.to_string(),
                existing_task: older.task().name().to_string(),
            })
        }
    }

    /// Drops producers only reachable through a superseded step.
    fn retain_reachable(terminals: &[StorageNode], producers: &mut HashMap<StorageId, Arc<TransformStep>>) {
        let mut reachable: HashSet<StorageId> = HashSet::new();
        let mut stack: Vec<StorageId> = terminals.iter().map(|t| t.id().clone()).collect();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            if let Some(step) = producers.get(&id) {
                stack.extend(step.inputs().iter().map(|(_, input)| input.id().clone()));
            }
        }
        producers.retain(|id, _| reachable.contains(id));
    }

    /// Keeps the most informative handle per identity: lineage first, then
    /// storage declaration, then metadata.
    fn merge_handle(handles: &mut HashMap<StorageId, StorageNode>, node: &StorageNode) {
        fn rank(n: &StorageNode) -> (bool, bool, bool) {
            (n.lineage().is_some(), n.storage().is_some(), n.metadata().is_some())
        }
        match handles.get(node.id()) {
            Some(existing) if rank(existing) >= rank(node) => {}
            _ => {
                handles.insert(node.id().clone(), node.clone());
            }
        }
    }

    /// Depth-first walk over the alias-resolved graph, tracking the active path.
    fn detect_cycle(
        terminals: &[StorageId],
        producers: &HashMap<StorageId, Arc<TransformStep>>,
    ) -> Result<()> {
        fn visit(
            id: &StorageId,
            producers: &HashMap<StorageId, Arc<TransformStep>>,
            marks: &mut HashMap<StorageId, Mark>,
            path: &mut Vec<StorageId>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Active) => {
                    let start = path.iter().position(|p| p == id).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|p| p.name.clone()).collect();
                    cycle.push(id.name.clone());
                    return Err(LineageError::CyclicLineage { path: cycle });
                }
                None => {}
            }

            marks.insert(id.clone(), Mark::Active);
            path.push(id.clone());
            if let Some(step) = producers.get(id) {
                for (_, input) in step.inputs() {
                    visit(input.id(), producers, marks, path)?;
                }
            }
            path.pop();
            marks.insert(id.clone(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for id in terminals {
            visit(id, producers, &mut marks, &mut path)?;
        }
        Ok(())
    }

    /// Kahn's algorithm; ready steps are taken in declaration order.
    fn topological_order(
        producers: &HashMap<StorageId, Arc<TransformStep>>,
    ) -> Result<Vec<Arc<TransformStep>>> {
        let mut by_id: HashMap<StepId, Arc<TransformStep>> = HashMap::new();
        for step in producers.values() {
            by_id.insert(step.id(), Arc::clone(step));
        }

        let mut in_degree: HashMap<StepId, usize> = HashMap::new();
        let mut dependents: HashMap<StepId, Vec<StepId>> = HashMap::new();
        for (id, step) in &by_id {
            let upstream: BTreeSet<StepId> = step
                .inputs()
                .iter()
                .filter_map(|(_, input)| producers.get(input.id()).map(|p| p.id()))
                .collect();
            in_degree.insert(*id, upstream.len());
            for parent in upstream {
                dependents.entry(parent).or_default().push(*id);
            }
        }

        let mut ready: BTreeSet<StepId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(by_id.len());

        while let Some(id) = ready.pop_first() {
            if let Some(children) = dependents.get(&id) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(*child);
                        }
                    }
                }
            }
            if let Some(step) = by_id.remove(&id) {
                order.push(step);
            }
        }

        if !by_id.is_empty() {
            let mut stuck: Vec<String> = by_id.values().map(|s| s.output().name().to_string()).collect();
            stuck.sort();
            return Err(LineageError::CyclicLineage { path: stuck });
        }

        debug!(
            order = ?order.iter().map(|s| s.label()).collect::<Vec<_>>(),
            "Computed execution order"
        );
        Ok(order)
    }

    fn add_storage(&mut self, id: &StorageId, handles: &HashMap<StorageId, StorageNode>) -> NodeIndex {
        if let Some(&vertex) = self.storage_vertex.get(id) {
            return vertex;
        }
        let node = handles
            .get(id)
            .map(StorageNode::bare)
            .unwrap_or_else(|| StorageNode::new(id.name.clone(), id.location.clone()));
        let vertex = self.dag.add_node(GraphVertex::Storage(id.clone()));
        self.storage_vertex.insert(id.clone(), vertex);
        self.node_index.insert(id.clone(), self.nodes.len());
        self.nodes.push(node);
        vertex
    }

    fn edge_cycle(id: &StorageId, step: &TransformStep) -> LineageError {
        LineageError::CyclicLineage {
            path: vec![id.name.clone(), step.output().name().to_string()],
        }
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[Arc<TransformStep>] {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&Arc<TransformStep>> {
        self.position.get(&id).and_then(|&p| self.steps.get(p))
    }

    /// Position of a step in the execution order.
    pub fn position(&self, id: StepId) -> Option<usize> {
        self.position.get(&id).copied()
    }

    /// Every storage node in the graph, one canonical handle per identity.
    ///
    /// Handles returned here carry metadata and storage declarations but no
    /// lineage; use [`producer_of`](Self::producer_of) for that.
    pub fn nodes(&self) -> &[StorageNode] {
        &self.nodes
    }

    pub fn node(&self, id: &StorageId) -> Option<&StorageNode> {
        self.node_index.get(id).and_then(|&i| self.nodes.get(i))
    }

    pub fn terminals(&self) -> &[StorageId] {
        &self.terminals
    }

    pub fn producer_of(&self, id: &StorageId) -> Option<&Arc<TransformStep>> {
        self.producers.get(id).and_then(|&p| self.steps.get(p))
    }

    /// Steps reading `id`, in execution order.
    pub fn consumers_of(&self, id: &StorageId) -> Vec<&Arc<TransformStep>> {
        let Some(&vertex) = self.storage_vertex.get(id) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self
            .dag
            .children(vertex)
            .iter(&self.dag)
            .filter_map(|(_, child)| match self.dag.node_weight(child) {
                Some(GraphVertex::Step(step)) => self.position.get(step).copied(),
                _ => None,
            })
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions.iter().filter_map(|&p| self.steps.get(p)).collect()
    }

    /// Direct producers feeding `id`, in execution order.
    pub fn upstream_steps(&self, id: StepId) -> Vec<StepId> {
        let Some(step) = self.step(id) else {
            return Vec::new();
        };
        let positions: BTreeSet<usize> = step
            .inputs()
            .iter()
            .filter_map(|(_, input)| self.producers.get(input.id()).copied())
            .collect();
        positions
            .into_iter()
            .filter_map(|p| self.steps.get(p).map(|s| s.id()))
            .collect()
    }

    /// Direct consumers of the output of `id`, in execution order.
    pub fn downstream_steps(&self, id: StepId) -> Vec<StepId> {
        match self.step(id) {
            Some(step) => self
                .consumers_of(step.output().id())
                .into_iter()
                .map(|s| s.id())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Nodes with no producing step.
    pub fn sources(&self) -> Vec<&StorageNode> {
        self.nodes
            .iter()
            .filter(|n| !self.producers.contains_key(n.id()))
            .collect()
    }

    /// Nodes no step reads.
    pub fn sinks(&self) -> Vec<&StorageNode> {
        self.nodes.iter().filter(|n| self.is_sink(n.id())).collect()
    }

    pub fn is_sink(&self, id: &StorageId) -> bool {
        self.storage_vertex
            .get(id)
            .map(|&v| self.dag.children(v).iter(&self.dag).next().is_none())
            .unwrap_or(false)
    }

    /// Step-to-step dependency pairs (producer, consumer), in execution order
    /// of the consumer.
    pub fn edges(&self) -> Vec<(StepId, StepId)> {
        self.steps
            .iter()
            .flat_map(|step| {
                self.upstream_steps(step.id())
                    .into_iter()
                    .map(move |parent| (parent, step.id()))
            })
            .collect()
    }

    /// The bipartite daggy DAG backing the graph.
    pub fn dag(&self) -> &Dag<GraphVertex, ()> {
        &self.dag
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
