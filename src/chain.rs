//! Fluent chaining: `source.transform(task)?.to(&target)?` and multi-source joins.

use crate::error::{LineageError, Result};
use crate::node::StorageNode;
use crate::step::TransformStep;
use crate::task::Task;
use std::collections::BTreeSet;
use tracing::debug;

impl StorageNode {
    /// Binds this node as the sole input of an upcoming step.
    ///
    /// # Errors
    /// Returns `LineageError::Arity` if `task` does not declare exactly one parameter.
    pub fn transform(&self, task: &Task) -> Result<PendingTransform> {
        let declared = task.params().len();
        if declared != 1 {
            return Err(LineageError::Arity {
                task: task.name().to_string(),
                expected: 1,
                declared,
            });
        }
        Ok(PendingTransform {
            task: task.clone(),
            inputs: vec![(task.params()[0].clone(), self.clone())],
        })
    }

    /// Starts a multi-source join. See [`JoinAccumulator::new`].
    pub fn join<I, S>(sources: I) -> Result<JoinAccumulator>
    where
        I: IntoIterator<Item = (S, StorageNode)>,
        S: Into<String>,
    {
        JoinAccumulator::new(sources)
    }
}

/// A task bound to its inputs, waiting for an output target.
#[derive(Debug)]
pub struct PendingTransform {
    task: Task,
    inputs: Vec<(String, StorageNode)>,
}

impl PendingTransform {
    /// Creates the step and returns the target carrying its lineage.
    ///
    /// # Errors
    /// Returns `LineageError::Overwrite` if `target`, or any handle derived from
    /// the same declaration, already has a producing step.
    pub fn to(self, target: &StorageNode) -> Result<StorageNode> {
        if let Some(existing) = target.current_producer().or_else(|| target.lineage().cloned()) {
            return Err(LineageError::Overwrite {
                node: target.id().to_string(),
                existing_task: existing.task().name().to_string(),
            });
        }
        Ok(self.bind(target, false))
    }

    /// Like [`to`](Self::to), but replaces any existing producer of `target`.
    /// Consumers declared against the replaced step read from the new one.
    pub fn overwrite(self, target: &StorageNode) -> Result<StorageNode> {
        if let Some(existing) = target.current_producer().or_else(|| target.lineage().cloned()) {
            debug!(
                node = %target.id(),
                replaced = existing.task().name(),
                task = self.task.name(),
                "Replacing producer"
            );
        }
        Ok(self.bind(target, true))
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    fn bind(self, target: &StorageNode, replaces: bool) -> StorageNode {
        let step = TransformStep::declare(self.task, self.inputs, target.clone(), replaces);
        debug!(step = %step.id(), label = %step.label(), "Declared step");
        target.register_producer(&step);
        target.with_lineage(step)
    }
}

/// Transient multi-source builder. Becomes a step once `.transform().to()` is called.
#[derive(Debug, Clone)]
pub struct JoinAccumulator {
    sources: Vec<(String, StorageNode)>,
}

impl JoinAccumulator {
    /// # Arguments
    /// * `sources` - Parameter name to node mapping, two or more entries
    ///
    /// # Errors
    /// Returns `LineageError::InvalidJoin` for fewer than two sources or a repeated name.
    pub fn new<I, S>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, StorageNode)>,
        S: Into<String>,
    {
        let mut collected: Vec<(String, StorageNode)> = Vec::new();
        for (name, node) in sources {
            let name = name.into();
            if collected.iter().any(|(n, _)| *n == name) {
                return Err(LineageError::InvalidJoin(format!(
                    "source name '{}' given more than once",
                    name
                )));
            }
            collected.push((name, node));
        }
        if collected.len() < 2 {
            return Err(LineageError::InvalidJoin(format!(
                "a join needs at least two sources, got {}",
                collected.len()
            )));
        }
        Ok(JoinAccumulator { sources: collected })
    }

    /// Source names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Binds the sources to `task` by parameter name.
    ///
    /// # Errors
    /// Returns `LineageError::ParameterMismatch` unless the source names equal the
    /// task's declared parameters exactly.
    pub fn transform(&self, task: &Task) -> Result<PendingTransform> {
        let keys: BTreeSet<&str> = self.keys().collect();
        let params: BTreeSet<&str> = task.params().iter().map(String::as_str).collect();

        if keys != params {
            return Err(LineageError::ParameterMismatch {
                task: task.name().to_string(),
                // sources the task does not take, parameters no source provides
                missing: keys.difference(&params).map(|s| s.to_string()).collect(),
                unexpected: params.difference(&keys).map(|s| s.to_string()).collect(),
            });
        }

        let inputs = task
            .params()
            .iter()
            .filter_map(|param| {
                self.sources
                    .iter()
                    .find(|(name, _)| name == param)
                    .map(|(name, node)| (name.clone(), node.clone()))
            })
            .collect();

        Ok(PendingTransform {
            task: task.clone(),
            inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;

    fn task(name: &str, params: &[&str]) -> Task {
        Task::new(name, params.iter().copied(), |_| Ok(Dataset::default()))
    }

    #[test]
    fn test_transform_requires_single_parameter() {
        let raw = StorageNode::new("raw", "/raw");
        let err = raw.transform(&task("pair", &["a", "b"])).unwrap_err();
        assert!(matches!(
            err,
            LineageError::Arity { expected: 1, declared: 2, .. }
        ));
    }

    #[test]
    fn test_to_returns_target_with_lineage() {
        let raw = StorageNode::new("raw", "/raw");
        let clean = StorageNode::new("clean", "/clean").with_name("Clean", "");
        let produced = raw.transform(&task("f", &["src"])).unwrap().to(&clean).unwrap();

        assert!(produced.same_storage(&clean));
        assert_eq!(produced.display_name(), "Clean");
        let step = produced.lineage().unwrap();
        assert_eq!(step.task().name(), "f");
        assert_eq!(step.input("src").map(|n| n.name()), Some("raw"));
        // target handle itself is unchanged
        assert!(clean.is_source());
    }

    #[test]
    fn test_to_rejects_already_produced_target() {
        let raw = StorageNode::new("raw", "/raw");
        let clean = raw
            .transform(&task("f", &["src"]))
            .unwrap()
            .to(&StorageNode::new("clean", "/clean"))
            .unwrap();
        let err = raw.transform(&task("g", &["src"])).unwrap().to(&clean).unwrap_err();
        match err {
            LineageError::Overwrite { node, existing_task } => {
                assert_eq!(node, "clean@/clean");
                assert_eq!(existing_task, "f");
            }
            other => panic!("unexpected error: {other}"),
        }

        let replaced = raw.transform(&task("g", &["src"])).unwrap().overwrite(&clean).unwrap();
        assert_eq!(replaced.lineage().unwrap().task().name(), "g");
    }

    #[test]
    fn test_reusing_a_target_declaration_is_rejected() {
        let raw = StorageNode::new("raw", "/raw");
        let clean = StorageNode::new("clean", "/clean");
        let _first = raw.transform(&task("f", &["src"])).unwrap().to(&clean).unwrap();

        // the bare handle has no lineage itself, but its location is taken
        let err = raw.transform(&task("g", &["src"])).unwrap().to(&clean).unwrap_err();
        assert!(matches!(err, LineageError::Overwrite { ref existing_task, .. } if existing_task == "f"));

        let replaced = raw.transform(&task("g", &["src"])).unwrap().overwrite(&clean).unwrap();
        assert!(replaced.lineage().unwrap().replaces());
        let err = raw.transform(&task("h", &["src"])).unwrap().to(&clean).unwrap_err();
        assert!(matches!(err, LineageError::Overwrite { ref existing_task, .. } if existing_task == "g"));
    }

    #[test]
    fn test_join_parameter_mismatch_lists_names() {
        let join = JoinAccumulator::new([
            ("a", StorageNode::new("a", "/a")),
            ("b", StorageNode::new("b", "/b")),
        ])
        .unwrap();
        let err = join.transform(&task("merge", &["a", "c"])).unwrap_err();
        match err {
            LineageError::ParameterMismatch { missing, unexpected, .. } => {
                assert_eq!(missing, vec!["b".to_string()]);
                assert_eq!(unexpected, vec!["c".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_join_inputs_follow_parameter_order() {
        let join = JoinAccumulator::new([
            ("orders", StorageNode::new("orders", "/o")),
            ("customers", StorageNode::new("customers", "/c")),
        ])
        .unwrap();
        let out = join
            .transform(&task("enrich", &["customers", "orders"]))
            .unwrap()
            .to(&StorageNode::new("enriched", "/e"))
            .unwrap();
        let names: Vec<&str> = out
            .lineage()
            .unwrap()
            .inputs()
            .iter()
            .map(|(p, _)| p.as_str())
            .collect();
        assert_eq!(names, vec!["customers", "orders"]);
    }

    #[test]
    fn test_join_rejects_degenerate_sources() {
        let single = JoinAccumulator::new([("a", StorageNode::new("a", "/a"))]);
        assert!(matches!(single, Err(LineageError::InvalidJoin(_))));

        let duplicate = StorageNode::join([
            ("a", StorageNode::new("a", "/a")),
            ("a", StorageNode::new("b", "/b")),
        ]);
        assert!(matches!(duplicate, Err(LineageError::InvalidJoin(_))));
    }
}
