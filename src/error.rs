//! Error taxonomy for lineage construction, execution and compilation.

use thiserror::Error;

/// Canonical result type for the crate.
pub type Result<T> = std::result::Result<T, LineageError>;

/// Error type returned by a task body.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Every failure the engine can report. Structural variants are raised while the
/// graph is being declared or built, before any step runs.
#[derive(Debug, Error)]
pub enum LineageError {
    /// A node transitively depends on itself.
    #[error("cyclic lineage: {}", path.join(" -> "))]
    CyclicLineage { path: Vec<String> },

    /// Join keys and task parameters differ.
    #[error(
        "parameter mismatch for task '{task}': missing [{}], unexpected [{}]",
        missing.join(", "),
        unexpected.join(", ")
    )]
    ParameterMismatch {
        task: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// A single-source chain was bound to a task that does not take exactly one input.
    #[error("task '{task}' declares {declared} parameter(s) but a single-source transform requires {expected}")]
    Arity {
        task: String,
        expected: usize,
        declared: usize,
    },

    /// The target node already has a producing step.
    #[error("node '{node}' is already produced by task '{existing_task}'; use overwrite to replace it")]
    Overwrite { node: String, existing_task: String },

    /// A join accumulator was built from an invalid source mapping.
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// The execution mode string is not recognised.
    #[error("unsupported mode '{mode}' (expected one of: local, cloud, analyze, generate)")]
    UnsupportedMode { mode: String },

    /// A task failed at run time.
    #[error("step {step} (task '{task}') failed: {cause}")]
    Execution {
        step: String,
        task: String,
        #[source]
        cause: TaskError,
    },

    /// A backend cannot translate a feature requested by a node.
    #[error("backend '{backend}' cannot translate {capability} for '{node}'")]
    Compilation {
        node: String,
        capability: String,
        backend: String,
    },

    /// Reading or writing a storage location failed.
    #[error("storage error at '{location}': {reason}")]
    Storage { location: String, reason: String },

    /// The run was cancelled before every step was scheduled.
    #[error("run cancelled after {} completed step(s)", completed.len())]
    Cancelled { completed: Vec<String> },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LineageError {
    pub(crate) fn storage(location: impl Into<String>, reason: impl ToString) -> Self {
        LineageError::Storage {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors detected while declaring or building the graph.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            LineageError::CyclicLineage { .. }
                | LineageError::ParameterMismatch { .. }
                | LineageError::Arity { .. }
                | LineageError::Overwrite { .. }
                | LineageError::InvalidJoin(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_mismatch_lists_both_sides() {
        let err = LineageError::ParameterMismatch {
            task: "merge".to_string(),
            missing: vec!["b".to_string()],
            unexpected: vec!["c".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("merge"));
        assert!(msg.contains("missing [b]"));
        assert!(msg.contains("unexpected [c]"));
        assert!(err.is_structural());
    }

    #[test]
    fn test_cycle_message_names_path() {
        let err = LineageError::CyclicLineage {
            path: vec!["raw".into(), "clean".into(), "raw".into()],
        };
        assert_eq!(err.to_string(), "cyclic lineage: raw -> clean -> raw");
    }

    #[test]
    fn test_execution_error_keeps_source() {
        let cause: TaskError = "boom".into();
        let err = LineageError::Execution {
            step: "#3".into(),
            task: "clean".into(),
            cause,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_structural());
    }
}
