//! Engine configuration.
//!
//! Defaults suit a local run; every field can be overridden from `LINEAGE_*`
//! environment variables.

use crate::error::{LineageError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Which step outputs the executor writes to storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterializePolicy {
    /// Sinks and cross-engine boundaries only
    #[default]
    Boundaries,
    /// Every step output
    All,
}

impl FromStr for MaterializePolicy {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boundaries" => Ok(MaterializePolicy::Boundaries),
            "all" => Ok(MaterializePolicy::All),
            other => Err(LineageError::Config(format!(
                "LINEAGE_MATERIALIZE must be 'boundaries' or 'all', got '{}'",
                other
            ))),
        }
    }
}

/// Runtime configuration shared by the executor, storage and binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum steps running at once
    pub max_workers: usize,
    pub materialize: MaterializePolicy,
    /// Root directory for filesystem storage
    pub storage_root: PathBuf,
    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Default region for cloud backends
    pub region: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            materialize: MaterializePolicy::default(),
            storage_root: PathBuf::from("./lineage-data"),
            log_filter: "info".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    /// Returns `LineageError::Config` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = EngineConfig::default();

        if let Some(s) = lookup("LINEAGE_MAX_WORKERS") {
            let workers: usize = s.trim().parse().map_err(|_| {
                LineageError::Config(format!("LINEAGE_MAX_WORKERS must be a positive integer, got '{}'", s))
            })?;
            if workers == 0 {
                return Err(LineageError::Config("LINEAGE_MAX_WORKERS must be at least 1".to_string()));
            }
            cfg.max_workers = workers;
        }
        if let Some(s) = lookup("LINEAGE_MATERIALIZE") {
            cfg.materialize = s.parse()?;
        }
        if let Some(s) = lookup("LINEAGE_STORAGE_ROOT") {
            cfg.storage_root = PathBuf::from(s);
        }
        if let Some(s) = lookup("LINEAGE_LOG") {
            cfg.log_filter = s;
        }
        if let Some(s) = lookup("LINEAGE_REGION") {
            cfg.region = s;
        }

        Ok(cfg)
    }
}
