//! Local backend: directories, processes and log-based alerts on one machine.

use crate::compiler::naming::{sanitize, step_name, storage_name};
use crate::compiler::{Access, Backend, ComputeContext, ComputeTranslation, Resource, ResourceId};
use crate::error::Result;
use crate::node::{StorageConfig, StorageNode};
use crate::step::TransformStep;
use crate::task::Monitoring;
use serde_json::json;
use std::path::PathBuf;

const MAX_NAME: usize = 64;

/// Targets the local machine. Has no scheduler, so schedules do not translate.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// # Arguments
    /// * `root` - Directory storage resources are placed under
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBackend { root: root.into() }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        LocalBackend::new("./lineage-data")
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn name_for(&self, node: &StorageNode) -> String {
        storage_name(node, MAX_NAME, '-')
    }

    fn translate_storage(&self, node: &StorageNode, config: &StorageConfig) -> Result<Resource> {
        let name = self.name_for(node);
        let path = self.root.join(&name);
        let mut resource = Resource::new("local_directory", name)
            .with("path", path.to_string_lossy().into_owned())
            .with("class", config.class.as_str())
            .with("format", config.format.extension())
            .with("keep_versions", config.versioned);
        if let Some(days) = config.retention_days {
            resource.set("retention_days", days);
        }
        Ok(resource)
    }

    fn translate_compute(&self, ctx: &ComputeContext<'_>) -> Result<ComputeTranslation> {
        let step = ctx.step;
        let resource = step.resource();
        let name = step_name(step, MAX_NAME, '-');

        let compute = Resource::new("local_process", name.clone())
            .with("task", step.task().name())
            .with("command", json!(["lineage", "run", "--task", step.task().name()]))
            .with("threads", resource.concurrency.max(1))
            .with("memory_mb", resource.memory_mb)
            .with("timeout_secs", resource.timeout_secs)
            .with("requested_kind", resource.kind.as_str());

        let access = ctx
            .translated()
            .map(|(binding, storage)| {
                let mode = match binding.access {
                    Access::Read => "r",
                    Access::Write => "rw",
                };
                Resource::new(
                    "local_file_permission",
                    format!("{}-{}", name, sanitize(&storage.name, MAX_NAME, '-')),
                )
                .with("path", storage.property("path").cloned().unwrap_or_default())
                .with("mode", mode)
                .depends_on(storage.id())
            })
            .collect();

        Ok(ComputeTranslation { compute, access })
    }

    fn translate_monitoring(
        &self,
        step: &TransformStep,
        monitoring: &Monitoring,
        _compute: &ResourceId,
    ) -> Result<Vec<Resource>> {
        let name = format!("{}-alerts", step_name(step, MAX_NAME - 7, '-'));
        let log_file = self.root.join("logs").join(format!("{}.log", step_name(step, MAX_NAME, '-')));
        let mut alert = Resource::new("local_log_alert", name)
            .with("log_file", log_file.to_string_lossy().into_owned())
            .with("alert_on_failure", monitoring.alert_on_failure)
            .with("notify", monitoring.notify.clone());
        if let Some(secs) = monitoring.max_duration_secs {
            alert.set("max_duration_secs", secs);
        }
        Ok(vec![alert])
    }
}
