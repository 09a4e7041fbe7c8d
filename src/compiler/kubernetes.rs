//! Kubernetes backend: claims, jobs, RBAC, cron jobs and Prometheus rules.

use crate::compiler::naming::{step_name, storage_name};
use crate::compiler::{
    unsupported, Access, Backend, ComputeContext, ComputeTranslation, Resource, ResourceId,
};
use crate::error::Result;
use crate::node::{StorageClass, StorageConfig, StorageNode};
use crate::step::TransformStep;
use crate::task::{Monitoring, Schedule};
use serde_json::{json, Value};

/// CronJob names are capped at 52 characters so generated Job names fit 63.
const MAX_NAME: usize = 52;

#[derive(Debug, Clone)]
pub struct KubernetesBackend {
    namespace: String,
    image: String,
}

impl KubernetesBackend {
    /// # Arguments
    /// * `namespace` - Namespace every resource is created in
    /// * `image` - Container image running the task bodies
    pub fn new(namespace: impl Into<String>, image: impl Into<String>) -> Self {
        KubernetesBackend {
            namespace: namespace.into(),
            image: image.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn job_name(step: &TransformStep) -> String {
        step_name(step, MAX_NAME, '-')
    }
}

impl Default for KubernetesBackend {
    fn default() -> Self {
        KubernetesBackend::new("lineage", "ghcr.io/lineage/runner:latest")
    }
}

impl Backend for KubernetesBackend {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn name_for(&self, node: &StorageNode) -> String {
        storage_name(node, MAX_NAME, '-')
    }

    fn translate_storage(&self, node: &StorageNode, config: &StorageConfig) -> Result<Resource> {
        let storage_class = match config.class {
            StorageClass::Volume => "standard",
            StorageClass::ObjectStore => "csi-s3",
            StorageClass::Table => {
                return Err(unsupported(self.name(), node.id().to_string(), "table storage"));
            }
        };
        Ok(Resource::new("kubernetes_persistent_volume_claim", self.name_for(node))
            .with("namespace", self.namespace.as_str())
            .with("storage_class_name", storage_class)
            .with("access_modes", json!(["ReadWriteMany"]))
            .with("storage", "10Gi")
            .with("format", config.format.extension()))
    }

    fn translate_compute(&self, ctx: &ComputeContext<'_>) -> Result<ComputeTranslation> {
        let step = ctx.step;
        let resource = step.resource();
        let name = Self::job_name(step);

        let volumes: Vec<Value> = ctx
            .translated()
            .map(|(binding, claim)| {
                json!({
                    "claim_name": claim.name,
                    "mount_path": format!("/data/{}", binding.node.name()),
                    "read_only": binding.access == Access::Read,
                })
            })
            .collect();

        let service_account = Resource::new("kubernetes_service_account", name.clone())
            .with("namespace", self.namespace.as_str());
        let claims: Vec<&str> = ctx.translated().map(|(_, claim)| claim.name.as_str()).collect();
        let mut role = Resource::new("kubernetes_role", name.clone())
            .with("namespace", self.namespace.as_str())
            .with(
                "rules",
                json!([{
                    "api_groups": [""],
                    "resources": ["persistentvolumeclaims"],
                    "resource_names": claims,
                    "verbs": ["get"],
                }]),
            );
        for (_, claim) in ctx.translated() {
            role.add_dependency(claim.id());
        }
        let binding = Resource::new("kubernetes_role_binding", name.clone())
            .with("namespace", self.namespace.as_str())
            .with("role", name.as_str())
            .with("subject", name.as_str())
            .depends_on(role.id())
            .depends_on(service_account.id());

        let compute = Resource::new("kubernetes_job", name.clone())
            .with("namespace", self.namespace.as_str())
            .with("image", self.image.as_str())
            .with("args", json!(["run", "--task", step.task().name()]))
            .with("parallelism", resource.workers.max(resource.concurrency).max(1))
            .with("cpu", resource.vcpus.into_inner())
            .with("memory", format!("{}Mi", resource.memory_mb))
            .with("active_deadline_seconds", resource.timeout_secs)
            .with("service_account_name", name.as_str())
            .with("volumes", volumes);

        Ok(ComputeTranslation {
            compute,
            access: vec![service_account, role, binding],
        })
    }

    fn translate_schedule(&self, step: &TransformStep, schedule: &Schedule, compute: &ResourceId) -> Result<Resource> {
        let mut cron = Resource::new("kubernetes_cron_job", Self::job_name(step))
            .with("namespace", self.namespace.as_str())
            .with("schedule", schedule.cron.as_str())
            .with("concurrency_policy", "Forbid")
            .with("job_template", compute.as_str());
        if let Some(tz) = &schedule.timezone {
            cron.set("time_zone", tz.as_str());
        }
        Ok(cron)
    }

    fn translate_monitoring(
        &self,
        step: &TransformStep,
        monitoring: &Monitoring,
        _compute: &ResourceId,
    ) -> Result<Vec<Resource>> {
        let name = Self::job_name(step);
        let mut rules = Vec::new();
        if monitoring.alert_on_failure {
            rules.push(json!({
                "alert": "LineageJobFailed",
                "expr": format!("kube_job_status_failed{{namespace=\"{}\",job_name=~\"{}.*\"}} > 0", self.namespace, name),
            }));
        }
        if let Some(secs) = monitoring.max_duration_secs {
            rules.push(json!({
                "alert": "LineageJobSlow",
                "expr": format!(
                    "time() - kube_job_status_start_time{{namespace=\"{}\",job_name=~\"{}.*\"}} > {}",
                    self.namespace, name, secs
                ),
            }));
        }
        if rules.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Resource::new("kubernetes_manifest", format!("{}-alerts", name))
            .with("namespace", self.namespace.as_str())
            .with("api_version", "monitoring.coreos.com/v1")
            .with("manifest_kind", "PrometheusRule")
            .with("groups", json!([{ "name": name, "rules": rules }]))
            .with("receivers", monitoring.notify.clone())])
    }
}
