//! Google Cloud backend: GCS, BigQuery, Dataproc, IAM, Cloud Scheduler and
//! Cloud Monitoring.

use crate::compiler::naming::{digest, sanitize, step_name, storage_name};
use crate::compiler::{
    unsupported, Access, Backend, ComputeContext, ComputeTranslation, Resource, ResourceId,
};
use crate::error::Result;
use crate::node::{StorageClass, StorageConfig, StorageNode};
use crate::resource::ResourceKind;
use crate::step::TransformStep;
use crate::task::{Monitoring, Schedule};
use serde_json::json;

const MAX_NAME: usize = 63;
const DATASET: &str = "lineage";

#[derive(Debug, Clone)]
pub struct DataprocBackend {
    project: String,
    region: String,
}

impl DataprocBackend {
    pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
        DataprocBackend {
            project: project.into(),
            region: region.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn job_name(step: &TransformStep) -> String {
        step_name(step, 50, '-')
    }

    fn service_account(&self, step: &TransformStep) -> (String, String) {
        let output = step.output();
        let account_id = format!("sa-{}", digest(&format!("{}|{}", output.name(), output.location())));
        let email = format!("{}@{}.iam.gserviceaccount.com", account_id, self.project);
        (account_id, email)
    }
}

impl Backend for DataprocBackend {
    fn name(&self) -> &'static str {
        "dataproc"
    }

    fn name_for(&self, node: &StorageNode) -> String {
        storage_name(node, MAX_NAME, '-')
    }

    fn translate_storage(&self, node: &StorageNode, config: &StorageConfig) -> Result<Resource> {
        let name = self.name_for(node);
        match config.class {
            StorageClass::ObjectStore => {
                let mut bucket = Resource::new("google_storage_bucket", name.clone())
                    .with("name", format!("{}-{}", self.project, name))
                    .with("location", self.region.to_uppercase())
                    .with("project", self.project.as_str())
                    .with("versioning", config.versioned)
                    .with("uniform_bucket_level_access", true);
                if let Some(days) = config.retention_days {
                    bucket.set("lifecycle_delete_age_days", days);
                }
                Ok(bucket)
            }
            StorageClass::Table => {
                let table_id = name.replace('-', "_");
                let mut table = Resource::new("google_bigquery_table", name)
                    .with("project", self.project.as_str())
                    .with("dataset_id", DATASET)
                    .with("table_id", table_id);
                if let Some(days) = config.retention_days {
                    table.set("expiration_ms", u64::from(days) * 86_400_000);
                }
                Ok(table)
            }
            StorageClass::Volume => Err(unsupported(self.name(), node.id().to_string(), "volume storage")),
        }
    }

    fn translate_compute(&self, ctx: &ComputeContext<'_>) -> Result<ComputeTranslation> {
        let step = ctx.step;
        let resource = step.resource();
        let name = Self::job_name(step);
        let region = resource.region.as_deref().unwrap_or(&self.region);
        let (account_id, email) = self.service_account(step);
        let job = json!({
            "step_id": sanitize(step.task().name(), MAX_NAME, '-'),
            "main_class": "lineage.Runner",
            "args": ["--task", step.task().name()],
        });

        let compute = match resource.kind {
            ResourceKind::Distributed => Resource::new("google_dataproc_workflow_template", name.clone())
                .with("project", self.project.as_str())
                .with("location", region)
                .with(
                    "cluster",
                    json!({
                        "num_workers": resource.workers,
                        "machine_type": resource.machine_type.as_deref().unwrap_or("n2-standard-4"),
                        "service_account": email,
                    }),
                )
                .with("job", job)
                .with("dag_timeout_secs", resource.timeout_secs),
            ResourceKind::Serverless => Resource::new("google_dataproc_batch", name.clone())
                .with("project", self.project.as_str())
                .with("location", region)
                .with("batch_id", name.as_str())
                .with(
                    "runtime",
                    json!({
                        "executor_memory_mb": resource.memory_mb,
                        "executor_cores": resource.vcpus.into_inner(),
                        "max_executors": resource.concurrency,
                    }),
                )
                .with("job", job)
                .with("service_account", email.as_str())
                .with("ttl_secs", resource.timeout_secs),
            ResourceKind::Local => return Err(unsupported(self.name(), ctx.origin(), "local compute")),
        };

        let account = Resource::new("google_service_account", account_id.clone())
            .with("account_id", account_id)
            .with("project", self.project.as_str())
            .with("display_name", format!("lineage {}", step.label()));
        let account_ref = account.id();
        let member = format!("serviceAccount:{}", email);

        let mut access = vec![account];
        for (binding, storage) in ctx.translated() {
            let policy_name = format!("{}-{}-{}", name, binding.access.as_str(), sanitize(&storage.name, MAX_NAME, '-'));
            let policy = match storage.kind.as_str() {
                "google_bigquery_table" => Resource::new("google_bigquery_table_iam_member", policy_name)
                    .with("dataset_id", DATASET)
                    .with("table_id", storage.property("table_id").cloned().unwrap_or_default())
                    .with(
                        "role",
                        match binding.access {
                            Access::Read => "roles/bigquery.dataViewer",
                            Access::Write => "roles/bigquery.dataEditor",
                        },
                    ),
                _ => Resource::new("google_storage_bucket_iam_member", policy_name)
                    .with("bucket", storage.property("name").cloned().unwrap_or_default())
                    .with(
                        "role",
                        match binding.access {
                            Access::Read => "roles/storage.objectViewer",
                            Access::Write => "roles/storage.objectAdmin",
                        },
                    ),
            };
            access.push(
                policy
                    .with("member", member.as_str())
                    .depends_on(storage.id())
                    .depends_on(account_ref.clone()),
            );
        }

        Ok(ComputeTranslation { compute, access })
    }

    fn translate_schedule(&self, step: &TransformStep, schedule: &Schedule, compute: &ResourceId) -> Result<Resource> {
        let (_, email) = self.service_account(step);
        Ok(
            Resource::new("google_cloud_scheduler_job", format!("{}-schedule", Self::job_name(step)))
                .with("schedule", schedule.cron.as_str())
                .with("time_zone", schedule.timezone.as_deref().unwrap_or("Etc/UTC"))
                .with("region", self.region.as_str())
                .with("target", compute.as_str())
                .with("oauth_service_account_email", email),
        )
    }

    fn translate_monitoring(
        &self,
        step: &TransformStep,
        monitoring: &Monitoring,
        _compute: &ResourceId,
    ) -> Result<Vec<Resource>> {
        let name = Self::job_name(step);
        let mut conditions = Vec::new();
        if monitoring.alert_on_failure {
            conditions.push(json!({
                "display_name": "job failed",
                "filter": format!("resource.type=\"cloud_dataproc_job\" AND metric.label.state=\"ERROR\" AND resource.label.job_id=starts_with(\"{}\")", name),
            }));
        }
        if let Some(secs) = monitoring.max_duration_secs {
            conditions.push(json!({
                "display_name": "job too slow",
                "filter": format!("resource.type=\"cloud_dataproc_job\" AND resource.label.job_id=starts_with(\"{}\")", name),
                "threshold_value": secs,
            }));
        }
        if conditions.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Resource::new("google_monitoring_alert_policy", format!("{}-alerts", name))
            .with("project", self.project.as_str())
            .with("display_name", format!("lineage {}", step.label()))
            .with("conditions", conditions)
            .with("notification_channels", monitoring.notify.clone())])
    }
}
