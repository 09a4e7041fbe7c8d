//! AWS backend: S3, Glue, EFS, Lambda, IAM and CloudWatch.

use crate::compiler::naming::{sanitize, step_name, storage_name};
use crate::compiler::{
    step_origin, unsupported, Access, Backend, ComputeContext, ComputeTranslation, Resource, ResourceId,
};
use crate::error::Result;
use crate::node::{StorageClass, StorageConfig, StorageNode};
use crate::resource::ResourceKind;
use crate::step::TransformStep;
use crate::task::{Monitoring, Schedule};
use serde_json::json;
use tracing::warn;

/// Lambda hard limit
const MAX_LAMBDA_TIMEOUT_SECS: u64 = 900;
const MAX_NAME: usize = 63;
/// IAM role policy name limit
const MAX_POLICY_NAME: usize = 128;
const GLUE_DATABASE: &str = "lineage";

#[derive(Debug, Clone)]
pub struct AwsBackend {
    region: String,
}

impl AwsBackend {
    pub fn new(region: impl Into<String>) -> Self {
        AwsBackend { region: region.into() }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn function_name(step: &TransformStep) -> String {
        step_name(step, 64 - "-role".len(), '-')
    }

    fn arn(&self, storage: &Resource) -> Vec<String> {
        match storage.kind.as_str() {
            "aws_s3_bucket" => vec![
                format!("arn:aws:s3:::{}", storage.name),
                format!("arn:aws:s3:::{}/*", storage.name),
            ],
            "aws_glue_catalog_table" => vec![format!(
                "arn:aws:glue:{}:*:table/{}/{}",
                self.region,
                GLUE_DATABASE,
                storage.name.replace('-', "_")
            )],
            _ => vec![format!(
                "arn:aws:elasticfilesystem:{}:*:file-system/{}",
                self.region, storage.name
            )],
        }
    }
}

impl Default for AwsBackend {
    fn default() -> Self {
        AwsBackend::new("us-east-1")
    }
}

fn actions(kind: &str, access: Access) -> Vec<&'static str> {
    match (kind, access) {
        ("aws_s3_bucket", Access::Read) => vec!["s3:GetObject", "s3:ListBucket"],
        ("aws_s3_bucket", Access::Write) => vec!["s3:GetObject", "s3:ListBucket", "s3:PutObject", "s3:DeleteObject"],
        ("aws_glue_catalog_table", Access::Read) => vec!["glue:GetTable", "glue:GetPartitions"],
        ("aws_glue_catalog_table", Access::Write) => {
            vec!["glue:GetTable", "glue:GetPartitions", "glue:UpdateTable", "glue:BatchCreatePartition"]
        }
        (_, Access::Read) => vec!["elasticfilesystem:ClientMount"],
        (_, Access::Write) => vec!["elasticfilesystem:ClientMount", "elasticfilesystem:ClientWrite"],
    }
}

/// Converts a five-field cron expression to the six-field EventBridge form.
///
/// EventBridge wants a year field, exactly one of day-of-month and
/// day-of-week set to `?`, and numbers weekdays 1-7 starting on Sunday.
fn to_eventbridge_cron(expr: &str) -> Option<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return None;
    };
    let (dom, dow) = match (*dom, *dow) {
        (dom, "*") => (dom.to_string(), "?".to_string()),
        ("*", dow) => ("?".to_string(), shift_weekdays(dow)?),
        _ => return None,
    };
    Some(format!("cron({} {} {} {} {} *)", minute, hour, dom, month, dow))
}

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Cron weekday (0-7 or a name, Sunday = 0 or 7) to EventBridge's 1-7.
fn eventbridge_weekday(token: &str) -> Option<u8> {
    let day = match token.parse::<u8>() {
        Ok(day) if day <= 7 => day % 7,
        Ok(_) => return None,
        Err(_) => WEEKDAY_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))? as u8,
    };
    Some(day + 1)
}

/// Shifts one comma-separated part: `d`, `a-b`, `*/n`, `a/n` or `a-b/n`.
fn shift_weekday_part(part: &str) -> Option<String> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u8 = step.parse().ok().filter(|s| (1..=7).contains(s))?;
            (range, Some(step))
        }
        None => (part, None),
    };

    let shifted = match (range, step) {
        ("*", Some(_)) => "1".to_string(),
        ("*", None) => "*".to_string(),
        _ => match range.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (eventbridge_weekday(start)?, eventbridge_weekday(end)?);
                match (start <= end, step) {
                    (true, _) => format!("{}-{}", start, end),
                    // wraps past Saturday, e.g. FRI-SUN
                    (false, None) => {
                        let head = if start == 7 { "7".to_string() } else { format!("{}-7", start) };
                        let tail = if end == 1 { "1".to_string() } else { format!("1-{}", end) };
                        format!("{},{}", head, tail)
                    }
                    (false, Some(_)) => return None,
                }
            }
            None => eventbridge_weekday(range)?.to_string(),
        },
    };

    Some(match step {
        Some(step) => format!("{}/{}", shifted, step),
        None => shifted,
    })
}

fn shift_weekdays(dow: &str) -> Option<String> {
    let shifted = dow
        .split(',')
        .map(shift_weekday_part)
        .collect::<Option<Vec<_>>>()?;
    Some(shifted.join(","))
}

impl Backend for AwsBackend {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn name_for(&self, node: &StorageNode) -> String {
        storage_name(node, MAX_NAME, '-')
    }

    fn translate_storage(&self, node: &StorageNode, config: &StorageConfig) -> Result<Resource> {
        let name = self.name_for(node);
        let resource = match config.class {
            StorageClass::ObjectStore => {
                let mut bucket = Resource::new("aws_s3_bucket", name.clone())
                    .with("bucket", name)
                    .with("region", self.region.as_str())
                    .with("versioning", config.versioned)
                    .with("format", config.format.extension());
                if let Some(days) = config.retention_days {
                    bucket.set("lifecycle_expiration_days", days);
                }
                bucket
            }
            StorageClass::Table => Resource::new("aws_glue_catalog_table", name.clone())
                .with("name", name.replace('-', "_"))
                .with("database_name", GLUE_DATABASE)
                .with("location", node.location())
                .with("format", config.format.extension())
                .with("retention_days", config.retention_days),
            StorageClass::Volume => Resource::new("aws_efs_file_system", name.clone())
                .with("creation_token", name)
                .with("encrypted", true)
                .with("region", self.region.as_str()),
        };
        Ok(resource)
    }

    fn translate_compute(&self, ctx: &ComputeContext<'_>) -> Result<ComputeTranslation> {
        let step = ctx.step;
        let resource = step.resource();
        if resource.kind == ResourceKind::Distributed {
            return Err(unsupported(self.name(), ctx.origin(), "distributed compute"));
        }

        let function_name = Self::function_name(step);
        let timeout = if resource.timeout_secs > MAX_LAMBDA_TIMEOUT_SECS {
            warn!(
                function = %function_name,
                requested = resource.timeout_secs,
                "Clamping Lambda timeout to {}s",
                MAX_LAMBDA_TIMEOUT_SECS
            );
            MAX_LAMBDA_TIMEOUT_SECS
        } else {
            resource.timeout_secs
        };

        let role = Resource::new("aws_iam_role", format!("{}-role", function_name))
            .with("assume_role_service", "lambda.amazonaws.com");
        let role_id = role.id();

        let compute = Resource::new("aws_lambda_function", function_name.clone())
            .with("function_name", function_name.as_str())
            .with("handler", step.task().name())
            .with("runtime", "provided.al2023")
            .with("memory_size", resource.memory_mb)
            .with("timeout", timeout)
            .with("reserved_concurrent_executions", resource.concurrency)
            .with("region", resource.region.as_deref().unwrap_or(&self.region))
            .with("role", role_id.as_str());

        let mut access = vec![role];
        for (binding, storage) in ctx.translated() {
            let prefix = format!("{}-{}-", function_name, binding.access.as_str());
            let budget = MAX_POLICY_NAME.saturating_sub(prefix.len()).min(MAX_NAME);
            let policy = Resource::new(
                "aws_iam_role_policy",
                format!("{}{}", prefix, sanitize(&storage.name, budget, '-')),
            )
            .with("role", role_id.as_str())
            .with(
                "policy",
                json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": actions(&storage.kind, binding.access),
                        "Resource": self.arn(storage),
                    }]
                }),
            )
            .depends_on(storage.id())
            .depends_on(role_id.clone());
            access.push(policy);
        }

        Ok(ComputeTranslation { compute, access })
    }

    fn translate_schedule(&self, step: &TransformStep, schedule: &Schedule, compute: &ResourceId) -> Result<Resource> {
        let expression = to_eventbridge_cron(&schedule.cron).ok_or_else(|| {
            unsupported(
                self.name(),
                step_origin(step),
                format!("cron expression '{}'", schedule.cron),
            )
        })?;
        let mut rule = Resource::new("aws_cloudwatch_event_rule", format!("{}-schedule", Self::function_name(step)))
            .with("schedule_expression", expression)
            .with("target", compute.as_str());
        if let Some(tz) = &schedule.timezone {
            rule.set("schedule_expression_timezone", tz.as_str());
        }
        Ok(rule)
    }

    fn translate_monitoring(
        &self,
        step: &TransformStep,
        monitoring: &Monitoring,
        _compute: &ResourceId,
    ) -> Result<Vec<Resource>> {
        let function_name = Self::function_name(step);
        let mut alarms = Vec::new();
        if monitoring.alert_on_failure {
            alarms.push(
                Resource::new("aws_cloudwatch_metric_alarm", format!("{}-errors", function_name))
                    .with("namespace", "AWS/Lambda")
                    .with("metric_name", "Errors")
                    .with("statistic", "Sum")
                    .with("comparison_operator", "GreaterThanThreshold")
                    .with("threshold", 0)
                    .with("dimensions", json!({ "FunctionName": function_name }))
                    .with("alarm_actions", monitoring.notify.clone()),
            );
        }
        if let Some(secs) = monitoring.max_duration_secs {
            alarms.push(
                Resource::new("aws_cloudwatch_metric_alarm", format!("{}-duration", function_name))
                    .with("namespace", "AWS/Lambda")
                    .with("metric_name", "Duration")
                    .with("statistic", "Maximum")
                    .with("comparison_operator", "GreaterThanThreshold")
                    .with("threshold", secs * 1000)
                    .with("dimensions", json!({ "FunctionName": function_name }))
                    .with("alarm_actions", monitoring.notify.clone()),
            );
        }
        Ok(alarms)
    }
}
