//! Tasks: named transform functions with an explicit parameter list.

use crate::dataset::Dataset;
use crate::error::TaskError;
use crate::resource::ExecutionResource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Body of a task. Receives its inputs by parameter name.
pub type TaskBody = dyn Fn(&TaskInputs) -> Result<Dataset, TaskError> + Send + Sync;

/// Recurring trigger declared on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Cron expression (five fields)
    pub cron: String,
    pub timezone: Option<String>,
}

impl Schedule {
    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule {
            cron: expression.into(),
            timezone: None,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

/// Monitoring declared on a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitoring {
    /// Raise an alert when a run fails
    pub alert_on_failure: bool,
    /// Raise an alert when a run exceeds this duration
    pub max_duration_secs: Option<u64>,
    /// Notification targets (emails, channels)
    pub notify: Vec<String>,
}

impl Monitoring {
    pub fn on_failure() -> Self {
        Monitoring {
            alert_on_failure: true,
            ..Default::default()
        }
    }

    pub fn with_max_duration_secs(mut self, secs: u64) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }

    pub fn notify(mut self, target: impl Into<String>) -> Self {
        self.notify.push(target.into());
        self
    }
}

/// Inputs handed to a task body, in the task's parameter order.
#[derive(Debug, Clone, Default)]
pub struct TaskInputs {
    entries: Vec<(String, Arc<Dataset>)>,
}

impl TaskInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Arc<Dataset>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = data,
            None => self.entries.push((name, data)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_ref())
    }

    /// Like `get`, but returns a task error naming the missing parameter.
    pub fn require(&self, name: &str) -> Result<&Dataset, TaskError> {
        self.get(name)
            .ok_or_else(|| format!("missing input '{}'", name).into())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dataset)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone)]
struct TaskInner {
    name: String,
    params: Vec<String>,
    body: Arc<TaskBody>,
    resource: ExecutionResource,
    schedule: Option<Schedule>,
    monitoring: Option<Monitoring>,
}

/// A named transform with declared parameter names and a bound resource.
///
/// Parameter names are the binding surface: a step's input names must equal
/// them exactly.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Creates a task bound to the default local resource.
    ///
    /// # Arguments
    /// * `name` - Task name used in logs, errors and resource names
    /// * `params` - Declared parameter names, in call order
    /// * `body` - The transform itself
    pub fn new<I, S, F>(name: impl Into<String>, params: I, body: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&TaskInputs) -> Result<Dataset, TaskError> + Send + Sync + 'static,
    {
        Task {
            inner: Arc::new(TaskInner {
                name: name.into(),
                params: params.into_iter().map(Into::into).collect(),
                body: Arc::new(body),
                resource: ExecutionResource::default(),
                schedule: None,
                monitoring: None,
            }),
        }
    }

    /// Binds the task to an execution resource.
    pub fn on(mut self, resource: ExecutionResource) -> Self {
        Arc::make_mut(&mut self.inner).resource = resource;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        Arc::make_mut(&mut self.inner).schedule = Some(schedule);
        self
    }

    pub fn with_monitoring(mut self, monitoring: Monitoring) -> Self {
        Arc::make_mut(&mut self.inner).monitoring = Some(monitoring);
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn params(&self) -> &[String] {
        &self.inner.params
    }

    pub fn resource(&self) -> &ExecutionResource {
        &self.inner.resource
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.inner.schedule.as_ref()
    }

    pub fn monitoring(&self) -> Option<&Monitoring> {
        self.inner.monitoring.as_ref()
    }

    /// Invokes the task body.
    pub fn call(&self, inputs: &TaskInputs) -> Result<Dataset, TaskError> {
        (self.inner.body)(inputs)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("params", &self.inner.params)
            .field("resource", &self.inner.resource.name)
            .field("schedule", &self.inner.schedule)
            .field("monitoring", &self.inner.monitoring)
            .finish()
    }
}
