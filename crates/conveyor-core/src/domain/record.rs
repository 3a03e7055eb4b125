//! Task record: metadata + lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::status::TaskStatus;

/// What a publisher supplies; everything else is filled in at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub namespace: String,
    pub name: String,
    pub group: String,
    pub task_type: String,
    pub description: String,
    pub params: serde_json::Value,
}

impl TaskSpec {
    pub fn new(namespace: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: String::new(),
            group: "default".to_string(),
            task_type: task_type.into(),
            description: String::new(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Full metadata and state for one task.
///
/// Single source of truth: queues and indices hold `TaskId` only, and every
/// state transition goes through the methods here. The serialized field names
/// are the persisted surface external consumers read verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub group: String,
    pub namespace: String,
    pub task_type: String,
    pub description: String,

    /// Opaque payload, handed to the handler unmodified.
    pub params: serde_json::Value,

    pub status: TaskStatus,
    pub created_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    /// Seconds between start_time and end_time, set together with end_time.
    pub duration: Option<f64>,

    pub retry_count: u32,

    /// Fixed at publish time from the handler's registration.
    pub max_retries: u32,

    pub result_data: Option<serde_json::Value>,
    pub result_message: Option<String>,
}

impl TaskRecord {
    /// Fresh record as the publisher writes it.
    pub fn create(id: TaskId, spec: TaskSpec, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name,
            group: spec.group,
            namespace: spec.namespace,
            task_type: spec.task_type,
            description: spec.description,
            params: spec.params,
            status: TaskStatus::Todo,
            created_time: now,
            start_time: None,
            end_time: None,
            duration: None,
            retry_count: 0,
            max_retries,
            result_data: None,
            result_message: None,
        }
    }

    /// Claim: Todo -> Processing.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.start_time = Some(now);
    }

    /// Terminal outcome: Processing -> Done | Error | Skip.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        result_data: Option<serde_json::Value>,
        result_message: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.end_time = Some(now);
        self.duration = self
            .start_time
            .map(|start| (now - start).num_milliseconds() as f64 / 1000.0);
        self.result_data = result_data;
        self.result_message = result_message;
    }

    /// Automatic retry: back to Todo with the attempt counted.
    pub fn reset_for_retry(&mut self, error_message: String) {
        self.retry_count += 1;
        self.status = TaskStatus::Todo;
        self.start_time = None;
        self.end_time = None;
        self.duration = None;
        self.result_message = Some(error_message);
    }

    /// Operator requeue: back to Todo, retry_count untouched so manual
    /// requeues stay distinguishable from automatic ones.
    pub fn reset_for_requeue(&mut self) {
        self.status = TaskStatus::Todo;
        self.start_time = None;
        self.end_time = None;
        self.duration = None;
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
