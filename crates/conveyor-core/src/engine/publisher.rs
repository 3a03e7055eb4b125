//! Publisher: validates and writes new task records.

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::config::RequeuePosition;
use crate::domain::{TaskId, TaskRecord, TaskSpec};
use crate::error::EngineError;
use crate::registry::HandlerRegistry;
use crate::store::{PendingQueue, RecordStore};

pub struct Publisher {
    registry: Arc<HandlerRegistry>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn PendingQueue>,
    clock: Arc<dyn Clock>,
    default_namespace: String,
}

impl Publisher {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn PendingQueue>,
        clock: Arc<dyn Clock>,
        default_namespace: String,
    ) -> Self {
        Self {
            registry,
            records,
            queue,
            clock,
            default_namespace,
        }
    }

    /// Validate the spec, write the record, make it claimable.
    ///
    /// An empty namespace resolves to the configured default. The record is
    /// fully written before its id reaches the queue, so a racing claim
    /// either misses it or sees it whole; a claim issued after this returns
    /// can always observe the id.
    pub async fn publish(&self, mut spec: TaskSpec) -> Result<TaskId, EngineError> {
        let Some(entry) = self.registry.get(&spec.task_type) else {
            return Err(EngineError::validation(format!(
                "no handler registered for task_type '{}'",
                spec.task_type
            )));
        };
        if spec.namespace.is_empty() {
            spec.namespace = self.default_namespace.clone();
        }
        if !(spec.params.is_object() || spec.params.is_null()) {
            return Err(EngineError::validation(
                "params must be a JSON object or null",
            ));
        }

        let now = self.clock.now();
        let id = TaskId::generate(now);
        let namespace = spec.namespace.clone();
        let record = TaskRecord::create(id, spec, entry.max_retries, now);
        self.records.insert(record).await?;
        self.queue
            .push(&namespace, id, RequeuePosition::Tail)
            .await?;
        debug!(%id, %namespace, "published task");
        Ok(id)
    }
}
