//! Cleanup: bulk deletion, namespace clears, operator requeues.

use std::sync::Arc;

use tracing::info;

use crate::config::RequeuePosition;
use crate::domain::{TaskId, TaskRecord, TaskStatus};
use crate::engine::query::{QueryEngine, TaskFilter};
use crate::error::EngineError;
use crate::store::{PendingQueue, RecordStore};

/// Result of a `clean` call.
#[derive(Debug, Clone)]
pub enum CleanReport {
    /// Dry run: the records that would be deleted. Nothing was mutated.
    Preview(Vec<TaskRecord>),
    /// How many records were deleted.
    Deleted(usize),
}

impl CleanReport {
    pub fn count(&self) -> usize {
        match self {
            CleanReport::Preview(records) => records.len(),
            CleanReport::Deleted(n) => *n,
        }
    }
}

pub struct Cleaner {
    query: QueryEngine,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn PendingQueue>,
    requeue_position: RequeuePosition,
}

impl Cleaner {
    pub(crate) fn new(
        query: QueryEngine,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn PendingQueue>,
        requeue_position: RequeuePosition,
    ) -> Self {
        Self {
            query,
            records,
            queue,
            requeue_position,
        }
    }

    /// Delete every record matching the filter, or preview the matching set.
    ///
    /// Each record's deletion removes it from the store and every index and
    /// queue entry in one indivisible step, so a failure mid-batch never
    /// leaves a record half-removed.
    pub async fn clean(
        &self,
        filter: &TaskFilter,
        dry_run: bool,
    ) -> Result<CleanReport, EngineError> {
        let matches = self.query.find(filter, None, None).await?;
        if dry_run {
            return Ok(CleanReport::Preview(matches));
        }
        let mut deleted = 0;
        for record in &matches {
            if self.records.remove(record.id).await? {
                deleted += 1;
            }
        }
        info!(deleted, "cleaned tasks");
        Ok(CleanReport::Deleted(deleted))
    }

    /// Drop every record, queue entry, and index entry for the namespace.
    pub async fn clear(&self, namespace: &str) -> Result<usize, EngineError> {
        let removed = self.records.clear_namespace(namespace).await?;
        info!(namespace, removed, "cleared namespace");
        Ok(removed)
    }

    /// Operator-initiated re-entry into TODO, regardless of current status
    /// (an exhausted ERROR included). The historical retry_count survives so
    /// manual requeues stay distinguishable from automatic ones.
    ///
    /// Returns false when there was nothing to do (already pending) or the
    /// record changed status mid-flight; fails with NotFound for unknown ids.
    pub async fn requeue(&self, id: TaskId) -> Result<bool, EngineError> {
        let Some(record) = self.records.fetch(id).await? else {
            return Err(EngineError::NotFound(id));
        };
        if record.status == TaskStatus::Todo {
            return Ok(false);
        }

        let mut updated = record.clone();
        updated.reset_for_requeue();
        if !self.records.replace(updated, record.status).await? {
            return Ok(false);
        }
        self.queue
            .push(&record.namespace, id, self.requeue_position)
            .await?;
        info!(%id, namespace = %record.namespace, from = %record.status, "requeued task");
        Ok(true)
    }
}
