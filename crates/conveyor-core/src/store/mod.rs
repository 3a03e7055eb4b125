//! Backing-store seams.
//!
//! The engine only ever touches storage through two capability traits: a
//! keyed record map with a status index (`RecordStore`) and a per-namespace
//! FIFO with an atomic claim (`PendingQueue`). The in-memory implementation
//! backs both with one state; an external store (Redis, SQL) slots in behind
//! the same seams without touching engine logic.

mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::RequeuePosition;
use crate::domain::{TaskId, TaskRecord, TaskStatus};
use crate::error::EngineError;

/// Keyed map of task records, partitioned by namespace, with a per-status id
/// index. Namespaces are registered on first mutating use.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a fresh record. Fails with `Validation` if the id exists.
    async fn insert(&self, record: TaskRecord) -> Result<(), EngineError>;

    async fn fetch(&self, id: TaskId) -> Result<Option<TaskRecord>, EngineError>;

    /// Replace an existing record only if its current status is `expect`;
    /// the status index moves in the same indivisible step. Returns false
    /// when the record is gone or its status no longer matches, which is
    /// what status guards (double completion, racing requeues) build on.
    async fn replace(&self, record: TaskRecord, expect: TaskStatus)
    -> Result<bool, EngineError>;

    /// Remove a record together with every index and queue entry referencing
    /// it, fully or not at all. Returns whether it existed.
    async fn remove(&self, id: TaskId) -> Result<bool, EngineError>;

    /// Every record in the namespace (unordered).
    async fn list(&self, namespace: &str) -> Result<Vec<TaskRecord>, EngineError>;

    /// Every record across all namespaces (unordered).
    async fn list_all(&self) -> Result<Vec<TaskRecord>, EngineError>;

    /// Ids currently indexed under `status` in the namespace.
    async fn ids_with_status(
        &self,
        namespace: &str,
        status: TaskStatus,
    ) -> Result<Vec<TaskId>, EngineError>;

    /// Known namespaces, sorted.
    async fn namespaces(&self) -> Result<Vec<String>, EngineError>;

    /// Ids referenced by an index or queue entry with no record behind them.
    async fn orphans(&self, namespace: &str) -> Result<Vec<TaskId>, EngineError>;

    /// Drop every record, queue entry, and index entry of the namespace,
    /// along with its registration. Returns the removed record count.
    async fn clear_namespace(&self, namespace: &str) -> Result<usize, EngineError>;
}

/// Per-namespace FIFO of pending task ids.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    /// Make `id` claimable at the chosen end of the namespace queue.
    async fn push(
        &self,
        namespace: &str,
        id: TaskId,
        position: RequeuePosition,
    ) -> Result<(), EngineError>;

    /// Atomic pop-and-mark: the head id leaves the queue and its record flips
    /// TODO -> PROCESSING (start_time stamped) in one indivisible step, so
    /// two concurrent claims can never return the same id. `None` when
    /// nothing is pending; with a timeout, blocks until a task arrives or
    /// the timeout lapses.
    async fn claim(
        &self,
        namespace: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<TaskRecord>, EngineError>;
}
