//! In-memory store implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::clock::{Clock, SystemClock};
use crate::config::RequeuePosition;
use crate::domain::{TaskId, TaskRecord, TaskStatus};
use crate::error::EngineError;
use crate::store::{PendingQueue, RecordStore};

/// Queue + index slice for one namespace.
///
/// The notifier is per-namespace so a push to namespace A never wakes (and
/// loses the wakeup to) a claimer blocked on namespace B.
struct NamespaceState {
    pending: VecDeque<TaskId>,
    by_status: HashMap<TaskStatus, BTreeSet<TaskId>>,
    notify: Arc<Notify>,
}

impl Default for NamespaceState {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            by_status: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl NamespaceState {
    fn index(&mut self, status: TaskStatus, id: TaskId) {
        self.by_status.entry(status).or_default().insert(id);
    }

    fn unindex(&mut self, status: TaskStatus, id: TaskId) {
        if let Some(set) = self.by_status.get_mut(&status) {
            set.remove(&id);
        }
    }

    /// All ids the index knows about (every record sits in exactly one set).
    fn indexed_ids(&self) -> BTreeSet<TaskId> {
        self.by_status.values().flatten().copied().collect()
    }
}

struct StoreState {
    /// All records (single source of truth). Ids are globally unique, so one
    /// map serves every namespace.
    records: HashMap<TaskId, TaskRecord>,

    /// Known namespaces with their queue and status index. BTreeMap keeps
    /// `namespaces()` listings stable.
    namespaces: BTreeMap<String, NamespaceState>,
}

/// In-memory backing store.
///
/// One async mutex guards all state, which makes claim (pop head + mark
/// PROCESSING + index move) a single critical section. That is the engine's
/// sole hard synchronization point.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState {
                records: HashMap::new(),
                namespaces: BTreeMap::new(),
            }),
            clock,
        }
    }

    /// Plant an index entry with no record behind it, to exercise the orphan
    /// accounting paths.
    #[cfg(test)]
    pub(crate) async fn inject_index_entry(&self, namespace: &str, status: TaskStatus, id: TaskId) {
        let mut state = self.state.lock().await;
        let ns = state.namespaces.entry(namespace.to_string()).or_default();
        ns.index(status, id);
    }

    /// Plant a queue entry with no record behind it.
    #[cfg(test)]
    pub(crate) async fn inject_queue_entry(&self, namespace: &str, id: TaskId) {
        let mut state = self.state.lock().await;
        let ns = state.namespaces.entry(namespace.to_string()).or_default();
        ns.pending.push_back(id);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(&record.id) {
            return Err(EngineError::validation(format!(
                "task id {} already exists",
                record.id
            )));
        }
        let ns = state.namespaces.entry(record.namespace.clone()).or_default();
        ns.index(record.status, record.id);
        state.records.insert(record.id, record);
        Ok(())
    }

    async fn fetch(&self, id: TaskId) -> Result<Option<TaskRecord>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn replace(
        &self,
        record: TaskRecord,
        expect: TaskStatus,
    ) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let Some(existing) = state.records.get_mut(&record.id) else {
            return Ok(false);
        };
        if existing.status != expect {
            return Ok(false);
        }
        // Namespace is immutable after creation.
        debug_assert_eq!(existing.namespace, record.namespace);
        let ns = state
            .namespaces
            .get_mut(&existing.namespace)
            .expect("indexed record has a namespace entry");
        ns.unindex(expect, record.id);
        ns.index(record.status, record.id);
        *existing = record;
        Ok(true)
    }

    async fn remove(&self, id: TaskId) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.remove(&id) else {
            return Ok(false);
        };
        if let Some(ns) = state.namespaces.get_mut(&record.namespace) {
            ns.unindex(record.status, id);
            ns.pending.retain(|queued| *queued != id);
        }
        Ok(true)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<TaskRecord>, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<TaskRecord>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.records.values().cloned().collect())
    }

    async fn ids_with_status(
        &self,
        namespace: &str,
        status: TaskStatus,
    ) -> Result<Vec<TaskId>, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.by_status.get(&status))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn namespaces(&self) -> Result<Vec<String>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.namespaces.keys().cloned().collect())
    }

    async fn orphans(&self, namespace: &str) -> Result<Vec<TaskId>, EngineError> {
        let state = self.state.lock().await;
        let Some(ns) = state.namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut referenced = ns.indexed_ids();
        referenced.extend(ns.pending.iter().copied());
        Ok(referenced
            .into_iter()
            .filter(|id| !state.records.contains_key(id))
            .collect())
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<usize, EngineError> {
        let mut state = self.state.lock().await;
        let Some(ns) = state.namespaces.remove(namespace) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in ns.indexed_ids() {
            if state.records.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl PendingQueue for MemoryStore {
    async fn push(
        &self,
        namespace: &str,
        id: TaskId,
        position: RequeuePosition,
    ) -> Result<(), EngineError> {
        let notify = {
            let mut state = self.state.lock().await;
            let ns = state.namespaces.entry(namespace.to_string()).or_default();
            match position {
                RequeuePosition::Tail => ns.pending.push_back(id),
                RequeuePosition::Head => ns.pending.push_front(id),
            }
            Arc::clone(&ns.notify)
        };
        // Wake one blocked claimer outside the lock.
        notify.notify_one();
        Ok(())
    }

    async fn claim(
        &self,
        namespace: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<TaskRecord>, EngineError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notify = {
                let mut state = self.state.lock().await;
                let state = &mut *state;
                let ns = state.namespaces.entry(namespace.to_string()).or_default();
                while let Some(id) = ns.pending.pop_front() {
                    let Some(record) = state.records.get_mut(&id) else {
                        tracing::warn!(%id, namespace, "dropping orphaned queue entry");
                        continue;
                    };
                    if record.status != TaskStatus::Todo {
                        tracing::warn!(
                            %id,
                            namespace,
                            status = %record.status,
                            "skipping stale queue entry"
                        );
                        continue;
                    }
                    record.begin(self.clock.now());
                    ns.unindex(TaskStatus::Todo, id);
                    ns.index(TaskStatus::Processing, id);
                    return Ok(Some(record.clone()));
                }
                Arc::clone(&ns.notify)
            };

            let Some(deadline) = deadline else {
                return Ok(None);
            };
            // A push between releasing the lock and awaiting here leaves a
            // stored permit on the Notify, so the wakeup is not lost.
            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSpec;
    use chrono::Utc;

    fn record(namespace: &str, task_type: &str) -> TaskRecord {
        let now = Utc::now();
        TaskRecord::create(
            TaskId::generate(now),
            TaskSpec::new(namespace, task_type).with_name(task_type),
            3,
            now,
        )
    }

    async fn seed(store: &MemoryStore, namespace: &str) -> TaskId {
        let r = record(namespace, "email");
        let id = r.id;
        store.insert(r).await.unwrap();
        store
            .push(namespace, id, RequeuePosition::Tail)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn insert_indexes_under_todo() {
        let store = MemoryStore::new();
        let id = seed(&store, "default").await;

        let todo = store
            .ids_with_status("default", TaskStatus::Todo)
            .await
            .unwrap();
        assert_eq!(todo, vec![id]);
        assert_eq!(store.namespaces().await.unwrap(), vec!["default"]);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        let r = record("default", "email");
        store.insert(r.clone()).await.unwrap();
        let err = store.insert(r).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn claim_pops_fifo_and_marks_processing() {
        let store = MemoryStore::new();
        let first = seed(&store, "default").await;
        let second = seed(&store, "default").await;

        let claimed = store.claim("default", None).await.unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert!(claimed.start_time.is_some());

        let processing = store
            .ids_with_status("default", TaskStatus::Processing)
            .await
            .unwrap();
        assert_eq!(processing, vec![first]);
        let todo = store
            .ids_with_status("default", TaskStatus::Todo)
            .await
            .unwrap();
        assert_eq!(todo, vec![second]);
    }

    #[tokio::test]
    async fn claim_on_empty_queue_returns_none() {
        let store = MemoryStore::new();
        assert!(store.claim("default", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_times_out_when_nothing_arrives() {
        let store = MemoryStore::new();
        let start = tokio::time::Instant::now();
        let claimed = store
            .claim("default", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(claimed.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocked_claim_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim("default", Some(Duration::from_secs(5))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = seed(&store, "default").await;

        let claimed = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(claimed.id, id);
    }

    #[tokio::test]
    async fn push_to_one_namespace_does_not_wake_another() {
        let store = Arc::new(MemoryStore::new());
        let other_waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim("other", Some(Duration::from_millis(100))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        seed(&store, "default").await;

        // The waiter on "other" times out; the task stays claimable.
        assert!(other_waiter.await.unwrap().unwrap().is_none());
        assert!(store.claim("default", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn replace_guards_on_expected_status() {
        let store = MemoryStore::new();
        seed(&store, "default").await;
        let claimed = store.claim("default", None).await.unwrap().unwrap();

        let mut done = claimed.clone();
        done.finish(TaskStatus::Done, None, None, Utc::now());
        assert!(
            store
                .replace(done.clone(), TaskStatus::Processing)
                .await
                .unwrap()
        );

        // Second completion sees the status already moved.
        assert!(!store.replace(done, TaskStatus::Processing).await.unwrap());

        let done_ids = store
            .ids_with_status("default", TaskStatus::Done)
            .await
            .unwrap();
        assert_eq!(done_ids, vec![claimed.id]);
        assert!(
            store
                .ids_with_status("default", TaskStatus::Processing)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn remove_drops_record_index_and_queue_entry() {
        let store = MemoryStore::new();
        let id = seed(&store, "default").await;

        assert!(store.remove(id).await.unwrap());
        assert!(store.fetch(id).await.unwrap().is_none());
        assert!(
            store
                .ids_with_status("default", TaskStatus::Todo)
                .await
                .unwrap()
                .is_empty()
        );
        // The queue entry went with it.
        assert!(store.claim("default", None).await.unwrap().is_none());
        assert!(!store.remove(id).await.unwrap());
    }

    #[tokio::test]
    async fn clear_namespace_is_scoped() {
        let store = MemoryStore::new();
        seed(&store, "a").await;
        seed(&store, "a").await;
        let kept = seed(&store, "b").await;

        assert_eq!(store.clear_namespace("a").await.unwrap(), 2);
        assert_eq!(store.namespaces().await.unwrap(), vec!["b"]);
        assert!(store.fetch(kept).await.unwrap().is_some());
        assert_eq!(store.clear_namespace("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn orphaned_queue_entries_are_skipped_by_claim() {
        let store = MemoryStore::new();
        let ghost = TaskId::generate(Utc::now());
        store.inject_queue_entry("default", ghost).await;
        let real = seed(&store, "default").await;

        let claimed = store.claim("default", None).await.unwrap().unwrap();
        assert_eq!(claimed.id, real);
    }

    #[tokio::test]
    async fn orphans_reports_dangling_references() {
        let store = MemoryStore::new();
        seed(&store, "default").await;
        let ghost = TaskId::generate(Utc::now());
        store
            .inject_index_entry("default", TaskStatus::Done, ghost)
            .await;

        let orphans = store.orphans("default").await.unwrap();
        assert_eq!(orphans, vec![ghost]);
    }
}
