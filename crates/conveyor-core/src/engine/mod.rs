//! Engine: publisher, dispatcher, query, cleanup, and stats behind one facade.

mod builder;
mod cleaner;
mod dispatcher;
mod publisher;
mod query;
mod stats;

pub use builder::EngineBuilder;
pub use cleaner::{CleanReport, Cleaner};
pub use dispatcher::Dispatcher;
pub use publisher::Publisher;
pub use query::{QueryEngine, SortField, TaskFilter, TaskSort, parse_duration};
pub use stats::{NamespaceStats, StatsAggregator};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::Config;
use crate::domain::{Outcome, TaskId, TaskRecord, TaskSpec};
use crate::error::EngineError;
use crate::registry::HandlerRegistry;
use crate::store::{PendingQueue, RecordStore};
use crate::worker::WorkerGroup;

/// The engine facade: every externally exposed operation in one place.
///
/// Namespaces are fully independent: no operation locks or blocks across
/// namespace boundaries. Queries may observe a task mid-transition; only
/// `claim` is transactional with dispatch.
pub struct Engine {
    config: Config,
    publisher: Publisher,
    dispatcher: Arc<Dispatcher>,
    query: QueryEngine,
    cleaner: Cleaner,
    stats: StatsAggregator,
    records: Arc<dyn RecordStore>,
}

impl Engine {
    pub(crate) fn wire(
        config: Config,
        registry: Arc<HandlerRegistry>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn PendingQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let query = QueryEngine::new(Arc::clone(&records), Arc::clone(&clock));
        Self {
            publisher: Publisher::new(
                Arc::clone(&registry),
                Arc::clone(&records),
                Arc::clone(&queue),
                Arc::clone(&clock),
                config.default_namespace.clone(),
            ),
            dispatcher: Arc::new(Dispatcher::new(
                registry,
                Arc::clone(&records),
                Arc::clone(&queue),
                clock,
                config.clone(),
            )),
            cleaner: Cleaner::new(
                query.clone(),
                Arc::clone(&records),
                queue,
                config.requeue,
            ),
            stats: StatsAggregator::new(Arc::clone(&records)),
            query,
            records,
            config,
        }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// An empty namespace names the configured default.
    fn resolve_ns<'a>(&'a self, namespace: &'a str) -> &'a str {
        if namespace.is_empty() {
            &self.config.default_namespace
        } else {
            namespace
        }
    }

    /// Validate and enqueue a new task; returns its fresh id.
    pub async fn publish(&self, spec: TaskSpec) -> Result<TaskId, EngineError> {
        self.publisher.publish(spec).await
    }

    /// Atomically claim the next pending task in the namespace.
    pub async fn claim(
        &self,
        namespace: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<TaskRecord>, EngineError> {
        self.dispatcher.claim(self.resolve_ns(namespace), timeout).await
    }

    /// Apply a handler outcome to a claimed task.
    pub async fn complete(&self, id: TaskId, outcome: Outcome) -> Result<(), EngineError> {
        self.dispatcher.complete(id, outcome).await
    }

    pub async fn find(
        &self,
        filter: &TaskFilter,
        sort: Option<TaskSort>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskRecord>, EngineError> {
        self.query.find(filter, sort, limit).await
    }

    pub async fn find_ids(
        &self,
        filter: &TaskFilter,
        sort: Option<TaskSort>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskId>, EngineError> {
        self.query.find_ids(filter, sort, limit).await
    }

    pub async fn fetch(&self, id: TaskId) -> Result<Option<TaskRecord>, EngineError> {
        self.records.fetch(id).await
    }

    pub async fn requeue(&self, id: TaskId) -> Result<bool, EngineError> {
        self.cleaner.requeue(id).await
    }

    pub async fn clean(
        &self,
        filter: &TaskFilter,
        dry_run: bool,
    ) -> Result<CleanReport, EngineError> {
        self.cleaner.clean(filter, dry_run).await
    }

    pub async fn clear(&self, namespace: &str) -> Result<usize, EngineError> {
        self.cleaner.clear(self.resolve_ns(namespace)).await
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>, EngineError> {
        self.records.namespaces().await
    }

    pub async fn stats(&self, namespace: &str) -> Result<NamespaceStats, EngineError> {
        self.stats.stats(self.resolve_ns(namespace)).await
    }

    pub async fn all_stats(&self) -> Result<BTreeMap<String, NamespaceStats>, EngineError> {
        self.stats.all_stats().await
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Spawn `n` dispatcher workers against the namespace.
    pub fn spawn_workers(&self, n: usize, namespace: impl Into<String>) -> WorkerGroup {
        let namespace = namespace.into();
        let namespace = self.resolve_ns(&namespace).to_string();
        WorkerGroup::spawn(n, namespace, Arc::clone(&self.dispatcher))
    }
}
