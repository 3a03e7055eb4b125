//! Dispatcher: claims pending tasks, runs handlers, applies the retry policy.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::domain::{Outcome, TaskId, TaskRecord, TaskStatus};
use crate::error::EngineError;
use crate::registry::HandlerRegistry;
use crate::store::{PendingQueue, RecordStore};

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn PendingQueue>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn PendingQueue>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            records,
            queue,
            clock,
            config,
        }
    }

    /// Claim the next pending task in the namespace.
    ///
    /// The pop and the TODO -> PROCESSING transition happen in one
    /// indivisible store operation, so concurrent claimers never receive the
    /// same id. `None` means the queue was empty (after `timeout`, if given).
    pub async fn claim(
        &self,
        namespace: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<TaskRecord>, EngineError> {
        self.queue.claim(namespace, timeout).await
    }

    /// Apply a handler outcome to a claimed task.
    ///
    /// An `Error` outcome below the retry ceiling resets the record to TODO
    /// and re-appends its id; anything else is terminal. Fails when the id is
    /// unknown or the record is not currently PROCESSING, so a second
    /// completion of the same claim is rejected.
    pub async fn complete(&self, id: TaskId, outcome: Outcome) -> Result<(), EngineError> {
        let Some(record) = self.records.fetch(id).await? else {
            return Err(EngineError::NotFound(id));
        };
        if record.status != TaskStatus::Processing {
            return Err(EngineError::NotProcessing(id));
        }

        if let Outcome::Error { message } = &outcome
            && !record.retries_exhausted()
        {
            let mut updated = record.clone();
            updated.reset_for_retry(message.clone());
            if !self
                .records
                .replace(updated, TaskStatus::Processing)
                .await?
            {
                return Err(EngineError::NotProcessing(id));
            }
            self.queue
                .push(&record.namespace, id, self.config.requeue)
                .await?;
            info!(
                %id,
                namespace = %record.namespace,
                retry = record.retry_count + 1,
                max_retries = record.max_retries,
                error = %message,
                "task failed, re-enqueued"
            );
            return Ok(());
        }

        let (status, data, message) = match outcome {
            Outcome::Done { data, message } => (TaskStatus::Done, data, message),
            Outcome::Skip { message } => (TaskStatus::Skip, None, message),
            Outcome::Error { message } => (TaskStatus::Error, None, Some(message)),
        };
        let mut updated = record.clone();
        updated.finish(status, data, message, self.clock.now());
        if !self
            .records
            .replace(updated, TaskStatus::Processing)
            .await?
        {
            return Err(EngineError::NotProcessing(id));
        }
        info!(%id, namespace = %record.namespace, status = %status, "task finished");
        Ok(())
    }

    /// Run the handler for a claimed record.
    ///
    /// A panic inside the handler is caught and reported as an `Error`
    /// outcome; a task whose type has no handler completes as `Skip`.
    pub async fn process(&self, record: &TaskRecord) -> Outcome {
        let Some(entry) = self.registry.get(&record.task_type) else {
            warn!(
                id = %record.id,
                task_type = %record.task_type,
                "no handler for claimed task"
            );
            return Outcome::skip(format!(
                "no handler for task_type '{}'",
                record.task_type
            ));
        };
        let handler = Arc::clone(&entry.handler);
        let params = record.params.clone();
        match tokio::spawn(async move { handler.handle(params).await }).await {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_panic() => {
                Outcome::error(format!("handler panicked: {}", panic_message(join_err)))
            }
            Err(_) => Outcome::error("handler was cancelled"),
        }
    }

    /// One dispatch cycle: claim, execute, complete.
    ///
    /// Returns the handled task's id, or `None` when the queue was empty.
    pub async fn run_once(
        &self,
        namespace: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<TaskId>, EngineError> {
        let Some(record) = self.claim(namespace, timeout).await? else {
            return Ok(None);
        };
        let outcome = self.process(&record).await;
        self.complete(record.id, outcome).await?;
        Ok(Some(record.id))
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    let payload = join_err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSpec;
    use crate::engine::publisher::Publisher;
    use crate::registry::TaskHandler;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails;

    #[async_trait]
    impl TaskHandler for AlwaysFails {
        async fn handle(&self, _params: serde_json::Value) -> Outcome {
            Outcome::error("smtp down")
        }
    }

    struct Panics;

    #[async_trait]
    impl TaskHandler for Panics {
        async fn handle(&self, _params: serde_json::Value) -> Outcome {
            panic!("boom");
        }
    }

    struct SucceedsAfter {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for SucceedsAfter {
        async fn handle(&self, _params: serde_json::Value) -> Outcome {
            if self.failures_left.load(Ordering::Relaxed) > 0 {
                self.failures_left.fetch_sub(1, Ordering::Relaxed);
                return Outcome::error("transient");
            }
            Outcome::done().with_data(serde_json::json!({"ok": true}))
        }
    }

    fn rig(registry: HandlerRegistry) -> (Publisher, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(registry);
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let publisher = Publisher::new(
            Arc::clone(&registry),
            store.clone(),
            store.clone(),
            Arc::clone(&clock),
            "default".to_string(),
        );
        let dispatcher = Dispatcher::new(
            registry,
            store.clone(),
            store,
            clock,
            Config::default(),
        );
        (publisher, dispatcher)
    }

    #[tokio::test]
    async fn failing_task_retries_then_lands_in_error() {
        let mut registry = HandlerRegistry::new();
        registry.register("email", Arc::new(AlwaysFails), 2);
        let (publisher, dispatcher) = rig(registry);

        let id = publisher
            .publish(
                TaskSpec::new("default", "email")
                    .with_name("send-welcome")
                    .with_group("email")
                    .with_params(serde_json::json!({"to": "a@b.com"})),
            )
            .await
            .unwrap();

        // First failure: back to TODO with one retry counted.
        dispatcher.run_once("default", None).await.unwrap().unwrap();
        let record = dispatcher.records.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Todo);
        assert_eq!(record.retry_count, 1);

        // Second failure.
        dispatcher.run_once("default", None).await.unwrap().unwrap();
        let record = dispatcher.records.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Todo);
        assert_eq!(record.retry_count, 2);

        // Third failure exhausts the ceiling: terminal ERROR.
        dispatcher.run_once("default", None).await.unwrap().unwrap();
        let record = dispatcher.records.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.result_message.as_deref(), Some("smtp down"));

        // Nothing left to claim.
        assert!(dispatcher.claim("default", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_failure_eventually_succeeds() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "report",
            Arc::new(SucceedsAfter {
                failures_left: AtomicU32::new(2),
            }),
            3,
        );
        let (publisher, dispatcher) = rig(registry);

        let id = publisher
            .publish(TaskSpec::new("default", "report"))
            .await
            .unwrap();

        for _ in 0..3 {
            dispatcher.run_once("default", None).await.unwrap();
        }
        let record = dispatcher.records.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Done);
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.result_data, Some(serde_json::json!({"ok": true})));
        assert!(record.end_time >= record.start_time);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_an_error_outcome() {
        let mut registry = HandlerRegistry::new();
        registry.register("email", Arc::new(Panics), 0);
        let (publisher, dispatcher) = rig(registry);

        let id = publisher
            .publish(TaskSpec::new("default", "email"))
            .await
            .unwrap();
        dispatcher.run_once("default", None).await.unwrap();

        let record = dispatcher.records.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Error);
        assert!(
            record
                .result_message
                .as_deref()
                .unwrap()
                .contains("boom")
        );
    }

    #[tokio::test]
    async fn completing_twice_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register("email", Arc::new(AlwaysFails), 0);
        let (publisher, dispatcher) = rig(registry);

        let id = publisher
            .publish(TaskSpec::new("default", "email"))
            .await
            .unwrap();
        let record = dispatcher.claim("default", None).await.unwrap().unwrap();
        dispatcher
            .complete(record.id, Outcome::done())
            .await
            .unwrap();

        let err = dispatcher
            .complete(record.id, Outcome::done())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotProcessing(_)));
        assert_eq!(id, record.id);
    }

    #[tokio::test]
    async fn completing_an_unknown_id_is_not_found() {
        let (_, dispatcher) = rig(HandlerRegistry::new());
        let ghost = TaskId::generate(chrono::Utc::now());
        let err = dispatcher
            .complete(ghost, Outcome::done())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn completing_an_unclaimed_task_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register("email", Arc::new(AlwaysFails), 0);
        let (publisher, dispatcher) = rig(registry);

        let id = publisher
            .publish(TaskSpec::new("default", "email"))
            .await
            .unwrap();
        let err = dispatcher.complete(id, Outcome::done()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotProcessing(_)));
    }

    #[tokio::test]
    async fn missing_handler_at_dispatch_time_skips() {
        // Publish against a registry that knows the type, dispatch with one
        // that does not (registries can differ between processes).
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let mut publishing = HandlerRegistry::new();
        publishing.register("email", Arc::new(AlwaysFails), 2);
        let publisher = Publisher::new(
            Arc::new(publishing),
            store.clone(),
            store.clone(),
            Arc::clone(&clock),
            "default".to_string(),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(HandlerRegistry::new()),
            store.clone(),
            store.clone(),
            clock,
            Config::default(),
        );

        let id = publisher
            .publish(TaskSpec::new("default", "email"))
            .await
            .unwrap();
        dispatcher.run_once("default", None).await.unwrap();

        let record = store.fetch(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Skip);
        assert!(record.result_message.unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn retry_reappends_at_the_tail() {
        let mut registry = HandlerRegistry::new();
        registry.register("email", Arc::new(AlwaysFails), 5);
        registry.register("report", Arc::new(AlwaysFails), 5);
        let (publisher, dispatcher) = rig(registry);

        let failing = publisher
            .publish(TaskSpec::new("default", "email"))
            .await
            .unwrap();
        let waiting = publisher
            .publish(TaskSpec::new("default", "report"))
            .await
            .unwrap();

        // The failed head goes behind the waiting task.
        dispatcher.run_once("default", None).await.unwrap();
        let next = dispatcher.claim("default", None).await.unwrap().unwrap();
        assert_eq!(next.id, waiting);
        assert_ne!(next.id, failing);
    }
}
