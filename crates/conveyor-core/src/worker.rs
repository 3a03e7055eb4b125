//! Worker group: runs dispatcher loops with cooperative shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tracing::{debug, warn};

use crate::engine::Dispatcher;
use crate::error::EngineError;

/// How long a worker blocks on an empty queue before re-checking shutdown.
const CLAIM_WAIT: Duration = Duration::from_millis(500);

/// Backoff after the backing store reports itself unavailable.
const STORE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Handle for a group of dispatcher workers.
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers claiming from `namespace`.
    pub fn spawn(n: usize, namespace: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        let namespace = namespace.into();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let dispatcher = Arc::clone(&dispatcher);
            let namespace = namespace.clone();
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, &namespace, dispatcher, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    /// Stop taking new claims. In-flight handler executions finish normally.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    namespace: &str,
    dispatcher: Arc<Dispatcher>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Only the claim races against shutdown; once a task is claimed, its
        // handler runs to completion so the record never sticks in
        // PROCESSING because of a shutdown.
        let claimed = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            claimed = dispatcher.claim(namespace, Some(CLAIM_WAIT)) => claimed,
        };

        let record = match claimed {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(EngineError::StoreUnavailable(reason)) => {
                warn!(worker_id, namespace, %reason, "store unavailable, backing off");
                tokio::time::sleep(STORE_RETRY_DELAY).await;
                continue;
            }
            Err(e) => {
                warn!(worker_id, namespace, error = %e, "claim failed");
                continue;
            }
        };

        let id = record.id;
        let outcome = dispatcher.process(&record).await;
        match dispatcher.complete(id, outcome).await {
            Ok(()) => debug!(worker_id, %id, "task handled"),
            Err(e) => warn!(worker_id, %id, error = %e, "completion failed"),
        }
    }
}
