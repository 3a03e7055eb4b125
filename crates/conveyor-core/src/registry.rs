use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Outcome;

/// A handler for a specific task type.
///
/// Receives the task's params payload and decodes it however it likes.
/// Failures are reported as an `Error` outcome; a panic inside a handler is
/// caught by the dispatcher and converted to one.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, params: serde_json::Value) -> Outcome;
}

/// A registered handler plus its retry ceiling.
#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<dyn TaskHandler>,
    pub max_retries: u32,
}

/// Registry of handlers (task_type -> entry).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, behind an Arc).
/// This avoids locks and keeps the engine's hot path allocation-free.
///
/// Registering a type twice replaces the earlier entry: last wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        max_retries: u32,
    ) {
        self.handlers.insert(
            task_type.into(),
            HandlerEntry {
                handler,
                max_retries,
            },
        );
    }

    pub fn get(&self, task_type: &str) -> Option<&HandlerEntry> {
        self.handlers.get(task_type)
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn handle(&self, _params: serde_json::Value) -> Outcome {
            Outcome::done()
        }
    }

    struct FailHandler;

    #[async_trait]
    impl TaskHandler for FailHandler {
        async fn handle(&self, _params: serde_json::Value) -> Outcome {
            Outcome::error("nope")
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = HandlerRegistry::new();
        reg.register("email", Arc::new(OkHandler), 3);

        let entry = reg.get("email").unwrap();
        assert_eq!(entry.max_retries, 3);
        assert!(reg.get("report").is_none());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut reg = HandlerRegistry::new();
        reg.register("email", Arc::new(OkHandler), 3);
        reg.register("email", Arc::new(FailHandler), 5);

        let entry = reg.get("email").unwrap();
        assert_eq!(entry.max_retries, 5);
        let outcome = entry.handler.handle(serde_json::Value::Null).await;
        assert!(outcome.is_error());
    }

    #[test]
    fn task_types_are_sorted() {
        let mut reg = HandlerRegistry::new();
        reg.register("report", Arc::new(OkHandler), 0);
        reg.register("email", Arc::new(OkHandler), 0);
        assert_eq!(reg.task_types(), vec!["email", "report"]);
    }
}
