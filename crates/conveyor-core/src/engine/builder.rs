//! EngineBuilder: construction and wiring.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::Engine;
use crate::registry::{HandlerRegistry, TaskHandler};
use crate::store::{MemoryStore, PendingQueue, RecordStore};
use crate::typed::{Handler, Task};

/// Builds an [`Engine`].
///
/// Handlers are registered here and frozen at `build()`; the registry is
/// immutable for the engine's lifetime. Without an explicit backend the
/// engine runs on an in-memory store.
///
/// ```ignore
/// let engine = EngineBuilder::new()
///     .register("email", Arc::new(EmailHandler), 3)
///     .build();
/// ```
pub struct EngineBuilder {
    config: Config,
    registry: HandlerRegistry,
    clock: Arc<dyn Clock>,
    backend: Option<(Arc<dyn RecordStore>, Arc<dyn PendingQueue>)>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            registry: HandlerRegistry::new(),
            clock: Arc::new(SystemClock),
            backend: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Substitute a backing store; defaults to a fresh in-memory store.
    pub fn backend(
        mut self,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn PendingQueue>,
    ) -> Self {
        self.backend = Some((records, queue));
        self
    }

    /// Register a handler for a task type with its retry ceiling.
    /// Last registration for a type wins.
    pub fn register(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        max_retries: u32,
    ) -> Self {
        self.registry.register(task_type, handler, max_retries);
        self
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register_task<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
        max_retries: u32,
    ) -> Self {
        self.registry.register_task::<T, H>(handler, max_retries);
        self
    }

    pub fn build(self) -> Engine {
        let (records, queue) = self.backend.unwrap_or_else(|| {
            let store = Arc::new(MemoryStore::with_clock(Arc::clone(&self.clock)));
            (
                Arc::clone(&store) as Arc<dyn RecordStore>,
                store as Arc<dyn PendingQueue>,
            )
        });
        Engine::wire(
            self.config,
            Arc::new(self.registry),
            records,
            queue,
            self.clock,
        )
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
