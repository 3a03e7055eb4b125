//! Typed task layer: bind a payload type to its task-type name so handlers
//! receive decoded structs instead of raw JSON.
//!
//! This is an ergonomic wrapper over the string-keyed registry; dispatch
//! semantics are identical. A payload that fails to decode completes as an
//! `Error` outcome.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::Outcome;
use crate::registry::{HandlerRegistry, TaskHandler};

/// A payload type tied to a task-type name.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail { to: String }
///
/// impl Task for SendEmail {
///     const TYPE: &'static str = "email";
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

/// Typed handler: receives the decoded payload.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Outcome;
}

/// Erases a `Handler<T>` into a `TaskHandler` so it fits the string-keyed
/// registry.
struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

#[async_trait]
impl<T: Task, H: Handler<T>> TaskHandler for TypedHandler<T, H> {
    async fn handle(&self, params: serde_json::Value) -> Outcome {
        let task: T = match serde_json::from_value(params) {
            Ok(task) => task,
            Err(e) => {
                return Outcome::error(format!("payload decode for '{}': {e}", T::TYPE));
            }
        };
        self.handler.handle(task).await
    }
}

impl HandlerRegistry {
    /// Register a typed handler under `T::TYPE`.
    pub fn register_task<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
        max_retries: u32,
    ) {
        self.register(
            T::TYPE,
            Arc::new(TypedHandler {
                handler,
                _marker: PhantomData,
            }),
            max_retries,
        );
    }
}
