//! Engine configuration: an immutable value passed at construction time.

/// Where a retried or requeued task re-enters its namespace queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequeuePosition {
    /// Behind every currently pending task (fair across the backlog).
    #[default]
    Tail,
    /// Ahead of the backlog.
    Head,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace used when a caller does not name one.
    pub default_namespace: String,

    /// Re-enqueue position for automatic retries and operator requeues.
    pub requeue: RequeuePosition,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
            requeue: RequeuePosition::Tail,
        }
    }
}
