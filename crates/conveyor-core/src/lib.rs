//! conveyor-core
//!
//! Task queue engine: publishers write work into namespace-partitioned FIFO
//! queues, dispatchers claim and execute it through registered handlers under
//! a bounded retry policy, and the query/cleanup layer inspects and prunes
//! the accumulated history.
//!
//! Module map:
//! - **domain**: records, statuses, outcomes, ids
//! - **registry**: task_type -> handler mapping with retry ceilings
//! - **typed**: typed task/handler layer over the registry
//! - **store**: backing-store seams (RecordStore, PendingQueue) + in-memory impl
//! - **engine**: publisher, dispatcher, query, cleanup, stats behind the
//!   `Engine` facade
//! - **worker**: dispatcher worker group with cooperative shutdown

pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod registry;
pub mod store;
pub mod typed;
pub mod worker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, RequeuePosition};
pub use domain::{Outcome, TaskId, TaskRecord, TaskSpec, TaskStatus};
pub use engine::{
    CleanReport, Engine, EngineBuilder, NamespaceStats, SortField, TaskFilter, TaskSort,
    parse_duration,
};
pub use error::EngineError;
pub use registry::{HandlerEntry, HandlerRegistry, TaskHandler};
pub use store::{MemoryStore, PendingQueue, RecordStore};
pub use worker::WorkerGroup;
