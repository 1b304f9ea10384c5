//! The durable background task engine: task records persisted like
//! any other entity, a validated status state machine, lease-based worker
//! ownership, backoff/jitter retry scheduling, composite multi-step tasks
//! with resumable step caching, and a FIFO event bus observers can track.

pub mod backoff;
pub mod composite;
pub mod control;
pub mod events;
pub mod handler;
pub mod lease;
pub mod model;
pub mod scheduler;
pub mod state;
pub mod tracker;

pub use control::{HandlerError, TaskControl};
pub use events::{EventBus, EventReceiver, LogLevel, TaskEvent};
pub use handler::{Handler, HandlerContext, HandlerRegistry, Step};
pub use lease::LeaseManager;
pub use model::{BackoffStrategy, JitterMode, RetryPolicy, StepResult, TaskRecord, TaskStatus};
pub use scheduler::{WorkerPool, WorkerPoolConfig};
pub use state::TaskStateMachine;
pub use tracker::Tracker;
