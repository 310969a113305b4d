//! TaskKeeper - bounded-concurrency execution of due tasks
//!
//! A keeper periodically collects the identifiers of tasks that are due and
//! runs them as one cycle through an execution queue that never runs more
//! than a fixed number of executors at once.
//!
//! # Core Concepts
//!
//! - **Bounded concurrency**: a FIFO limiter admits at most N units of work
//! - **Failed-task memo**: a task that fails once is skipped by later cycles
//! - **Typed notifications**: every start, outcome and cycle summary is a
//!   [`QueueEvent`] on a broadcast bus
//! - **Graceful drain**: shutdown cancels waiting work and lets running work finish
//!
//! # Modules
//!
//! - [`limiter`] - ConcurrencyLimiter, the bounded-parallelism primitive
//! - [`queue`] - ExecutionQueue, cycle bookkeeping and drain
//! - [`events`] - Queue events, event bus and event logger
//! - [`config`] - Configuration types and loading
//! - [`keeper`] - Polling loop, task sources and the simulated executor
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod events;
pub mod keeper;
pub mod limiter;
pub mod queue;

// Re-export commonly used types
pub use config::{Config, KeeperConfig, LoggingConfig, QueueConfig};
pub use events::{EventBus, EventLogEntry, EventLogger, QueueEvent, spawn_event_logger};
pub use keeper::{FileTaskSource, Keeper, SimulatedExecutor, StaticTaskSource, TaskSource};
pub use limiter::{ConcurrencyLimiter, LimiterError, LimiterState, LimiterStats, Submission};
pub use queue::{CycleReport, CycleStats, ExecutionQueue, QueueError, TaskExecutor, TaskId, TaskRecord, TaskState};
