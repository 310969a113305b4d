//! Execution queue
//!
//! Runs one cycle of tasks at a time through the concurrency limiter:
//!
//! ```text
//!   enqueue(ids) ──► filter (failed memo, duplicates) ──► ConcurrencyLimiter
//!                                                            │
//!              TaskStarted ◄── run executor ◄────────────────┘
//!                   │
//!        TaskSucceeded / TaskFailed ──► CycleComplete { stats }
//! ```
//!
//! A task that fails once is remembered and skipped by every later cycle
//! until it is reset. `drain` cancels whatever has not started and waits for
//! running executors.

mod core;
mod executor;
mod types;

pub use core::ExecutionQueue;
pub use executor::TaskExecutor;
pub use types::{CycleReport, CycleStats, QueueError, TaskId, TaskRecord, TaskState};
