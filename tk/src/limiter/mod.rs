//! Bounded-parallelism limiter
//!
//! Admits submitted work up to a fixed concurrency ceiling. Excess work waits
//! in a FIFO queue and starts as soon as a running item finishes. Pending
//! work can be cancelled in bulk without touching work that already started.

mod core;
mod types;

pub use core::{ConcurrencyLimiter, Submission};
pub use types::{LimiterError, LimiterState, LimiterStats};
