//! Queue lifecycle notifications
//!
//! The ExecutionQueue reports everything it does through explicit, typed
//! events on a broadcast bus:
//!
//! ```text
//!   ExecutionQueue ──emit──► EventBus ──► EventLogger (tracing + JSONL)
//!                                     └─► any other subscriber
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let queue = ExecutionQueue::with_concurrency(3)?;
//! let mut rx = queue.event_bus().subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("{}: {:?}", event.event_type(), event);
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, create_event_bus};
pub use logger::{EventLogger, read_event_log, spawn_event_logger};
pub use types::{EventLogEntry, QueueEvent};
