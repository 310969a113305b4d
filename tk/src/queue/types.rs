//! Task and cycle types for the execution queue

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limiter::LimiterError;

/// Opaque identifier naming one unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&String> for TaskId {
    fn from(id: &String) -> Self {
        Self(id.clone())
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How one task ended within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Succeeded,
    Failed,
    /// Discarded by a drain before it started
    Cancelled,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// Outcome of one task in a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn succeeded(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::Succeeded,
            error: None,
        }
    }

    pub fn failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            state: TaskState::Failed,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::Cancelled,
            error: None,
        }
    }
}

/// Snapshot of the cycle counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    /// Accepted into the cycle but not yet started
    pub depth: usize,
    /// Executors currently running
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    /// Discarded by a drain before starting
    #[serde(default)]
    pub cancelled: usize,
    /// Input identifiers filtered out (previously failed or duplicated)
    #[serde(default)]
    pub skipped: usize,
}

/// Result of one `enqueue` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub stats: CycleStats,
    /// One record per accepted task, in submission order
    pub tasks: Vec<TaskRecord>,
}

impl CycleReport {
    /// Identifiers that ended in the given state
    pub fn ids_in(&self, state: TaskState) -> Vec<&TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.state == state)
            .map(|t| &t.task_id)
            .collect()
    }
}

/// Errors that reject an `enqueue` call or queue construction
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Malformed task identifier at position {position}: identifiers must be non-empty")]
    InvalidTaskId { position: usize },

    #[error(transparent)]
    Limiter(#[from] LimiterError),
}
