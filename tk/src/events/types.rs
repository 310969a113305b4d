//! Event types for execution queue notifications
//!
//! Four notification categories are emitted by the queue:
//! - task started
//! - task succeeded
//! - task failed (with the reason)
//! - cycle complete (with the cycle statistics)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::{CycleStats, TaskId};

/// Lifecycle notifications emitted by the ExecutionQueue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    /// A task's executor has been invoked
    TaskStarted { cycle: u64, task_id: TaskId },
    /// A task's executor reported success
    TaskSucceeded { cycle: u64, task_id: TaskId },
    /// A task's executor failed; the task is now in the failed-task memo
    TaskFailed { cycle: u64, task_id: TaskId, reason: String },
    /// Every task in the cycle has settled
    CycleComplete { cycle: u64, stats: CycleStats },
}

impl QueueEvent {
    /// Get the cycle this event belongs to
    pub fn cycle(&self) -> u64 {
        match self {
            QueueEvent::TaskStarted { cycle, .. }
            | QueueEvent::TaskSucceeded { cycle, .. }
            | QueueEvent::TaskFailed { cycle, .. }
            | QueueEvent::CycleComplete { cycle, .. } => *cycle,
        }
    }

    /// Get the task this event is about, if any
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            QueueEvent::TaskStarted { task_id, .. }
            | QueueEvent::TaskSucceeded { task_id, .. }
            | QueueEvent::TaskFailed { task_id, .. } => Some(task_id),
            QueueEvent::CycleComplete { .. } => None,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::TaskStarted { .. } => "TaskStarted",
            QueueEvent::TaskSucceeded { .. } => "TaskSucceeded",
            QueueEvent::TaskFailed { .. } => "TaskFailed",
            QueueEvent::CycleComplete { .. } => "CycleComplete",
        }
    }
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: QueueEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: QueueEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = QueueEvent::TaskFailed {
            cycle: 3,
            task_id: TaskId::from("task-9"),
            reason: "rpc timeout".to_string(),
        };
        assert_eq!(event.cycle(), 3);
        assert_eq!(event.task_id(), Some(&TaskId::from("task-9")));
        assert_eq!(event.event_type(), "TaskFailed");

        let complete = QueueEvent::CycleComplete {
            cycle: 3,
            stats: CycleStats::default(),
        };
        assert_eq!(complete.task_id(), None);
        assert_eq!(complete.event_type(), "CycleComplete");
    }

    #[test]
    fn test_event_serialization() {
        let event = QueueEvent::TaskStarted {
            cycle: 1,
            task_id: TaskId::from("42"),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"TaskStarted","cycle":1,"task_id":"42"}"#);

        let parsed: QueueEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_cycle_complete_carries_stats() {
        let event = QueueEvent::CycleComplete {
            cycle: 2,
            stats: CycleStats {
                completed: 2,
                failed: 1,
                ..Default::default()
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""completed":2"#));
        assert!(json.contains(r#""failed":1"#));
        assert!(json.contains(r#""in_flight":0"#));
    }

    #[test]
    fn test_event_log_entry() {
        let entry = EventLogEntry::new(QueueEvent::TaskSucceeded {
            cycle: 1,
            task_id: TaskId::from("a"),
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ts\""));
        assert!(json.contains("TaskSucceeded"));
    }
}
