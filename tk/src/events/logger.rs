//! Event Logger - turns queue events into log lines and JSONL history
//!
//! The EventLogger subscribes to the EventBus, writes one tracing line per
//! event and, when configured with a path, appends every event to a JSONL file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, QueueEvent};

/// Consumer that records queue events
pub struct EventLogger {
    /// JSONL destination, if any
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl EventLogger {
    /// Create a logger; `path` enables JSONL persistence
    pub fn new(path: Option<PathBuf>) -> Self {
        debug!(?path, "EventLogger::new: creating logger");
        Self { path, writer: None }
    }

    /// Emit the human-readable log line for an event
    pub fn log_event(&self, event: &QueueEvent) {
        match event {
            QueueEvent::TaskStarted { cycle, task_id } => {
                info!(cycle, %task_id, "Started execution for task {}", task_id);
            }
            QueueEvent::TaskSucceeded { cycle, task_id } => {
                info!(cycle, %task_id, "Task {} executed successfully", task_id);
            }
            QueueEvent::TaskFailed { cycle, task_id, reason } => {
                warn!(cycle, %task_id, %reason, "Task {} failed: {}", task_id, reason);
            }
            QueueEvent::CycleComplete { cycle, stats } => {
                let summary = serde_json::to_string(stats).unwrap_or_else(|_| format!("{:?}", stats));
                info!(cycle, completed = stats.completed, failed = stats.failed, "Cycle complete: {}", summary);
            }
        }
    }

    /// Append an event to the JSONL file, if one is configured
    pub fn write_event(&mut self, event: &QueueEvent) -> eyre::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if self.writer.is_none() {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            debug!(?path, "EventLogger: opening event log");
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.writer = Some(BufWriter::new(file));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;

        // Cycle boundaries are the natural flush points
        if matches!(event, QueueEvent::CycleComplete { .. }) {
            writer.flush()?;
        }
        Ok(())
    }

    /// Consume events until the bus closes
    ///
    /// This is meant to be spawned as a background task.
    pub async fn run(mut self, mut rx: broadcast::Receiver<QueueEvent>) {
        debug!("EventLogger::run: starting event logger");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    self.log_event(&event);
                    if let Err(e) = self.write_event(&event) {
                        error!(event_type = event.event_type(), error = %e, "EventLogger: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// Read events back from a JSONL event log
pub fn read_event_log(path: impl AsRef<Path>) -> eyre::Result<Vec<EventLogEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_event_log: reading log file");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_event_log: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_event_log: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
///
/// Subscribes before spawning so no event emitted after this call is missed.
pub fn spawn_event_logger(event_bus: &Arc<EventBus>, path: Option<PathBuf>) -> tokio::task::JoinHandle<()> {
    let rx = event_bus.subscribe();
    let logger = EventLogger::new(path);
    tokio::spawn(logger.run(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{CycleStats, TaskId};
    use tempfile::tempdir;

    fn failed(id: &str) -> QueueEvent {
        QueueEvent::TaskFailed {
            cycle: 1,
            task_id: TaskId::from(id),
            reason: "reverted".to_string(),
        }
    }

    #[test]
    fn test_write_without_path_is_noop() {
        let mut logger = EventLogger::new(None);
        logger.write_event(&failed("x")).unwrap();
        assert!(logger.writer.is_none());
    }

    #[test]
    fn test_write_and_read_back() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("logs").join("events.jsonl");
        let mut logger = EventLogger::new(Some(path.clone()));

        logger.write_event(&failed("x")).unwrap();
        logger
            .write_event(&QueueEvent::CycleComplete {
                cycle: 1,
                stats: CycleStats {
                    failed: 1,
                    ..Default::default()
                },
            })
            .unwrap();

        let entries = read_event_log(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.event_type(), "TaskFailed");
        assert_eq!(entries[1].event.event_type(), "CycleComplete");
    }

    #[test]
    fn test_read_missing_log() {
        let temp = tempdir().unwrap();
        let entries = read_event_log(temp.path().join("nope.jsonl")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_read_skips_garbage_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let good = serde_json::to_string(&EventLogEntry::new(failed("y"))).unwrap();
        fs::write(&path, format!("{}\nnot json\n\n", good)).unwrap();

        let entries = read_event_log(&path).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_logger_stops_when_bus_dropped() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        let bus = Arc::new(EventBus::new(16));

        let handle = spawn_event_logger(&bus, Some(path.clone()));
        bus.emit(failed("z"));
        drop(bus);

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("logger should stop")
            .unwrap();

        let entries = read_event_log(&path).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
