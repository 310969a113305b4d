//! Keeper - the polling loop that feeds due tasks to the execution queue
//!
//! On every tick the keeper asks its [`TaskSource`] for due task identifiers
//! and runs them as one cycle. A tick that lands while the previous cycle is
//! still running is skipped. On shutdown polling stops and the queue is
//! drained.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::queue::{CycleReport, CycleStats, ExecutionQueue, QueueError, TaskExecutor, TaskId};

/// Where due task identifiers come from
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn due_tasks(&self) -> Result<Vec<TaskId>>;
}

/// Reads due task identifiers from a text file, one per line
///
/// Blank lines and lines starting with `#` are ignored. A missing file means
/// nothing is due.
#[derive(Debug, Clone)]
pub struct FileTaskSource {
    path: PathBuf,
}

impl FileTaskSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TaskSource for FileTaskSource {
    async fn due_tasks(&self) -> Result<Vec<TaskId>> {
        debug!(path = ?self.path, "FileTaskSource::due_tasks: called");

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("FileTaskSource::due_tasks: file missing, nothing due");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).context(format!("Failed to read due tasks from {}", self.path.display()));
            }
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(TaskId::from)
            .collect())
    }
}

/// Returns the same identifiers on every poll
#[derive(Debug, Clone, Default)]
pub struct StaticTaskSource {
    tasks: Vec<TaskId>,
}

impl StaticTaskSource {
    pub fn new<I>(tasks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<TaskId>,
    {
        Self {
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl TaskSource for StaticTaskSource {
    async fn due_tasks(&self) -> Result<Vec<TaskId>> {
        Ok(self.tasks.clone())
    }
}

/// Stand-in executor: waits a fixed time, then succeeds unless told to fail
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    delay: Duration,
    fail: HashSet<TaskId>,
}

impl SimulatedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail: HashSet::new(),
        }
    }

    /// Make the executor fail for these identifiers
    pub fn failing<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<TaskId>,
    {
        self.fail.extend(ids.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, task_id: &TaskId) -> Result<()> {
        debug!(%task_id, delay_ms = self.delay.as_millis() as u64, "SimulatedExecutor::execute: called");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.contains(task_id) {
            eyre::bail!("simulated failure for task {}", task_id);
        }
        Ok(())
    }
}

type CycleHandle = JoinHandle<Result<CycleReport, QueueError>>;

/// Drives the execution queue from a task source on a fixed interval
pub struct Keeper {
    queue: ExecutionQueue,
    source: Arc<dyn TaskSource>,
    executor: Arc<dyn TaskExecutor>,
    poll_interval: Duration,
    /// The cycle started by the most recent tick, if any
    current: Option<CycleHandle>,
}

impl Keeper {
    pub fn new(
        queue: ExecutionQueue,
        source: Arc<dyn TaskSource>,
        executor: Arc<dyn TaskExecutor>,
        poll_interval: Duration,
    ) -> Self {
        debug!(?poll_interval, "Keeper::new: called");
        Self {
            queue,
            source,
            executor,
            poll_interval,
            current: None,
        }
    }

    /// Build a keeper with the file-backed source and simulated executor
    pub fn from_config(config: &Config) -> Result<Self> {
        debug!("Keeper::from_config: called");
        let queue = ExecutionQueue::new(&config.queue).context("Failed to create execution queue")?;

        let source: Arc<dyn TaskSource> = match &config.keeper.due_tasks_file {
            Some(path) => {
                debug!(?path, "Keeper::from_config: using file task source");
                Arc::new(FileTaskSource::new(path))
            }
            None => {
                debug!("Keeper::from_config: no due-tasks-file, nothing will be due");
                Arc::new(StaticTaskSource::default())
            }
        };

        let executor = SimulatedExecutor::new(config.keeper.executor_delay())
            .failing(config.keeper.fail_tasks.iter().map(String::as_str));

        Ok(Self::new(queue, source, Arc::new(executor), config.keeper.poll_interval()))
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// Poll until a shutdown message arrives (or its sender is dropped), then drain
    pub async fn run(&mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<CycleStats> {
        debug!("Keeper::run: called");
        info!(
            max_concurrent = self.queue.limiter().max_concurrency(),
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            "Keeper starting"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.handle_poll_tick().await;
                }

                _ = shutdown_rx.recv() => {
                    debug!("Keeper::run: shutdown signal received");
                    info!("Starting graceful shutdown");
                    break;
                }
            }
        }

        let stats = self.queue.drain().await;

        if let Some(handle) = self.current.take() {
            debug!("Keeper::run: waiting for drained cycle to settle");
            Self::log_cycle_result(handle.await);
        }

        info!("Graceful shutdown complete");
        Ok(stats)
    }

    async fn handle_poll_tick(&mut self) {
        debug!("Keeper::handle_poll_tick: called");

        if let Some(handle) = self.current.take() {
            if !handle.is_finished() {
                debug!("Keeper::handle_poll_tick: previous cycle still running, skipping tick");
                self.current = Some(handle);
                return;
            }
            Self::log_cycle_result(handle.await);
        }

        info!("Checking for due tasks");
        let due = match self.source.due_tasks().await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Failed to fetch due tasks");
                return;
            }
        };

        if due.is_empty() {
            debug!("Keeper::handle_poll_tick: nothing due");
            return;
        }

        debug!(count = due.len(), "Keeper::handle_poll_tick: starting cycle");
        // Registered now, so a shutdown before the task is polled still drains it
        let cycle = self.queue.enqueue_shared(due, self.executor.clone());
        self.current = Some(tokio::spawn(cycle));
    }

    fn log_cycle_result(result: std::result::Result<Result<CycleReport, QueueError>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(report)) => {
                debug!(cycle = report.cycle, stats = ?report.stats, "Keeper: cycle finished");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Keeper: cycle rejected");
            }
            Err(e) => {
                warn!(error = %e, "Keeper: cycle task did not complete");
            }
        }
    }
}
