//! ExecutionQueue implementation

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::executor::TaskExecutor;
use super::types::{CycleReport, CycleStats, QueueError, TaskId, TaskRecord};
use crate::config::QueueConfig;
use crate::events::{EventBus, QueueEvent, create_event_bus};
use crate::limiter::{ConcurrencyLimiter, LimiterError};

/// Cycle counters and the failed-task memo
#[derive(Debug, Default)]
struct QueueState {
    /// Number of the most recent cycle; 0 before the first
    cycle: u64,
    depth: usize,
    in_flight: usize,
    completed: usize,
    failed: usize,
    cancelled: usize,
    skipped: usize,
    /// Bumped by every drain; cycles requested before the bump never start
    drain_epoch: u64,
    /// Identifiers that have failed at least once; survives cycles
    failed_tasks: HashSet<TaskId>,
}

impl QueueState {
    fn snapshot(&self) -> CycleStats {
        CycleStats {
            depth: self.depth,
            in_flight: self.in_flight,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            skipped: self.skipped,
        }
    }

    fn reset_outcomes(&mut self) {
        self.completed = 0;
        self.failed = 0;
        self.cancelled = 0;
    }
}

struct QueueInner {
    limiter: ConcurrencyLimiter,
    bus: Arc<EventBus>,
    state: Mutex<QueueState>,
    /// Held for the duration of a cycle; later `enqueue` calls wait here
    cycle_gate: tokio::sync::Mutex<()>,
    /// Signalled when `in_flight` returns to zero
    settled: Notify,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_failure(&self, cycle: u64, task_id: &TaskId, reason: String) {
        {
            let mut state = self.lock();
            if state.cycle == cycle {
                state.failed += 1;
            }
            state.failed_tasks.insert(task_id.clone());
        }
        self.bus.emit(QueueEvent::TaskFailed {
            cycle,
            task_id: task_id.clone(),
            reason,
        });
    }
}

/// Decrements `in_flight` however the task ends
struct InFlightGuard {
    inner: Arc<QueueInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        let settled = state.in_flight == 0;
        drop(state);

        if settled {
            self.inner.settled.notify_waiters();
        }
    }
}

/// Runs batches of tasks through a [`ConcurrencyLimiter`] with per-cycle
/// bookkeeping, a failed-task memo and lifecycle events.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("limiter", &self.inner.limiter)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ExecutionQueue {
    /// Build a queue from configuration, resolving the concurrency ceiling
    pub fn new(config: &QueueConfig) -> Result<Self, QueueError> {
        debug!(?config, "ExecutionQueue::new: called");
        let max_concurrent = config.resolve_max_concurrent()?;
        Self::with_event_bus(max_concurrent, Arc::new(EventBus::new(config.event_capacity)))
    }

    /// Build a queue with an explicit ceiling and its own event bus
    pub fn with_concurrency(max_concurrent: usize) -> Result<Self, QueueError> {
        Self::with_event_bus(max_concurrent, create_event_bus())
    }

    /// Build a queue that emits onto an existing event bus
    pub fn with_event_bus(max_concurrent: usize, bus: Arc<EventBus>) -> Result<Self, QueueError> {
        debug!(max_concurrent, "ExecutionQueue::with_event_bus: called");
        let limiter = ConcurrencyLimiter::new(max_concurrent)?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                limiter,
                bus,
                state: Mutex::new(QueueState::default()),
                cycle_gate: tokio::sync::Mutex::new(()),
                settled: Notify::new(),
            }),
        })
    }

    /// Run one cycle over `task_ids` and wait for every accepted task to settle
    ///
    /// Identifiers in the failed-task memo and repeats within the batch are
    /// skipped. Task failures never fail the call; they show up in the report,
    /// the memo and the event stream. An empty identifier rejects the whole
    /// batch before anything runs.
    ///
    /// The cycle is registered when this is called, not when the returned
    /// future is first polled: a [`drain`](Self::drain) that happens in
    /// between settles every task of the cycle as cancelled. The future must
    /// be awaited to completion; dropping it early leaves started tasks
    /// running without a report.
    pub fn enqueue<I, E>(&self, task_ids: I, executor: E) -> BoxFuture<'static, Result<CycleReport, QueueError>>
    where
        I: IntoIterator,
        I::Item: Into<TaskId>,
        E: TaskExecutor + 'static,
    {
        let task_ids: Vec<TaskId> = task_ids.into_iter().map(Into::into).collect();
        self.enqueue_shared(task_ids, Arc::new(executor))
    }

    /// [`enqueue`](Self::enqueue) with an executor shared across cycles
    pub fn enqueue_shared(
        &self,
        task_ids: Vec<TaskId>,
        executor: Arc<dyn TaskExecutor>,
    ) -> BoxFuture<'static, Result<CycleReport, QueueError>> {
        let epoch = self.inner.lock().drain_epoch;
        debug!(count = task_ids.len(), epoch, "ExecutionQueue::enqueue: called");

        let queue = self.clone();
        async move { queue.run_cycle(task_ids, executor, epoch).await }.boxed()
    }

    async fn run_cycle(
        &self,
        task_ids: Vec<TaskId>,
        executor: Arc<dyn TaskExecutor>,
        epoch: u64,
    ) -> Result<CycleReport, QueueError> {
        if let Some(position) = task_ids.iter().position(TaskId::is_empty) {
            warn!(position, "ExecutionQueue::enqueue: rejecting malformed task identifier");
            return Err(QueueError::InvalidTaskId { position });
        }

        let _gate = self.inner.cycle_gate.lock().await;

        // Filtering, the drain check and submission share one critical
        // section so a concurrent drain sees either none or all of it
        let (cycle, accepted, submissions) = {
            let mut state = self.inner.lock();
            let mut seen = HashSet::new();
            let mut accepted = Vec::with_capacity(task_ids.len());
            for id in task_ids.iter() {
                if state.failed_tasks.contains(id) {
                    debug!(task_id = %id, "ExecutionQueue::enqueue: skipping previously failed task");
                } else if !seen.insert(id.clone()) {
                    debug!(task_id = %id, "ExecutionQueue::enqueue: skipping duplicate task");
                } else {
                    accepted.push(id.clone());
                }
            }

            state.cycle += 1;
            state.depth = accepted.len();
            state.reset_outcomes();
            state.skipped = task_ids.len() - accepted.len();
            let cycle = state.cycle;

            let submissions: Vec<_> = if state.drain_epoch != epoch {
                info!(cycle, "Cycle requested before a drain, cancelling all of its tasks");
                state.cancelled = accepted.len();
                Vec::new()
            } else {
                accepted
                    .iter()
                    .map(|task_id| {
                        let inner = self.inner.clone();
                        let executor = executor.clone();
                        let task_id = task_id.clone();
                        self.inner
                            .limiter
                            .submit(move || run_task(inner, cycle, task_id, executor))
                    })
                    .collect()
            };
            (cycle, accepted, submissions)
        };

        info!(
            cycle,
            accepted = accepted.len(),
            skipped = task_ids.len() - accepted.len(),
            "Starting cycle"
        );

        if submissions.is_empty() && !accepted.is_empty() {
            let tasks = accepted.into_iter().map(TaskRecord::cancelled).collect();
            return Ok(self.finish_cycle(cycle, tasks));
        }

        let results = join_all(submissions).await;

        let mut tasks = Vec::with_capacity(accepted.len());
        for (task_id, result) in accepted.into_iter().zip(results) {
            match result {
                Ok(record) => tasks.push(record),
                Err(LimiterError::Cancelled) => {
                    debug!(task_id = %task_id, "ExecutionQueue::enqueue: task cancelled before start");
                    self.inner.lock().cancelled += 1;
                    tasks.push(TaskRecord::cancelled(task_id));
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(task_id = %task_id, %reason, "ExecutionQueue::enqueue: task unit did not finish");
                    self.inner.record_failure(cycle, &task_id, reason.clone());
                    tasks.push(TaskRecord::failed(task_id, reason));
                }
            }
        }

        Ok(self.finish_cycle(cycle, tasks))
    }

    /// Snapshot the counters, announce the cycle and reset for the next one
    fn finish_cycle(&self, cycle: u64, tasks: Vec<TaskRecord>) -> CycleReport {
        let stats = {
            let mut state = self.inner.lock();
            let stats = state.snapshot();
            state.reset_outcomes();
            stats
        };
        self.inner.bus.emit(QueueEvent::CycleComplete { cycle, stats });

        CycleReport { cycle, stats, tasks }
    }

    /// Cancel work that has not started and wait for running work to finish
    ///
    /// Cycles already requested but not yet started are cancelled too.
    /// Returns the counters as they stand once nothing is in flight. The
    /// queue stays usable for cycles requested afterwards.
    pub async fn drain(&self) -> CycleStats {
        {
            let mut state = self.inner.lock();
            state.drain_epoch += 1;
            debug!(epoch = state.drain_epoch, "ExecutionQueue::drain: epoch bumped");
        }

        let state = self.inner.limiter.state();
        info!(
            active = state.active,
            pending = state.pending,
            "Draining queue, waiting for in-flight tasks"
        );

        let cancelled = self.inner.limiter.cancel_pending();
        debug!(cancelled, "ExecutionQueue::drain: pending work cancelled");

        self.inner.limiter.wait_idle().await;
        self.wait_settled().await;

        info!("Drained successfully");
        self.stats()
    }

    async fn wait_settled(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.lock().in_flight == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Live snapshot of the current cycle's counters
    pub fn stats(&self) -> CycleStats {
        self.inner.lock().snapshot()
    }

    pub fn active_count(&self) -> usize {
        self.inner.limiter.active_count()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.limiter.pending_count()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.inner.limiter
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Number of cycles started so far
    pub fn cycle_count(&self) -> u64 {
        self.inner.lock().cycle
    }

    /// Whether a task is excluded by the failed-task memo
    pub fn is_failed(&self, task_id: &TaskId) -> bool {
        self.inner.lock().failed_tasks.contains(task_id)
    }

    /// Contents of the failed-task memo, sorted
    pub fn failed_tasks(&self) -> Vec<TaskId> {
        let mut tasks: Vec<TaskId> = self.inner.lock().failed_tasks.iter().cloned().collect();
        tasks.sort();
        tasks
    }

    /// Allow a failed task to run again; returns whether it was in the memo
    pub fn reset_failed(&self, task_id: &TaskId) -> bool {
        let removed = self.inner.lock().failed_tasks.remove(task_id);
        debug!(%task_id, removed, "ExecutionQueue::reset_failed: called");
        removed
    }

    /// Empty the failed-task memo; returns how many entries were removed
    pub fn clear_failed(&self) -> usize {
        let mut state = self.inner.lock();
        let count = state.failed_tasks.len();
        state.failed_tasks.clear();
        debug!(count, "ExecutionQueue::clear_failed: called");
        count
    }
}

/// One task's unit of work, run once the limiter grants a slot
async fn run_task(inner: Arc<QueueInner>, cycle: u64, task_id: TaskId, executor: Arc<dyn TaskExecutor>) -> TaskRecord {
    {
        let mut state = inner.lock();
        if state.cycle == cycle {
            state.depth = state.depth.saturating_sub(1);
        }
        state.in_flight += 1;
    }
    let _guard = InFlightGuard { inner: inner.clone() };

    inner.bus.emit(QueueEvent::TaskStarted {
        cycle,
        task_id: task_id.clone(),
    });

    let outcome = match AssertUnwindSafe(executor.execute(&task_id)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(eyre::eyre!("executor panicked: {}", panic_message(panic.as_ref()))),
    };

    match outcome {
        Ok(()) => {
            {
                let mut state = inner.lock();
                if state.cycle == cycle {
                    state.completed += 1;
                }
            }
            inner.bus.emit(QueueEvent::TaskSucceeded {
                cycle,
                task_id: task_id.clone(),
            });
            TaskRecord::succeeded(task_id)
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            inner.record_failure(cycle, &task_id, reason.clone());
            TaskRecord::failed(task_id, reason)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
