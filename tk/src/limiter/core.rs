//! Limiter implementation

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::types::{LimiterError, LimiterState, LimiterStats};

/// A submission waiting for a capacity slot
struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<()>,
}

/// Admission state protected by mutex
struct LimiterInner {
    /// Work items holding a slot
    active: usize,

    /// FIFO of submissions waiting for a slot
    pending: VecDeque<Waiter>,

    next_ticket: u64,

    stats: LimiterStats,
}

struct Shared {
    max_concurrency: usize,
    inner: Mutex<LimiterInner>,
    idle: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LimiterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Give a freed slot to the oldest live waiter, or return it to the pool
    fn release(&self) {
        let mut inner = self.lock();

        while let Some(waiter) = inner.pending.pop_front() {
            let ticket = waiter.ticket;
            if waiter.tx.send(()).is_ok() {
                inner.stats.total_started += 1;
                debug!(ticket, "Shared::release: slot handed to pending work");
                return;
            }
            debug!(ticket, "Shared::release: waiter gone, trying next");
        }

        inner.active = inner.active.saturating_sub(1);
        let idle = inner.active == 0;
        drop(inner);

        if idle {
            debug!("Shared::release: limiter idle");
            self.idle.notify_waiters();
        }
    }
}

/// A held capacity slot, released on drop
struct Permit {
    shared: Arc<Shared>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// A queued submission that has not been granted a slot yet
struct PendingSlot {
    shared: Arc<Shared>,
    ticket: u64,
    rx: Option<oneshot::Receiver<()>>,
}

impl PendingSlot {
    async fn granted(mut self) -> Result<Permit, LimiterError> {
        let result = match self.rx.as_mut() {
            Some(rx) => rx.await,
            None => return Err(LimiterError::Cancelled),
        };
        self.rx = None;

        match result {
            Ok(()) => Ok(Permit {
                shared: self.shared.clone(),
            }),
            // Sender dropped by cancel_pending
            Err(_) => Err(LimiterError::Cancelled),
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };

        let mut inner = self.shared.lock();
        if let Some(pos) = inner.pending.iter().position(|w| w.ticket == self.ticket) {
            debug!(ticket = self.ticket, "PendingSlot::drop: removing abandoned waiter");
            inner.pending.remove(pos);
            return;
        }
        drop(inner);

        // Granted between the last poll and the drop: the slot is ours to give back
        if rx.try_recv().is_ok() {
            debug!(ticket = self.ticket, "PendingSlot::drop: releasing unused grant");
            self.shared.release();
        }
    }
}

enum Admission {
    Granted(Permit),
    Queued(PendingSlot),
}

impl Admission {
    async fn ready(self) -> Result<Permit, LimiterError> {
        match self {
            Admission::Granted(permit) => Ok(permit),
            Admission::Queued(slot) => slot.granted().await,
        }
    }
}

/// Handle to submitted work
///
/// Resolves to the work's output, or to [`LimiterError::Cancelled`] if the
/// work was discarded by [`ConcurrencyLimiter::cancel_pending`] before it
/// started.
#[must_use = "a submission does nothing observable unless awaited"]
pub struct Submission<T> {
    handle: JoinHandle<Result<T, LimiterError>>,
}

impl<T> Submission<T> {
    /// Abort the work. Pending work leaves the queue; running work is dropped.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for Submission<T> {
    type Output = Result<T, LimiterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(LimiterError::Aborted(e.to_string()))),
        }
    }
}

/// The ConcurrencyLimiter runs at most `max_concurrency` work items at once,
/// starting the rest in submission order as slots free up.
///
/// Cloning yields another handle to the same admission state.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("state", &self.state())
            .finish()
    }
}

impl ConcurrencyLimiter {
    /// Create a limiter with a fixed ceiling
    pub fn new(max_concurrency: usize) -> Result<Self, LimiterError> {
        debug!(max_concurrency, "ConcurrencyLimiter::new: called");
        if max_concurrency == 0 {
            return Err(LimiterError::InvalidConcurrency(max_concurrency.to_string()));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                max_concurrency,
                inner: Mutex::new(LimiterInner {
                    active: 0,
                    pending: VecDeque::new(),
                    next_ticket: 0,
                    stats: LimiterStats::default(),
                }),
                idle: Notify::new(),
            }),
        })
    }

    /// Decide admission for one submission, in call order
    fn admit(&self) -> Admission {
        let mut inner = self.shared.lock();
        inner.stats.total_submitted += 1;

        if inner.active < self.shared.max_concurrency && inner.pending.is_empty() {
            inner.active += 1;
            inner.stats.total_started += 1;
            inner.stats.peak_active = inner.stats.peak_active.max(inner.active);
            debug!(active = inner.active, "ConcurrencyLimiter::admit: starting immediately");
            return Admission::Granted(Permit {
                shared: self.shared.clone(),
            });
        }

        let ticket = inner.next_ticket;
        inner.next_ticket += 1;

        let (tx, rx) = oneshot::channel();
        inner.pending.push_back(Waiter { ticket, tx });
        inner.stats.peak_pending = inner.stats.peak_pending.max(inner.pending.len());
        debug!(ticket, pending = inner.pending.len(), "ConcurrencyLimiter::admit: ceiling reached, queuing");

        Admission::Queued(PendingSlot {
            shared: self.shared.clone(),
            ticket,
            rx: Some(rx),
        })
    }

    /// Submit work to run once a slot is available
    ///
    /// Admission is decided before this returns, so pending work starts in
    /// the order `submit` was called. The work runs on its own tokio task;
    /// must be called from within a tokio runtime.
    pub fn submit<F, Fut, T>(&self, work: F) -> Submission<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let admission = self.admit();

        let handle = tokio::spawn(async move {
            let permit = admission.ready().await?;
            let output = work().await;
            drop(permit);
            Ok(output)
        });

        Submission { handle }
    }

    /// Discard all pending work; returns how many items were dropped
    ///
    /// Their submissions settle with [`LimiterError::Cancelled`]. Work that
    /// already holds a slot keeps running.
    pub fn cancel_pending(&self) -> usize {
        let mut inner = self.shared.lock();
        let cancelled: Vec<Waiter> = inner.pending.drain(..).collect();
        inner.stats.total_cancelled += cancelled.len() as u64;
        drop(inner);

        let count = cancelled.len();
        debug!(count, "ConcurrencyLimiter::cancel_pending: dropping waiters");
        // Dropping the senders settles each waiting submission
        drop(cancelled);
        count
    }

    /// Wait until no work holds a slot
    pub async fn wait_idle(&self) {
        debug!("ConcurrencyLimiter::wait_idle: called");
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active_count() == 0 {
                debug!("ConcurrencyLimiter::wait_idle: idle");
                return;
            }
            notified.await;
        }
    }

    /// Number of work items currently holding a slot
    pub fn active_count(&self) -> usize {
        self.shared.lock().active
    }

    /// Number of work items waiting for a slot
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency
    }

    /// Lifetime statistics
    pub fn stats(&self) -> LimiterStats {
        self.shared.lock().stats.clone()
    }

    /// Current admission state
    pub fn state(&self) -> LimiterState {
        let inner = self.shared.lock();
        LimiterState {
            max_concurrency: self.shared.max_concurrency,
            active: inner.active,
            pending: inner.pending.len(),
            stats: inner.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = ConcurrencyLimiter::new(0).unwrap_err();
        assert_eq!(err, LimiterError::InvalidConcurrency("0".to_string()));
    }

    #[tokio::test]
    async fn test_runs_immediately_under_ceiling() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();

        let result = limiter.submit(|| async { 42 }).await;

        assert_eq!(result, Ok(42));
        assert_eq!(limiter.active_count(), 0);
        assert_eq!(limiter.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_limit() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let (release_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let mut submissions = Vec::new();
        for _ in 0..4 {
            let mut rx = release_tx.subscribe();
            submissions.push(limiter.submit(move || async move {
                let _ = rx.recv().await;
            }));
        }

        // Admission is decided at submit time
        assert_eq!(limiter.active_count(), 2);
        assert_eq!(limiter.pending_count(), 2);

        // Let the first two start before releasing everything
        tokio::time::sleep(Duration::from_millis(10)).await;
        release_tx.send(()).unwrap();

        // Later starters subscribed before the send, so they are released too
        for submission in submissions {
            assert!(submission.await.is_ok());
        }
        assert_eq!(limiter.active_count(), 0);
        assert_eq!(limiter.stats().peak_active, 2);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let submissions: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                limiter.submit(move || async move {
                    order.lock().unwrap().push(i);
                    tokio::task::yield_now().await;
                })
            })
            .collect();

        for submission in submissions {
            submission.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_max_active_never_exceeds_ceiling() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let submissions: Vec<_> = (0..12)
            .map(|_| {
                let current = current.clone();
                let peak = peak.clone();
                limiter.submit(move || async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        futures::future::join_all(submissions).await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.stats().total_started, 12);
    }

    #[tokio::test]
    async fn test_work_error_passes_through_and_frees_slot() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();

        let failing = limiter.submit(|| async { Err::<(), String>("boom".to_string()) });
        let next = limiter.submit(|| async { Ok::<u32, String>(7) });

        assert_eq!(failing.await, Ok(Err("boom".to_string())));
        assert_eq!(next.await, Ok(Ok(7)));
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let running = limiter.submit(move || async move {
            let _ = gate_rx.await;
            "done"
        });
        let queued_a = limiter.submit(|| async { "a" });
        let queued_b = limiter.submit(|| async { "b" });

        assert_eq!(limiter.pending_count(), 2);
        assert_eq!(limiter.cancel_pending(), 2);
        assert_eq!(limiter.pending_count(), 0);

        assert_eq!(queued_a.await, Err(LimiterError::Cancelled));
        assert_eq!(queued_b.await, Err(LimiterError::Cancelled));

        // Active work is unaffected
        assert_eq!(limiter.active_count(), 1);
        gate_tx.send(()).unwrap();
        assert_eq!(running.await, Ok("done"));
        assert_eq!(limiter.stats().total_cancelled, 2);
    }

    #[tokio::test]
    async fn test_abort_pending_leaves_queue() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let running = limiter.submit(move || async move {
            let _ = gate_rx.await;
        });
        let queued = limiter.submit(|| async {});
        assert_eq!(limiter.pending_count(), 1);

        // Give the queued task a chance to park on its slot
        tokio::task::yield_now().await;
        queued.abort();
        assert!(matches!(queued.await, Err(LimiterError::Aborted(_))));
        assert_eq!(limiter.pending_count(), 0);

        gate_tx.send(()).unwrap();
        running.await.unwrap();
        assert_eq!(limiter.active_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();

        // Idle limiter returns at once
        limiter.wait_idle().await;

        let _a = limiter.submit(|| tokio::time::sleep(Duration::from_millis(20)));
        let _b = limiter.submit(|| tokio::time::sleep(Duration::from_millis(40)));
        assert_eq!(limiter.active_count(), 2);

        tokio::time::timeout(Duration::from_secs(2), limiter.wait_idle())
            .await
            .expect("limiter should become idle");
        assert_eq!(limiter.active_count(), 0);
    }

    #[tokio::test]
    async fn test_state_snapshot() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let running = limiter.submit(move || async move {
            let _ = gate_rx.await;
        });
        let queued = limiter.submit(|| async {});

        let state = limiter.state();
        assert_eq!(state.max_concurrency, 1);
        assert_eq!(state.active, 1);
        assert_eq!(state.pending, 1);
        assert_eq!(state.available(), 0);
        assert_eq!(state.stats.total_submitted, 2);

        gate_tx.send(()).unwrap();
        running.await.unwrap();
        queued.await.unwrap();
        assert!(limiter.state().is_idle());
    }
}
