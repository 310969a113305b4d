//! Types for the concurrency limiter

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the limiter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// The concurrency ceiling is not a positive integer
    #[error("Invalid concurrency ceiling: {0} (must be a positive integer)")]
    InvalidConcurrency(String),

    /// Pending work was discarded before it started
    #[error("Work cancelled before it started")]
    Cancelled,

    /// The task running the work was aborted or panicked
    #[error("Work aborted: {0}")]
    Aborted(String),
}

impl LimiterError {
    /// True if this is the cancellation settlement of pending work
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LimiterError::Cancelled)
    }
}

/// Lifetime statistics for a limiter
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub total_submitted: u64,
    pub total_started: u64,
    pub total_cancelled: u64,
    pub peak_active: usize,
    pub peak_pending: usize,
}

/// Point-in-time view of the limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterState {
    pub max_concurrency: usize,
    pub active: usize,
    pub pending: usize,
    pub stats: LimiterStats,
}

impl LimiterState {
    /// True when nothing is running and nothing is waiting
    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.pending == 0
    }

    /// Free capacity slots
    pub fn available(&self) -> usize {
        self.max_concurrency.saturating_sub(self.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_error_display() {
        let err = LimiterError::InvalidConcurrency("0".to_string());
        assert!(err.to_string().contains("positive integer"));
        assert!(LimiterError::Cancelled.is_cancelled());
        assert!(!LimiterError::Aborted("boom".to_string()).is_cancelled());
    }

    #[test]
    fn test_limiter_state_helpers() {
        let state = LimiterState {
            max_concurrency: 3,
            active: 1,
            pending: 0,
            stats: LimiterStats::default(),
        };
        assert_eq!(state.available(), 2);
        assert!(!state.is_idle());

        let idle = LimiterState { active: 0, ..state };
        assert!(idle.is_idle());
    }
}
