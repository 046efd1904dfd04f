//! Consecutive-failure circuit breaker.
//!
//! Closed until `failure_threshold` calls in a row fail, then open. An open
//! circuit rejects calls locally until `recovery_timeout` has passed since
//! the last failure, after which it resets optimistically: the counter is
//! cleared and every caller is let through. There is no single-probe
//! half-open state.
//!
//! State lives behind a `std::sync::Mutex` that is only held for the
//! bookkeeping itself, never across an `.await`.

use crate::error::InferenceError;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure_time: Option<Instant>,
    open: bool,
}

/// Point-in-time view of the breaker, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub failure_count: u32,
    pub open: bool,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    /// Milliseconds since the last recorded failure, if any.
    pub since_last_failure_ms: Option<u64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Bookkeeping is a handful of field writes; a panic elsewhere cannot
        // leave it half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Gate a call. `Err(CircuitOpen)` means no network attempt may be made.
    pub fn check(&self) -> Result<(), InferenceError> {
        let mut state = self.lock();
        if !state.open {
            return Ok(());
        }

        let elapsed = state
            .last_failure_time
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed > self.recovery_timeout {
            info!(
                "Circuit reset after {:.1}s without failures",
                elapsed.as_secs_f64()
            );
            state.open = false;
            state.failure_count = 0;
            return Ok(());
        }

        let remaining = self.recovery_timeout - elapsed;
        Err(InferenceError::CircuitOpen {
            failure_count: state.failure_count,
            retry_after_ms: remaining.as_millis() as u64,
        })
    }

    /// A call succeeded: close the circuit and clear the counter.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.open || state.failure_count > 0 {
            info!(
                "Inference call succeeded, clearing {} recorded failure(s)",
                state.failure_count
            );
        }
        state.failure_count = 0;
        state.open = false;
    }

    /// A call failed after exhausting its retries.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_time = Some(Instant::now());
        if !state.open && state.failure_count >= self.failure_threshold {
            state.open = true;
            warn!(
                "Circuit opened after {} consecutive failures; rejecting calls for {}s",
                state.failure_count,
                self.recovery_timeout.as_secs()
            );
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        BreakerSnapshot {
            failure_count: state.failure_count,
            open: state.open,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs(),
            since_last_failure_ms: state
                .last_failure_time
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold() {
        let b = breaker();
        b.record_failure();
        b.record_failure();
        assert!(b.check().is_ok());
        b.record_failure();

        let err = b.check().unwrap_err();
        assert!(err.is_circuit_open());
        assert!(b.snapshot().open);
        assert_eq!(b.snapshot().failure_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_counter() {
        let b = breaker();
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert!(b.check().is_ok());
        assert_eq!(b.snapshot().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resets_only_after_recovery_timeout() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        // Exactly the timeout is not enough; the reset needs strictly more.
        assert!(b.check().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(b.check().is_ok());
        let snap = b.snapshot();
        assert!(!snap.open);
        assert_eq!(snap.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_counts_down() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(20)).await;
        match b.check() {
            Err(InferenceError::CircuitOpen { retry_after_ms, .. }) => {
                assert_eq!(retry_after_ms, 40_000)
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_reset_counts_from_zero() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(b.check().is_ok());
        b.record_failure();
        assert!(b.check().is_ok());
        assert_eq!(b.snapshot().failure_count, 1);
    }
}
