//! Circuit breaker over the upstream connection.
//!
//! Driven by a monotonic clock; wall-clock adjustments cannot reopen or
//! close the circuit.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Breaker tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub reset_timeout: Duration,
    /// Successes in half-open that close the circuit.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(60_000),
            success_threshold: 2,
        }
    }
}

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow; failures are counted.
    Closed,
    /// Calls are refused until the reset timeout elapses.
    Open,
    /// Probing: limited calls flow, watching for successes.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker with the transitions
/// `closed -> open -> half_open -> closed` (and `half_open -> open` on
/// any failure). No other transitions are reachable.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Create a breaker in the closed state.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Whether a call may execute now.
    ///
    /// In the open state, once `reset_timeout` has elapsed since the
    /// last failure this query transitions to half-open and returns
    /// true.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed_enough = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.reset_timeout);
                if elapsed_enough {
                    debug!("circuit breaker probing: open -> half-open");
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            },
        }
    }

    /// Record a successful upstream round trip.
    pub fn record_success(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            },
            BreakerState::HalfOpen => {
                inner.success_count = inner.success_count.saturating_add(1);
                if inner.success_count >= self.config.success_threshold {
                    debug!("circuit breaker recovered: half-open -> closed");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            },
            BreakerState::Open => {},
        }
    }

    /// Record a failed upstream round trip.
    pub fn record_failure(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.config.failure_threshold {
                    debug!(
                        failures = inner.failure_count,
                        "circuit breaker tripped: closed -> open"
                    );
                    inner.state = BreakerState::Open;
                }
            },
            BreakerState::HalfOpen => {
                debug!("circuit breaker re-tripped: half-open -> open");
                inner.state = BreakerState::Open;
                inner.success_count = 0;
            },
            BreakerState::Open => {},
        }
    }

    /// The current state (without the open -> half-open probe).
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(BreakerState::Open)
    }

    /// Return to closed, zeroing both counters.
    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = BreakerState::Closed;
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.last_failure = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_millis(50),
            success_threshold: 1,
        })
    }

    #[test]
    fn test_closed_allows_and_success_resets_failures() {
        let breaker = fast_breaker();
        assert!(breaker.can_execute());
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        // The success in between reset the count; still closed.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_at_threshold_and_half_opens_after_timeout() {
        let breaker = fast_breaker();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());

        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = fast_breaker();
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_success_threshold_gt_one() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(10),
            success_threshold: 2,
        });
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_reset() {
        let breaker = fast_breaker();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_execute());
    }
}
