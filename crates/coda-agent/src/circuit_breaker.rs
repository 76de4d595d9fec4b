//! Circuit breaker for model API calls
//!
//! A run makes hundreds of sequential model calls. When the API keeps failing
//! with non-retryable errors, the breaker opens and calls fail fast with
//! `CodaError::ApiLimit` until the cool-down elapses.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls allowed
    Closed,
    /// Too many failures, calls rejected
    Open,
    /// Cool-down elapsed, next call tests recovery
    HalfOpen,
}

/// Consecutive-failure circuit breaker
///
/// ```
/// use coda_agent::{CircuitBreaker, CircuitState};
///
/// let cb = CircuitBreaker::new(2, 60);
/// cb.record_failure();
/// cb.record_failure();
/// assert_eq!(cb.state(), CircuitState::Open);
/// assert!(!cb.can_execute());
/// ```
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    last_failure_ms: AtomicU64,
    threshold: u32,
    cool_down: Duration,
}

impl CircuitBreaker {
    /// `threshold` consecutive failures open the breaker for `cool_down_secs`
    pub fn new(threshold: u32, cool_down_secs: u64) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            threshold,
            cool_down: Duration::from_secs(cool_down_secs),
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return CircuitState::Closed;
        }

        if self.since_last_failure() >= self.cool_down {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(now_millis(), Ordering::Relaxed);
    }

    /// Closed and half-open breakers let the call through
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Time left until the breaker half-opens; zero unless open
    pub fn time_until_retry(&self) -> Duration {
        match self.state() {
            CircuitState::Open => self.cool_down.saturating_sub(self.since_last_failure()),
            _ => Duration::ZERO,
        }
    }

    fn since_last_failure(&self) -> Duration {
        let last = self.last_failure_ms.load(Ordering::Relaxed);
        Duration::from_millis(now_millis().saturating_sub(last))
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_initial_state_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.time_until_retry(), Duration::ZERO);
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new(3, 60);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new(3, 60);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cool_down() {
        let cb = CircuitBreaker::new(2, 1);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        sleep(Duration::from_millis(1100));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_time_until_retry() {
        let cb = CircuitBreaker::new(2, 2);

        cb.record_failure();
        cb.record_failure();

        let remaining = cb.time_until_retry();
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_secs(2));
    }
}
