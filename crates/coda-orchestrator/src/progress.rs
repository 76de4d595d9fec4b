//! Elapsed-time ticker for long calls and commands
//!
//! Purely cosmetic: the ticker only writes to stderr and nothing reads its
//! state. Dropping the handle stops it and clears the line.

use std::io::Write;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_millis(100);

pub struct ProgressTicker {
    handle: Option<JoinHandle<()>>,
    started: Instant,
}

impl ProgressTicker {
    /// Start redrawing `message (N.NNs)` every 100ms
    pub fn start(message: impl Into<String>) -> Self {
        let message = message.into();
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                interval.tick().await;
                let mut stderr = std::io::stderr().lock();
                let _ = write!(
                    stderr,
                    "\r{} ({:.2}s)",
                    message,
                    started.elapsed().as_secs_f64()
                );
                let _ = stderr.flush();
            }
        });

        Self {
            handle: Some(handle),
            started,
        }
    }

    /// A ticker that draws nothing
    pub fn disabled() -> Self {
        Self {
            handle: None,
            started: Instant::now(),
        }
    }

    /// `start` when `enabled`, otherwise `disabled`
    pub fn maybe_start(enabled: bool, message: impl Into<String>) -> Self {
        if enabled {
            Self::start(message)
        } else {
            Self::disabled()
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop ticking and return the elapsed time
    pub fn stop(mut self) -> Duration {
        self.halt();
        self.started.elapsed()
    }

    fn halt(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\r\x1b[2K");
            let _ = stderr.flush();
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_ticker_never_runs() {
        let ticker = ProgressTicker::maybe_start(false, "Building");
        assert!(!ticker.is_running());
        ticker.stop();
    }

    #[tokio::test]
    async fn test_ticker_runs_until_stopped() {
        let ticker = ProgressTicker::start("Testing");
        assert!(ticker.is_running());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let elapsed = ticker.stop();
        assert!(elapsed >= Duration::from_millis(20));
    }
}
