//! Timer utilities
//!
//! Wall-clock and monotonic timing for stages and results.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Simple timer for measuring elapsed time
#[derive(Clone, Debug)]
pub struct Timer {
    start: Instant,
    started_at: DateTime<Utc>,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            started_at: Utc::now(),
            label: label.into(),
        }
    }

    /// Wall-clock time the timer was started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Stop timer and return the wall-clock end together with the elapsed time
    pub fn stop(self) -> (DateTime<Utc>, Duration) {
        let elapsed = self.elapsed();
        tracing::trace!("{}: {}ms", self.label, elapsed.as_millis());
        (Utc::now(), elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        sleep(Duration::from_millis(10));
        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 10);
    }

    #[test]
    fn test_timer_stop() {
        let timer = Timer::start("stage");
        let started = timer.started_at();
        sleep(Duration::from_millis(5));
        let (ended, elapsed) = timer.stop();
        assert!(ended >= started);
        assert!(elapsed >= Duration::from_millis(5));
    }
}
