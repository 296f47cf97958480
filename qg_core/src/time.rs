// ABOUTME: Monotonic timing utilities for measuring operation latency.
// ABOUTME: Used as the start stamp carried between before and after hooks.
use std::time::{Duration, Instant};

/// Create a monotonic duration measurer
///
/// # Examples
///
/// ```
/// use qg_core::MonotonicTimer;
/// use std::thread;
/// use std::time::Duration;
///
/// let timer = MonotonicTimer::new();
/// thread::sleep(Duration::from_millis(1));
/// let elapsed = timer.elapsed();
/// assert!(elapsed >= Duration::from_millis(1));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimer {
    start: Instant,
}

impl MonotonicTimer {
    /// Create a new timer starting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time since creation
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed whole milliseconds, truncated
    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}
