//! Monotonic elapsed-time source for diagnostic timestamps

use std::time::{Duration, Instant};

/// Milliseconds since an epoch fixed at construction
#[derive(Debug, Clone, Copy)]
pub struct ElapsedClock {
    epoch: Instant,
}

impl ElapsedClock {
    /// Start a clock whose epoch is now
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

impl Default for ElapsedClock {
    fn default() -> Self {
        Self::start()
    }
}
