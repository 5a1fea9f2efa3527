// DbgMux - core/clock.rs
//
// Relative capture clock shared by every source so that line times from
// different producers are directly comparable.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Monotonic seconds-since-reset clock. Cloning shares the same origin.
#[derive(Debug, Clone)]
pub struct Timer {
    origin: Arc<Mutex<Instant>>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            origin: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Seconds elapsed since creation or the last `reset`.
    pub fn get(&self) -> f64 {
        self.origin.lock().elapsed().as_secs_f64()
    }

    /// Restart relative time at zero for every clone.
    pub fn reset(&self) {
        *self.origin.lock() = Instant::now();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clones_share_origin_and_reset() {
        let timer = Timer::new();
        let clone = timer.clone();
        std::thread::sleep(Duration::from_millis(20));
        assert!(clone.get() >= 0.02);
        timer.reset();
        assert!(clone.get() < 0.02);
    }
}
