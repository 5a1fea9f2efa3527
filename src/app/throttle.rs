// DbgMux - app/throttle.rs
//
// Rate limiter for change notifications.
//
// `trigger` may be called at any rate from any thread. The first trigger of a
// quiet period schedules one callback on the executor `1 / calls_per_second`
// later; further triggers before it fires are absorbed. The pending flag is
// cleared before the callback runs, so a trigger that arrives while the
// callback is running schedules the next one and no update is lost.

use crate::app::executor::{Executor, ExecutorExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ThrottleInner {
    executor: Arc<dyn Executor>,
    delta: Duration,
    pending: Mutex<bool>,
    callback: Box<dyn Fn() + Send + Sync>,
    fired: AtomicU64,
}

impl ThrottleInner {
    fn fire(&self) {
        *self.pending.lock() = false;
        self.fired.fetch_add(1, Ordering::Relaxed);
        (self.callback)();
    }
}

/// Coalesces bursts of triggers into at most one callback per interval.
#[derive(Clone)]
pub struct Throttle {
    inner: Arc<ThrottleInner>,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("delta", &self.inner.delta)
            .field("pending", &*self.inner.pending.lock())
            .field("fired", &self.fired_count())
            .finish()
    }
}

impl Throttle {
    /// `calls_per_second` is clamped to at least 1.
    pub fn new<F>(executor: Arc<dyn Executor>, calls_per_second: u32, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let delta = Duration::from_millis(1000 / u64::from(calls_per_second.max(1)));
        Self {
            inner: Arc::new(ThrottleInner {
                executor,
                delta,
                pending: Mutex::new(false),
                callback: Box::new(callback),
                fired: AtomicU64::new(0),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.delta
    }

    /// Request a callback.
    pub fn trigger(&self) {
        let mut pending = self.inner.pending.lock();
        if *pending {
            return;
        }
        *pending = true;
        let weak = Arc::downgrade(&self.inner);
        // The scheduled call is not kept: a fire after the throttle is gone
        // finds the weak reference dead and does nothing.
        let _ = self
            .inner
            .executor
            .call_at(Instant::now() + self.inner.delta, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire();
                }
                Ok(())
            });
    }

    /// A callback is scheduled and has not fired yet.
    pub fn is_pending(&self) -> bool {
        *self.inner.pending.lock()
    }

    /// Number of callbacks delivered so far.
    pub fn fired_count(&self) -> u64 {
        self.inner.fired.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::executor::ActiveExecutor;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_burst_yields_single_notification() {
        let executor: Arc<dyn Executor> = Arc::new(ActiveExecutor::new().unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let throttle = Throttle::new(Arc::clone(&executor), 10, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..1000 {
            throttle.trigger();
        }
        thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!throttle.is_pending());
    }

    #[test]
    fn test_trigger_after_fire_schedules_again() {
        let executor: Arc<dyn Executor> = Arc::new(ActiveExecutor::new().unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let throttle = Throttle::new(executor, 50, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        throttle.trigger();
        thread::sleep(Duration::from_millis(100));
        throttle.trigger();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(throttle.fired_count(), 2);
    }

    #[test]
    fn test_dropped_throttle_never_fires() {
        let executor: Arc<dyn Executor> = Arc::new(ActiveExecutor::new().unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let throttle = Throttle::new(executor, 20, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        throttle.trigger();
        drop(throttle);
        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
