// DbgMux - core/signal.rs
//
// Readiness signals and the multiplexed "wait for any" primitive.
//
// Every waitable resource is represented by a `WaitHandle`, which is the
// receiving end of a crossbeam channel:
//   - `Event` is an auto-reset event: a bounded(1) channel whose single
//     token is consumed by the wait that observes it. Setting an already-set
//     event is a no-op, so wake-ups coalesce but are never lost.
//   - `ExitSignal` is a one-shot, level-triggered signal: it becomes ready
//     when its sender is dropped and stays ready forever (the channel reports
//     disconnection to every subsequent wait), like a process handle.
//
// `wait_any` blocks on an arbitrary set of handles via `crossbeam_channel::Select`
// and reports which one fired.

use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError};
use std::time::Duration;

// =============================================================================
// WaitHandle
// =============================================================================

/// A waitable readiness signal. Cheap to clone; clones observe the same signal.
#[derive(Debug, Clone)]
pub struct WaitHandle {
    rx: Receiver<()>,
}

impl WaitHandle {
    /// Non-blocking check. Consumes an auto-reset token when one is present.
    pub fn try_wait(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Whether the signal is level-triggered and has fired (sender dropped).
    pub fn is_closed(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

// =============================================================================
// Event (auto-reset)
// =============================================================================

/// Auto-reset event. `set` wakes exactly one wait; repeated sets before the
/// wait collapse into one wake-up.
#[derive(Debug, Clone)]
pub struct Event {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Event {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Signal the event. Never blocks.
    pub fn set(&self) {
        // Full means the event is already set.
        let _ = self.tx.try_send(());
    }

    /// Clear a pending signal without waiting.
    pub fn reset(&self) {
        let _ = self.rx.try_recv();
    }

    pub fn wait_handle(&self) -> WaitHandle {
        WaitHandle {
            rx: self.rx.clone(),
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ExitSignal (level-triggered, one-shot)
// =============================================================================

/// Sender half of a level-triggered signal. Firing (or dropping) it makes the
/// paired `WaitHandle` permanently ready.
#[derive(Debug)]
pub struct ExitSignal {
    _tx: Sender<()>,
}

impl ExitSignal {
    pub fn new() -> (ExitSignal, WaitHandle) {
        let (tx, rx) = bounded(0);
        (ExitSignal { _tx: tx }, WaitHandle { rx })
    }

    /// Fire the signal.
    pub fn fire(self) {
        drop(self);
    }
}

// =============================================================================
// Multiplexed wait
// =============================================================================

/// Result of `wait_any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The handle at this index fired (lowest index wins only by chance;
    /// no priority is implied).
    Signaled(usize),
    /// The timeout elapsed with no handle ready.
    TimedOut,
}

/// Block until any of `handles` is ready or `timeout` elapses
/// (`None` = wait forever).
///
/// An auto-reset token on the fired handle is consumed, so the same wake-up
/// is not reported twice.
pub fn wait_any(handles: &[&WaitHandle], timeout: Option<Duration>) -> WaitOutcome {
    if handles.is_empty() {
        if let Some(timeout) = timeout {
            std::thread::sleep(timeout);
        }
        return WaitOutcome::TimedOut;
    }

    let mut select = Select::new();
    for handle in handles {
        select.recv(handle.receiver());
    }

    let operation = match timeout {
        Some(timeout) => match select.select_timeout(timeout) {
            Ok(op) => op,
            Err(_) => return WaitOutcome::TimedOut,
        },
        None => select.select(),
    };

    let index = operation.index();
    // Completing the operation consumes the token; a disconnected (fired
    // exit) signal completes with an error that carries no information.
    let _ = operation.recv(handles[index].receiver());
    WaitOutcome::Signaled(index)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_event_auto_resets() {
        let event = Event::new();
        let handle = event.wait_handle();
        event.set();
        event.set();
        assert!(handle.try_wait());
        assert!(!handle.try_wait(), "repeated sets must collapse");
    }

    #[test]
    fn test_wait_any_reports_fired_index() {
        let a = Event::new();
        let b = Event::new();
        b.set();
        let (ha, hb) = (a.wait_handle(), b.wait_handle());
        assert_eq!(
            wait_any(&[&ha, &hb], Some(Duration::from_millis(100))),
            WaitOutcome::Signaled(1)
        );
        assert_eq!(
            wait_any(&[&ha, &hb], Some(Duration::from_millis(10))),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_wait_any_wakes_on_cross_thread_set() {
        let event = Event::new();
        let handle = event.wait_handle();
        let setter = event.clone();
        let start = Instant::now();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            setter.set();
        });
        assert_eq!(wait_any(&[&handle], None), WaitOutcome::Signaled(0));
        assert!(start.elapsed() >= Duration::from_millis(25));
        t.join().unwrap();
    }

    #[test]
    fn test_exit_signal_stays_signaled() {
        let (signal, handle) = ExitSignal::new();
        assert!(!handle.is_closed());
        signal.fire();
        assert!(handle.is_closed());
        assert_eq!(wait_any(&[&handle], None), WaitOutcome::Signaled(0));
        assert_eq!(wait_any(&[&handle], None), WaitOutcome::Signaled(0));
    }

    #[test]
    fn test_wait_any_empty_times_out() {
        assert_eq!(
            wait_any(&[], Some(Duration::from_millis(1))),
            WaitOutcome::TimedOut
        );
    }
}
