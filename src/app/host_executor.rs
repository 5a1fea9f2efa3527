// DbgMux - app/host_executor.rs
//
// Executor bound to an existing thread that runs its own loop (the CLI's
// main thread, or a UI thread).
//
// The host owns the loop and calls `pump` from it. Posting a job from any
// thread sends a wake message; `pump` dispatches it by draining the whole job
// queue, then services due timers and arms a single timer for the nearest
// remaining deadline. The armed timer is re-armed after every fire.
//
// Consequence for cross-thread `call`/`cancel`: they block until the host
// pumps, exactly like a message sent to a UI thread.

use crate::app::executor::{Executor, ExecutorCore};
use crate::util::constants::HOST_IDLE_WAKE_MS;
use crate::util::error::ExecutorError;
use crossbeam_channel::{bounded, never, select, Receiver};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Executor driven by the host thread's loop.
#[derive(Debug)]
pub struct HostExecutor {
    core: Arc<ExecutorCore>,
    wake_rx: Receiver<()>,
    armed: Mutex<Option<Instant>>,
}

impl HostExecutor {
    /// Bind to the calling thread.
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        let core = ExecutorCore::new("host", Some(wake_tx));
        core.bind_thread(thread::current().id());
        Self {
            core,
            wake_rx,
            armed: Mutex::new(None),
        }
    }

    /// Wait up to `max_wait` for a wake message or the armed timer and
    /// dispatch it. Host thread only.
    pub fn pump(&self, max_wait: Duration) -> Result<(), ExecutorError> {
        if !self.core.is_executor_thread() {
            return Err(ExecutorError::WrongThread);
        }
        let armed = *self.armed.lock();
        let timer = match armed {
            Some(at) => crossbeam_channel::at(at),
            None => never(),
        };
        select! {
            recv(self.wake_rx) -> _ => self.on_message(),
            recv(timer) -> _ => self.on_timer(),
            default(max_wait) => {}
        }
        Ok(())
    }

    /// Dispatch whatever is ready without waiting.
    pub fn pump_pending(&self) -> Result<(), ExecutorError> {
        if !self.core.is_executor_thread() {
            return Err(ExecutorError::WrongThread);
        }
        if self.wake_rx.try_recv().is_ok() {
            self.on_message();
        } else if (*self.armed.lock()).is_some_and(|at| at <= Instant::now()) {
            self.on_timer();
        }
        Ok(())
    }

    /// Pump until `pred` holds or `timeout` elapses. Returns whether `pred`
    /// became true.
    pub fn run_until<P>(&self, mut pred: P, timeout: Duration) -> Result<bool, ExecutorError>
    where
        P: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !pred() {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let slice = (deadline - now).min(Duration::from_millis(HOST_IDLE_WAKE_MS));
            self.pump(slice)?;
        }
        Ok(true)
    }

    /// Deadline the host timer is currently armed for.
    pub fn armed_deadline(&self) -> Option<Instant> {
        *self.armed.lock()
    }

    fn on_message(&self) {
        while let Some(job) = self.core.try_next_job() {
            self.core.run_job(job);
        }
        self.reset_timer();
    }

    fn on_timer(&self) {
        self.reset_timer();
    }

    fn reset_timer(&self) {
        let next = self.core.fire_due_timers();
        *self.armed.lock() = next;
    }
}

impl Default for HostExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for HostExecutor {
    fn core(&self) -> &Arc<ExecutorCore> {
        &self.core
    }
}

impl Drop for HostExecutor {
    fn drop(&mut self) {
        self.core.close();
    }
}
