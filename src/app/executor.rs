// DbgMux - app/executor.rs
//
// Task and timer scheduler.
//
// Architecture:
//   - `ExecutorCore` holds everything both executor flavours share: the FIFO
//     job queue (crossbeam channel), the deadline-ordered `TimedCalls`
//     registry, the owning thread id and the call-id allocator.
//   - `Executor` is the object-safe trait the rest of the crate programs
//     against (`Arc<dyn Executor>`); `ExecutorExt` adds the generic
//     call/call_async/call_at conveniences on top of it.
//   - `ActiveExecutor` runs the core on a dedicated thread. The host-loop
//     flavour lives in `host_executor.rs`.
//
// Timer registrations are themselves posted as jobs, so every mutation of the
// timer registry is ordered with the job queue. Cancelling from a foreign
// thread is marshalled through `call` for the same reason: when `cancel`
// returns, the registration is gone and no fire of it is still running.
//
// Failure isolation: user jobs and timer callbacks run under `catch_unwind`;
// a timer callback returning `Err` or any task panicking is logged and the
// loop continues.

use crate::core::timer_queue::{CallId, TimedCalls, TimerEntry};
use crate::util::error::ExecutorError;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Error type returned by timer callbacks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a timer callback; `Err` is logged, never propagated.
pub type TaskResult = Result<(), TaskError>;

/// Shared, repeatable timer callback.
pub type TimerCallback = Arc<dyn Fn() -> TaskResult + Send + Sync>;

/// One-shot unit of work on the job queue.
pub type Job = Box<dyn FnOnce() + Send>;

// =============================================================================
// ExecutorCore
// =============================================================================

/// State shared by both executor flavours.
pub struct ExecutorCore {
    name: String,
    jobs_tx: Sender<Job>,
    jobs_rx: Receiver<Job>,
    timers: Mutex<TimedCalls<TimerCallback>>,
    thread: OnceLock<ThreadId>,
    next_id: AtomicU64,
    // Guarded by a lock (not just an atomic) so `post` cannot enqueue after
    // `close` has drained the queue.
    closed: Mutex<bool>,
    // Host-loop executors get a wake message per post.
    waker: Option<Sender<()>>,
}

impl fmt::Debug for ExecutorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorCore")
            .field("name", &self.name)
            .field("queued", &self.jobs_rx.len())
            .field("timers", &self.timers.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ExecutorCore {
    pub(crate) fn new(name: impl Into<String>, waker: Option<Sender<()>>) -> Arc<Self> {
        let (jobs_tx, jobs_rx) = unbounded();
        Arc::new(Self {
            name: name.into(),
            jobs_tx,
            jobs_rx,
            timers: Mutex::new(TimedCalls::new()),
            thread: OnceLock::new(),
            next_id: AtomicU64::new(1),
            closed: Mutex::new(false),
            waker,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn bind_thread(&self, id: ThreadId) {
        let _ = self.thread.set(id);
    }

    /// Whether the calling thread is the one that runs this executor's tasks.
    pub fn is_executor_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    /// No jobs are waiting in the queue.
    pub fn is_idle(&self) -> bool {
        self.jobs_rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.lock().len()
    }

    /// Enqueue a job without waiting for it.
    pub fn post(&self, job: Job) -> Result<(), ExecutorError> {
        {
            let closed = self.closed.lock();
            if *closed {
                return Err(ExecutorError::Shutdown);
            }
            self.jobs_tx
                .send(job)
                .map_err(|_| ExecutorError::Shutdown)?;
        }
        if let Some(ref waker) = self.waker {
            // Full means a wake is already pending.
            let _ = waker.try_send(());
        }
        Ok(())
    }

    /// Run `f` on the executor thread and block until it has finished.
    pub fn run_blocking<T, F>(&self, f: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_executor_thread() {
            return Err(ExecutorError::Reentrant);
        }
        let (tx, rx) = bounded(1);
        self.post(Box::new(move || {
            let _ = tx.send(run_guarded(f));
        }))?;
        // A dropped job (shutdown) disconnects the result channel.
        rx.recv().map_err(|_| ExecutorError::Shutdown)?
    }

    /// Run `f` on the executor thread; returns a handle to its result.
    pub fn spawn<T, F>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        if let Err(e) = self.post(Box::new(move || {
            let _ = tx.send(run_guarded(f));
        })) {
            let (tx, rx) = bounded(1);
            let _ = tx.send(Err(e));
            return TaskHandle { rx };
        }
        TaskHandle { rx }
    }

    /// Register a timer. The registration itself is queued behind any
    /// already-posted jobs.
    pub fn schedule(
        self: &Arc<Self>,
        at: Instant,
        interval: Option<Duration>,
        callback: TimerCallback,
    ) -> ScheduledCall {
        let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let core = Arc::downgrade(self);
        let entry = TimerEntry {
            id,
            at,
            interval,
            callback,
        };
        let posted = self.post(Box::new(move || {
            if let Some(core) = core.upgrade() {
                core.timers.lock().insert(entry);
            }
        }));
        if posted.is_err() {
            tracing::debug!(executor = %self.name, id = id.0, "Executor: timer dropped, executor shut down");
        }
        ScheduledCall {
            id,
            core: Some(Arc::clone(self)),
        }
    }

    /// Remove a timer registration. Synchronous on the executor thread,
    /// otherwise marshalled onto it and waited for.
    pub fn cancel_id(self: &Arc<Self>, id: CallId) {
        if self.is_executor_thread() {
            // Dropped outside the lock; the callback's captures may cancel too.
            let removed = self.timers.lock().remove(id);
            drop(removed);
            return;
        }
        let core = Arc::downgrade(self);
        let result = self.run_blocking(move || {
            if let Some(core) = core.upgrade() {
                let removed = core.timers.lock().remove(id);
                drop(removed);
            }
        });
        match result {
            Ok(()) | Err(ExecutorError::Shutdown) => {}
            Err(e) => {
                tracing::warn!(executor = %self.name, id = id.0, error = %e, "Executor: cancel failed")
            }
        }
    }

    /// Run one queued job with failure isolation.
    pub(crate) fn run_job(&self, job: Job) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            tracing::warn!(
                executor = %self.name,
                message = %panic_message(panic.as_ref()),
                "Executor: task panicked, ignored"
            );
        }
    }

    /// Fire the timers that were due when the pass began, each registration
    /// at most once. Returns the next deadline.
    ///
    /// A repeating timer slower than its own interval is due again as soon
    /// as it returns; the pass bound leaves the caller free to service the
    /// job queue before the next pass.
    pub(crate) fn fire_due_timers(&self) -> Option<Instant> {
        let now = Instant::now();
        let budget = self.timers.lock().len();
        for _ in 0..budget {
            // Pop under the lock, run outside it: the callback may schedule
            // or cancel timers itself.
            let due = self.timers.lock().pop_due(now);
            let Some(entry) = due else { break };
            let callback = entry.callback;
            match catch_unwind(AssertUnwindSafe(|| callback())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    executor = %self.name,
                    id = entry.id.0,
                    error = %e,
                    "Executor: timer callback failed, ignored"
                ),
                Err(panic) => tracing::warn!(
                    executor = %self.name,
                    id = entry.id.0,
                    message = %panic_message(panic.as_ref()),
                    "Executor: timer callback panicked, ignored"
                ),
            }
        }
        self.timers.lock().next_deadline()
    }

    /// Receive the next job, waiting at most until `deadline`.
    pub(crate) fn next_job(&self, deadline: Option<Instant>) -> Option<Job> {
        match deadline {
            Some(deadline) => match self.jobs_rx.recv_deadline(deadline) {
                Ok(job) => Some(job),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.jobs_rx.recv().ok(),
        }
    }

    pub(crate) fn try_next_job(&self) -> Option<Job> {
        self.jobs_rx.try_recv().ok()
    }

    fn mark_closed(&self) {
        *self.closed.lock() = true;
    }

    /// Refuse further work and drop whatever is still queued. Blocked
    /// `call`ers of dropped jobs receive `ExecutorError::Shutdown`.
    pub(crate) fn close(&self) {
        let abandoned: Vec<Job> = {
            let mut closed = self.closed.lock();
            *closed = true;
            self.jobs_rx.try_iter().collect()
        };
        // Drop outside every lock; captured state may call back in.
        let timers = std::mem::take(&mut *self.timers.lock());
        if !abandoned.is_empty() || !timers.is_empty() {
            tracing::debug!(
                executor = %self.name,
                jobs = abandoned.len(),
                timers = timers.len(),
                "Executor: closed with pending work"
            );
        }
        drop(abandoned);
        drop(timers);
        if let Some(ref waker) = self.waker {
            let _ = waker.try_send(());
        }
    }
}

fn run_guarded<T, F>(f: F) -> Result<T, ExecutorError>
where
    F: FnOnce() -> T,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| ExecutorError::TaskPanicked {
        message: panic_message(panic.as_ref()),
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Executor trait
// =============================================================================

/// Object-safe scheduler interface.
pub trait Executor: Send + Sync {
    fn core(&self) -> &Arc<ExecutorCore>;

    fn is_executor_thread(&self) -> bool {
        self.core().is_executor_thread()
    }

    fn is_idle(&self) -> bool {
        self.core().is_idle()
    }

    /// Fire-and-forget job.
    fn post(&self, job: Job) -> Result<(), ExecutorError> {
        self.core().post(job)
    }

    fn schedule(&self, at: Instant, interval: Option<Duration>, callback: TimerCallback) -> ScheduledCall {
        self.core().schedule(at, interval, callback)
    }

    /// Cancel a scheduled call. Idempotent; a no-op for calls that already
    /// fired or were cancelled.
    fn cancel(&self, call: &mut ScheduledCall) {
        call.cancel();
    }

    /// Round-trip an empty call: every job posted before it has run.
    fn synchronize(&self) -> Result<(), ExecutorError> {
        self.core().run_blocking(|| ())
    }
}

/// Generic conveniences over any `Executor` (including `dyn Executor`).
pub trait ExecutorExt: Executor {
    /// Run `f` on the executor thread and wait for its result.
    ///
    /// Fails with `Reentrant` when called from the executor thread itself
    /// (that would deadlock) and with `TaskPanicked` if `f` panics.
    fn call<T, F>(&self, f: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.core().run_blocking(f)
    }

    /// Run `f` on the executor thread; returns immediately.
    fn call_async<T, F>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.core().spawn(f)
    }

    fn call_at<F>(&self, at: Instant, f: F) -> ScheduledCall
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        self.schedule(at, None, Arc::new(f))
    }

    fn call_after<F>(&self, delay: Duration, f: F) -> ScheduledCall
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        self.call_at(Instant::now() + delay, f)
    }

    /// Repeat every `interval`, first fire one interval from now. Deadlines
    /// advance by exactly `interval` each time, independent of fire latency.
    fn call_every<F>(&self, interval: Duration, f: F) -> ScheduledCall
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        let interval = if interval.is_zero() {
            tracing::warn!("Executor: zero repeat interval, using 1 ms");
            Duration::from_millis(1)
        } else {
            interval
        };
        self.schedule(Instant::now() + interval, Some(interval), Arc::new(f))
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}

// =============================================================================
// TaskHandle
// =============================================================================

/// Pending result of `call_async`.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, ExecutorError>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task has run.
    pub fn wait(self) -> Result<T, ExecutorError> {
        self.rx.recv().map_err(|_| ExecutorError::Shutdown)?
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, ExecutorError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ExecutorError::Shutdown)),
        }
    }

    /// Non-blocking poll.
    pub fn try_get(&self) -> Option<Result<T, ExecutorError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => Some(Err(ExecutorError::Shutdown)),
        }
    }
}

// =============================================================================
// ScheduledCall / ScopedScheduledCall
// =============================================================================

/// Cancellation token for a timer registration.
#[derive(Clone, Default)]
pub struct ScheduledCall {
    id: CallId,
    core: Option<Arc<ExecutorCore>>,
}

impl fmt::Debug for ScheduledCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledCall")
            .field("id", &self.id.0)
            .field("bound", &self.core.is_some())
            .finish()
    }
}

impl ScheduledCall {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Whether this token still refers to an executor (not yet cancelled
    /// through this token).
    pub fn is_bound(&self) -> bool {
        self.core.is_some()
    }

    /// Cancel the call. Safe from any thread, idempotent.
    pub fn cancel(&mut self) {
        if let Some(core) = self.core.take() {
            core.cancel_id(self.id);
        }
    }
}

/// Owns a `ScheduledCall` and cancels it when dropped or replaced.
#[derive(Debug, Default)]
pub struct ScopedScheduledCall {
    call: ScheduledCall,
}

impl ScopedScheduledCall {
    pub fn new(call: ScheduledCall) -> Self {
        Self { call }
    }

    /// Replace the held call, cancelling the previous one.
    pub fn set(&mut self, call: ScheduledCall) {
        self.call.cancel();
        self.call = call;
    }

    pub fn cancel(&mut self) {
        self.call.cancel();
    }

    /// Give up ownership without cancelling.
    pub fn release(mut self) -> ScheduledCall {
        std::mem::take(&mut self.call)
    }
}

impl From<ScheduledCall> for ScopedScheduledCall {
    fn from(call: ScheduledCall) -> Self {
        Self::new(call)
    }
}

impl Drop for ScopedScheduledCall {
    fn drop(&mut self) {
        self.call.cancel();
    }
}

// =============================================================================
// ActiveExecutor
// =============================================================================

/// Executor with its own worker thread.
///
/// Dropping it runs every job queued before the drop, then stops the thread
/// and discards anything queued later.
pub struct ActiveExecutor {
    core: Arc<ExecutorCore>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for ActiveExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveExecutor").field("core", &self.core).finish()
    }
}

impl ActiveExecutor {
    pub fn new() -> std::io::Result<Self> {
        Self::with_name("dbgmux-executor")
    }

    pub fn with_name(name: &str) -> std::io::Result<Self> {
        let core = ExecutorCore::new(name, None);
        let worker = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_active(worker))?;
        core.bind_thread(handle.thread().id());
        tracing::debug!(executor = name, "Executor: worker thread started");
        Ok(Self {
            core,
            thread: Some(handle),
        })
    }
}

impl Executor for ActiveExecutor {
    fn core(&self) -> &Arc<ExecutorCore> {
        &self.core
    }
}

/// Worker loop: run one queued job if there is one, fire the timers that are
/// due, then wait for a job or the next deadline, whichever comes first.
fn run_active(core: Arc<ExecutorCore>) {
    core.bind_thread(thread::current().id());
    while !core.is_closed() {
        if let Some(job) = core.try_next_job() {
            core.run_job(job);
            if core.is_closed() {
                break;
            }
        }
        let next_deadline = core.fire_due_timers();
        if let Some(job) = core.next_job(next_deadline) {
            core.run_job(job);
        }
    }
    tracing::debug!(executor = %core.name(), "Executor: worker thread exiting");
}

impl Drop for ActiveExecutor {
    fn drop(&mut self) {
        let stop = Arc::downgrade(&self.core);
        let _ = self.core.post(Box::new(move || {
            if let Some(core) = stop.upgrade() {
                core.mark_closed();
            }
        }));
        if let Some(handle) = self.thread.take() {
            if self.core.is_executor_thread() {
                // Dropped from one of its own tasks: the loop exits after the
                // current job.
                self.core.mark_closed();
            } else if handle.join().is_err() {
                tracing::warn!(executor = %self.core.name(), "Executor: worker thread panicked");
            }
        }
        self.core.close();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn executor() -> ActiveExecutor {
        ActiveExecutor::new().unwrap()
    }

    #[test]
    fn test_call_returns_value_and_runs_on_worker() {
        let exec = executor();
        let caller = thread::current().id();
        let (value, ran_on) = exec.call(|| (21 * 2, thread::current().id())).unwrap();
        assert_eq!(value, 42);
        assert_ne!(ran_on, caller);
    }

    #[test]
    fn test_call_propagates_panic_and_loop_survives() {
        let exec = executor();
        let result: Result<(), _> = exec.call(|| panic!("boom"));
        assert_eq!(
            result,
            Err(ExecutorError::TaskPanicked {
                message: "boom".to_string()
            })
        );
        assert_eq!(exec.call(|| 1).unwrap(), 1);
    }

    #[test]
    fn test_reentrant_call_is_rejected() {
        let exec = Arc::new(executor());
        let inner = Arc::clone(&exec);
        let result = exec.call(move || inner.call(|| ())).unwrap();
        assert_eq!(result, Err(ExecutorError::Reentrant));
    }

    #[test]
    fn test_call_async_returns_immediately() {
        let exec = executor();
        let handle = exec.call_async(|| {
            thread::sleep(Duration::from_millis(20));
            "done"
        });
        assert!(handle.try_get().is_none());
        assert_eq!(handle.wait().unwrap(), "done");
    }

    #[test]
    fn test_call_after_fires_once() {
        let exec = executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _call = exec.call_after(Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(exec.call({
            let core = Arc::clone(exec.core());
            move || core.timer_count()
        }).unwrap(), 0);
    }

    #[test]
    fn test_cancel_before_deadline_prevents_fire() {
        let exec = executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut call = exec.call_after(Duration::from_millis(100), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        exec.cancel(&mut call);
        assert!(!call.is_bound());
        call.cancel();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_call_every_repeats_until_cancelled() {
        let exec = executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut call = exec.call_every(Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        thread::sleep(Duration::from_millis(120));
        call.cancel();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected several fires, got {fired}");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn test_failing_timer_does_not_stop_loop() {
        let exec = executor();
        let _bad = exec.call_after(Duration::from_millis(1), || Err("bad timer".into()));
        let _panicky = exec.call_after(Duration::from_millis(1), || panic!("timer panic"));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(exec.call(|| 5).unwrap(), 5);
    }

    #[test]
    fn test_scoped_call_cancels_on_drop() {
        let exec = executor();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let c = Arc::clone(&count);
            let _scoped = ScopedScheduledCall::new(exec.call_after(Duration::from_millis(30), move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scoped_call_release_keeps_timer() {
        let exec = executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let scoped = ScopedScheduledCall::new(exec.call_after(Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let _call = scoped.release();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_from_timer_callback_is_synchronous() {
        let exec = Arc::new(executor());
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<ScheduledCall>> = Arc::default();
        let (c, s) = (Arc::clone(&count), Arc::clone(&slot));
        let call = exec.call_every(Duration::from_millis(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().cancel();
            Ok(())
        });
        *slot.lock() = call;
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_runs_queued_jobs_first() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let exec = executor();
            for _ in 0..10 {
                let c = Arc::clone(&count);
                exec.post(Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_slow_repeating_timer_does_not_starve_jobs() {
        let exec = executor();
        let mut slow = exec.call_every(Duration::from_millis(5), || {
            thread::sleep(Duration::from_millis(10));
            Ok(())
        });
        thread::sleep(Duration::from_millis(30));

        let handle = exec.call_async(|| 42);
        let result = handle.wait_timeout(Duration::from_secs(2));
        assert_eq!(result, Some(Ok(42)));
        assert_eq!(exec.call(|| 7).unwrap(), 7);
        slow.cancel();
    }

    #[test]
    fn test_synchronize_and_idle() {
        let exec = executor();
        exec.synchronize().unwrap();
        assert!(exec.is_idle());
        assert!(!exec.is_executor_thread());
    }
}
