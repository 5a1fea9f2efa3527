// DbgMux - app/process_monitor.rs
//
// Watches process handles for termination on a background thread.
//
// The thread waits on one wake event plus up to `MAX_WAIT_OBJECTS - 1`
// process exit handles. New processes are added through a task queue drained
// when the wake event fires, so the list is never mutated during a wait.
// When more processes are tracked than fit in one wait, the window rotates
// every `PROCESS_MONITOR_ROTATE_MS` so all of them are eventually watched.

use crate::core::process::ProcessHandle;
use crate::core::signal::{wait_any, Event, WaitHandle, WaitOutcome};
use crate::util::constants::{MAX_WAIT_OBJECTS, PROCESS_MONITOR_ROTATE_MS};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

enum MonitorTask {
    Add(ProcessHandle),
    Stop,
}

/// Reports each added process exactly once, when it ends.
pub struct ProcessMonitor {
    tasks: Sender<MonitorTask>,
    wake: Event,
    watched: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ProcessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMonitor")
            .field("watched", &self.watched_count())
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl ProcessMonitor {
    /// Start the monitor thread. `on_ended` runs on that thread.
    pub fn start<F>(on_ended: F) -> std::io::Result<Self>
    where
        F: Fn(ProcessHandle) + Send + 'static,
    {
        let (tasks, queue) = unbounded();
        let wake = Event::new();
        let watched = Arc::new(AtomicUsize::new(0));
        let thread = {
            let wake = wake.wait_handle();
            let watched = Arc::clone(&watched);
            std::thread::Builder::new()
                .name("dbgmux-process-monitor".to_string())
                .spawn(move || run_monitor(queue, wake, watched, on_ended))?
        };
        Ok(Self {
            tasks,
            wake,
            watched,
            thread: Some(thread),
        })
    }

    /// Start watching `handle`.
    pub fn add(&self, handle: ProcessHandle) {
        tracing::debug!(pid = handle.pid(), name = handle.name(), "Process monitor: watching");
        if self.tasks.send(MonitorTask::Add(handle)).is_ok() {
            self.wake.set();
        }
    }

    /// Processes currently watched (as of the thread's last iteration).
    pub fn watched_count(&self) -> usize {
        self.watched.load(Ordering::Relaxed)
    }

    /// Stop the thread. Processes still running are not reported.
    pub fn abort(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tasks.send(MonitorTask::Stop);
            self.wake.set();
            if thread.join().is_err() {
                tracing::warn!("Process monitor: thread panicked");
            }
        }
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        self.abort();
    }
}

fn run_monitor<F>(queue: Receiver<MonitorTask>, wake: WaitHandle, watched: Arc<AtomicUsize>, on_ended: F)
where
    F: Fn(ProcessHandle),
{
    let mut processes: Vec<ProcessHandle> = Vec::new();
    let mut offset = 0usize;
    loop {
        let total = processes.len();
        let count = total.min(MAX_WAIT_OBJECTS - 1);
        let exits: Vec<WaitHandle> = (0..count)
            .map(|i| processes[(offset + i) % total].exit_handle().clone())
            .collect();
        let mut handles: Vec<&WaitHandle> = Vec::with_capacity(count + 1);
        handles.push(&wake);
        handles.extend(exits.iter());

        // Only a truncated window needs to time out and rotate.
        let timeout = (count < total).then(|| Duration::from_millis(PROCESS_MONITOR_ROTATE_MS));

        match wait_any(&handles, timeout) {
            WaitOutcome::TimedOut => {
                if total > 0 {
                    offset = (offset + count) % total;
                }
            }
            WaitOutcome::Signaled(0) => {
                for task in queue.try_iter() {
                    match task {
                        MonitorTask::Add(handle) => processes.push(handle),
                        MonitorTask::Stop => return,
                    }
                }
            }
            WaitOutcome::Signaled(index) => {
                let i = (offset + index - 1) % total;
                let handle = processes.swap_remove(i);
                tracing::debug!(pid = handle.pid(), "Process monitor: process ended");
                on_ended(handle);
            }
        }
        watched.store(processes.len(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::ExitStatus;
    use parking_lot::Mutex;
    use std::time::Instant;

    fn wait_for(pred: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        pred()
    }

    #[test]
    fn test_reports_each_exit_once() {
        let ended = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&ended);
        let mut monitor = ProcessMonitor::start(move |h| e.lock().push(h.pid())).unwrap();

        let (a, exit_a) = ProcessHandle::new(100, "a");
        let (b, exit_b) = ProcessHandle::new(200, "b");
        monitor.add(a);
        monitor.add(b);
        assert!(wait_for(|| monitor.watched_count() == 2, Duration::from_secs(2)));

        exit_b.exited(ExitStatus::Code(0));
        assert!(wait_for(|| ended.lock().len() == 1, Duration::from_secs(2)));
        assert_eq!(ended.lock()[0], 200);

        exit_a.exited(ExitStatus::Code(1));
        assert!(wait_for(|| ended.lock().len() == 2, Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(*ended.lock(), vec![200, 100]);
        monitor.abort();
    }

    #[test]
    fn test_rotates_when_more_processes_than_wait_slots() {
        let ended = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&ended);
        let monitor = ProcessMonitor::start(move |h| e.lock().push(h.pid())).unwrap();

        let mut exits = Vec::new();
        let total = MAX_WAIT_OBJECTS + 10;
        for pid in 0..total as u32 {
            let (handle, exit) = ProcessHandle::new(pid, "p");
            monitor.add(handle);
            exits.push(exit);
        }
        // The last-added processes sit outside the first wait window.
        let last = exits.pop().unwrap();
        last.exited(ExitStatus::Code(0));
        assert!(wait_for(
            || ended.lock().contains(&(total as u32 - 1)),
            Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_abort_is_idempotent() {
        let mut monitor = ProcessMonitor::start(|_| {}).unwrap();
        monitor.abort();
        monitor.abort();
        let (handle, _exit) = ProcessHandle::new(1, "x");
        monitor.add(handle);
        assert_eq!(monitor.watched_count(), 0);
    }
}
