// DbgMux - app/log_sources.rs
//
// Source orchestrator: owns the active sources, waits on all of them at once,
// merges what they produce into one time-ordered stream and tells
// subscribers, at a throttled rate, that new lines are available.
//
// Threads:
//   - listener: owns the `LogSource` objects. Each iteration absorbs pending
//     add/remove requests, then blocks in `wait_any` over every source's
//     readiness handle plus the "topology changed" event. A fired source is
//     drained and its batch merged into the shared aggregate.
//   - process monitor: reports ended processes. The listener drains every
//     source before the termination is handled, so a process' last output is
//     always reassembled before its termination notice.
//   - executor: runs the throttled update callbacks and termination handling.
//
// Any thread may add or remove sources. Requests are queued under their own
// lock and applied by the listener, so a source is never dropped while a wait
// is blocked on its handle. Lines from removed or disabled sources are
// discarded by `get_lines`; they are resolved through the registry by id and
// never keep a source alive.

use crate::app::executor::{Executor, Job};
use crate::app::process_monitor::ProcessMonitor;
use crate::app::sources::{
    FileTailSource, LineSink, LogSource, ProcessSource, TailOptions, TestSource, TestSourceHandle,
    UdpSource,
};
use crate::app::throttle::Throttle;
use crate::core::clock::Timer;
use crate::core::line_buffer::{LineBuffer, RingLineBuffer, VectorLineBuffer};
use crate::core::merge::merge_sorted;
use crate::core::model::{Line, SourceId, SourceInfo};
use crate::core::newline_filter::NewlineFilter;
use crate::core::process::{ExitStatus, ProcessHandle};
use crate::core::signal::{wait_any, Event, WaitHandle, WaitOutcome};
use crate::platform::config::{AppConfig, TransportKind};
use crate::util::constants;
use crate::util::error::SourceError;
use chrono::{Local, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Tunables of a `LogSources` instance.
#[derive(Debug, Clone)]
pub struct LogSourcesConfig {
    pub updates_per_second: u32,
    pub newline_flush_threshold: usize,
    /// Initial auto-newline setting applied to every new source.
    pub auto_newline: bool,
    pub transport: TransportKind,
    pub ring_buffer_capacity: usize,
    pub ring_write_timeout: Option<Duration>,
    pub tail_poll_interval: Duration,
}

impl Default for LogSourcesConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for LogSourcesConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            updates_per_second: config.updates_per_second,
            newline_flush_threshold: config.newline_flush_threshold,
            auto_newline: config.auto_newline,
            transport: config.transport,
            ring_buffer_capacity: config.ring_buffer_capacity,
            ring_write_timeout: config.ring_write_timeout,
            tail_poll_interval: config.tail_poll_interval,
        }
    }
}

/// Returned by `subscribe_to_update`; pass to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

// =============================================================================
// Shared state
// =============================================================================

/// Requests waiting for the listener.
#[derive(Default)]
struct Schedule {
    to_add: Vec<(SourceId, Box<dyn LogSource>)>,
    to_remove: Vec<SourceId>,
    ended_processes: Vec<ProcessHandle>,
}

/// Consumer-side state, touched by `get_lines` and termination handling.
struct Consumer {
    filter: NewlineFilter,
    /// Processes seen in the stream whose termination is still to be reported.
    pids: HashMap<u32, ProcessHandle>,
    /// Completed lines not yet handed out.
    ready: Vec<Line>,
}

struct Shared {
    executor: Arc<dyn Executor>,
    timer: Timer,
    config: LogSourcesConfig,
    topology: Event,
    schedule: Mutex<Schedule>,
    registry: Mutex<BTreeMap<SourceId, SourceInfo>>,
    aggregate: Mutex<Vec<Line>>,
    consumer: Mutex<Consumer>,
    subscribers: Mutex<Vec<(SubscriptionId, UpdateCallback)>>,
    throttle: Throttle,
    monitor: Mutex<Option<ProcessMonitor>>,
    end: AtomicBool,
    next_source_id: AtomicU64,
    next_subscription: AtomicU64,
    auto_newline: AtomicBool,
}

/// A source held by the listener.
struct ActiveSource {
    id: SourceId,
    source: Box<dyn LogSource>,
    handle: Option<WaitHandle>,
}

// =============================================================================
// LogSources
// =============================================================================

/// Multiplexes any number of log sources into one ordered line stream.
pub struct LogSources {
    shared: Arc<Shared>,
    listener: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LogSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSources")
            .field("sources", &self.shared.registry.lock().len())
            .field("running", &self.listener.is_some())
            .finish()
    }
}

impl LogSources {
    /// Start the listener and process monitor threads. Update notifications
    /// and termination handling run on `executor`.
    pub fn new(executor: Arc<dyn Executor>, config: LogSourcesConfig) -> std::io::Result<Self> {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let notify = weak.clone();
            let throttle = Throttle::new(Arc::clone(&executor), config.updates_per_second, move || {
                if let Some(shared) = notify.upgrade() {
                    shared.notify_subscribers();
                }
            });
            Shared {
                executor,
                timer: Timer::new(),
                topology: Event::new(),
                schedule: Mutex::new(Schedule::default()),
                registry: Mutex::new(BTreeMap::new()),
                aggregate: Mutex::new(Vec::new()),
                consumer: Mutex::new(Consumer {
                    filter: NewlineFilter::new(config.newline_flush_threshold),
                    pids: HashMap::new(),
                    ready: Vec::new(),
                }),
                subscribers: Mutex::new(Vec::new()),
                throttle,
                monitor: Mutex::new(None),
                end: AtomicBool::new(false),
                // 0 is the loopback source.
                next_source_id: AtomicU64::new(1),
                next_subscription: AtomicU64::new(1),
                auto_newline: AtomicBool::new(config.auto_newline),
                config,
            }
        });

        let weak = Arc::downgrade(&shared);
        let monitor = ProcessMonitor::start(move |handle| {
            if let Some(shared) = weak.upgrade() {
                shared.process_ended(handle);
            }
        })?;
        *shared.monitor.lock() = Some(monitor);

        let listener = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("dbgmux-listener".to_string())
                .spawn(move || shared.listen())?
        };

        tracing::info!(
            updates_per_second = shared.config.updates_per_second,
            transport = ?shared.config.transport,
            "Log sources started"
        );
        Ok(Self {
            shared,
            listener: Some(listener),
        })
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.shared.executor
    }

    /// Relative clock shared by every source.
    pub fn timer(&self) -> &Timer {
        &self.shared.timer
    }

    /// Restart relative time at zero.
    pub fn reset_timer(&self) {
        self.shared.timer.reset();
    }

    /// Producer side for a new source, using the configured transport.
    pub fn make_sink(&self) -> LineSink {
        let config = &self.shared.config;
        let buffer: Arc<dyn LineBuffer> = match config.transport {
            TransportKind::Vector => Arc::new(VectorLineBuffer::new()),
            TransportKind::Ring => Arc::new(RingLineBuffer::new(
                config.ring_buffer_capacity,
                config.ring_write_timeout,
            )),
        };
        LineSink::new(buffer, self.shared.timer.clone())
    }

    // -------------------------------------------------------------------------
    // Topology
    // -------------------------------------------------------------------------

    /// Register a source. It starts being waited on at the listener's next
    /// iteration. Never blocks.
    pub fn add_source(&self, mut source: Box<dyn LogSource>) -> SourceId {
        let id = SourceId(self.shared.next_source_id.fetch_add(1, Ordering::SeqCst));
        let info = SourceInfo {
            id,
            kind: source.kind(),
            description: source.description(),
            address: source.address(),
            enabled: true,
            auto_newline: self.auto_newline(),
            line_delimited: source.line_delimited(),
            removal_scheduled: false,
            ended: false,
        };

        if self.shared.end.load(Ordering::SeqCst) {
            tracing::warn!(description = %info.description, "Source added after shutdown, ignored");
            source.abort();
            return id;
        }

        if let Some(process) = source.process() {
            self.shared.watch_process(&mut self.shared.consumer.lock(), &process);
        }

        tracing::info!(
            source = %id,
            kind = %info.kind,
            description = %info.description,
            "Source added"
        );
        self.shared.registry.lock().insert(id, info);
        self.shared.schedule.lock().to_add.push((id, source));
        self.shared.topology.set();
        id
    }

    /// Add a scripted source; lines are fed through the returned handle.
    pub fn add_test_source(&self, description: &str) -> (SourceId, TestSourceHandle) {
        let (source, handle) = TestSource::new(description, self.make_sink());
        (self.add_source(Box::new(source)), handle)
    }

    /// Tail `path`. Fails if the file cannot be inspected.
    pub fn add_file_tail(
        &self,
        path: impl Into<PathBuf>,
        from_start: bool,
        follow: bool,
    ) -> Result<SourceId, SourceError> {
        let options = TailOptions {
            from_start,
            follow,
            poll_interval: self.shared.config.tail_poll_interval,
        };
        let source = FileTailSource::new(path, options, self.make_sink())?;
        Ok(self.add_source(Box::new(source)))
    }

    /// Listen for datagrams on `port` (0 picks a free port, see
    /// `SourceInfo::address`).
    pub fn add_udp_reader(&self, port: u16) -> Result<SourceId, SourceError> {
        let source = UdpSource::bind(port, self.make_sink())?;
        Ok(self.add_source(Box::new(source)))
    }

    /// Run `program args...` and capture its output.
    pub fn add_process_reader(&self, program: &str, args: &[String]) -> Result<SourceId, SourceError> {
        let source = ProcessSource::spawn(program, args, self.shared.timer.clone())?;
        Ok(self.add_source(Box::new(source)))
    }

    /// Schedule removal. Lines from the source are dropped from now on.
    /// Returns false for unknown or already-removed sources.
    pub fn remove(&self, id: SourceId) -> bool {
        {
            let mut registry = self.shared.registry.lock();
            match registry.get_mut(&id) {
                Some(info) if !info.removal_scheduled => info.removal_scheduled = true,
                _ => return false,
            }
        }
        tracing::info!(source = %id, "Source removal scheduled");
        self.shared.schedule.lock().to_remove.push(id);
        self.shared.topology.set();
        true
    }

    /// Remove every source matching `predicate`; returns how many.
    pub fn remove_sources<P>(&self, predicate: P) -> usize
    where
        P: Fn(&SourceInfo) -> bool,
    {
        let ids: Vec<SourceId> = self
            .shared
            .registry
            .lock()
            .values()
            .filter(|info| !info.removal_scheduled && predicate(info))
            .map(|info| info.id)
            .collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    /// Suppress or restore a source's lines without removing it.
    pub fn set_enabled(&self, id: SourceId, enabled: bool) -> bool {
        match self.shared.registry.lock().get_mut(&id) {
            Some(info) => {
                info.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every registered source that is not being removed.
    pub fn sources(&self) -> Vec<SourceInfo> {
        self.shared
            .registry
            .lock()
            .values()
            .filter(|info| !info.removal_scheduled)
            .cloned()
            .collect()
    }

    pub fn source_info(&self, id: SourceId) -> Option<SourceInfo> {
        self.shared.registry.lock().get(&id).cloned()
    }

    /// Apply the auto-newline setting to all current and future sources.
    pub fn set_auto_newline(&self, auto_newline: bool) {
        self.shared.auto_newline.store(auto_newline, Ordering::SeqCst);
        for info in self.shared.registry.lock().values_mut() {
            info.auto_newline = auto_newline;
        }
    }

    pub fn auto_newline(&self) -> bool {
        self.shared.auto_newline.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Lines
    // -------------------------------------------------------------------------

    /// Inject an internal line into the stream.
    pub fn add_message(&self, text: impl Into<String>) {
        self.shared.add_message(text.into());
    }

    /// Take every line completed since the last call, in time order.
    pub fn get_lines(&self) -> Vec<Line> {
        let mut consumer = self.shared.consumer.lock();
        self.shared.absorb(&mut consumer);
        std::mem::take(&mut consumer.ready)
    }

    /// Number of lines `get_lines` would return now.
    pub fn pending_line_count(&self) -> usize {
        let mut consumer = self.shared.consumer.lock();
        self.shared.absorb(&mut consumer);
        consumer.ready.len()
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    /// `callback` runs on the executor at most `updates_per_second` times a
    /// second while lines keep arriving.
    pub fn subscribe_to_update<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.shared.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Every source has ended, nothing is waiting to be delivered and every
    /// watched process has been reported.
    pub fn is_idle(&self) -> bool {
        if !self.shared.registry.lock().values().all(|info| info.ended) {
            return false;
        }
        {
            let schedule = self.shared.schedule.lock();
            if !schedule.to_add.is_empty()
                || !schedule.to_remove.is_empty()
                || !schedule.ended_processes.is_empty()
            {
                return false;
            }
        }
        if !self.shared.aggregate.lock().is_empty() {
            return false;
        }
        let consumer = self.shared.consumer.lock();
        consumer.ready.is_empty() && consumer.pids.is_empty()
    }

    /// Stop all threads and sources. Idempotent.
    pub fn abort(&mut self) {
        self.shared.end.store(true, Ordering::SeqCst);
        let monitor = self.shared.monitor.lock().take();
        if let Some(mut monitor) = monitor {
            monitor.abort();
        }
        self.shared.subscribers.lock().clear();
        self.shared.topology.set();
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                tracing::warn!("Listener thread panicked");
            }
            tracing::info!("Log sources stopped");
        }
    }
}

impl Drop for LogSources {
    fn drop(&mut self) {
        self.abort();
    }
}

// =============================================================================
// Listener thread
// =============================================================================

impl Shared {
    fn listen(self: Arc<Self>) {
        tracing::debug!("Listener started");
        let topology = self.topology.wait_handle();
        let mut active: Vec<ActiveSource> = Vec::new();

        while !self.end.load(Ordering::SeqCst) {
            self.update_sources(&mut active);

            let ended = std::mem::take(&mut self.schedule.lock().ended_processes);
            if !ended.is_empty() {
                // Everything a process wrote is queued before its exit fires;
                // pull it into the aggregate before reporting the exit.
                self.drain_all(&mut active);
                self.post_process_ended(ended);
            }

            self.wait_for_updates(&mut active, &topology);
        }

        for mut src in active {
            src.source.abort();
        }
        for (_, mut source) in std::mem::take(&mut self.schedule.lock().to_add) {
            source.abort();
        }
        tracing::debug!("Listener stopped");
    }

    /// Apply queued removals, then additions.
    fn update_sources(&self, active: &mut Vec<ActiveSource>) {
        let (mut to_add, to_remove) = {
            let mut schedule = self.schedule.lock();
            (
                std::mem::take(&mut schedule.to_add),
                std::mem::take(&mut schedule.to_remove),
            )
        };

        for id in to_remove {
            if let Some(pos) = to_add.iter().position(|(added, _)| *added == id) {
                let (_, mut source) = to_add.remove(pos);
                source.abort();
            }
            if let Some(pos) = active.iter().position(|src| src.id == id) {
                let mut src = active.remove(pos);
                src.source.abort();
            }
            let removed = self.registry.lock().remove(&id);
            if let Some(info) = removed {
                tracing::info!(source = %id, description = %info.description, "Source removed");
                self.add_message(format!("Source '{}' was removed.", info.description));
            }
        }

        for (id, mut source) in to_add {
            match source.initialize() {
                Ok(()) => {
                    let handle = source.wait_handle();
                    active.push(ActiveSource { id, source, handle });
                }
                Err(e) => {
                    let description = source.description();
                    tracing::warn!(source = %id, error = %e, "Source failed to start");
                    self.mark_ended(id);
                    self.add_message(format!("Source '{description}' failed to start: {e}"));
                }
            }
        }
    }

    /// Block until a source fires or the topology changes; drain fired
    /// sources. Returns when the wait set has to be rebuilt.
    fn wait_for_updates(&self, active: &mut Vec<ActiveSource>, topology: &WaitHandle) {
        let waitable: Vec<(usize, WaitHandle)> = active
            .iter()
            .enumerate()
            .filter_map(|(index, src)| src.handle.clone().map(|h| (index, h)))
            .collect();
        let mut handles: Vec<&WaitHandle> = waitable.iter().map(|(_, h)| h).collect();
        handles.push(topology);
        let topology_index = handles.len() - 1;

        let mut finished = None;
        while !self.end.load(Ordering::SeqCst) {
            match wait_any(&handles, None) {
                WaitOutcome::Signaled(i) if i == topology_index => break,
                WaitOutcome::Signaled(i) => {
                    let index = waitable[i].0;
                    if self.drain_source(&mut active[index]) {
                        finished = Some(index);
                        break;
                    }
                }
                WaitOutcome::TimedOut => {}
            }
        }

        if let Some(index) = finished {
            let mut src = active.remove(index);
            src.source.abort();
        }
    }

    fn drain_all(&self, active: &mut Vec<ActiveSource>) {
        active.retain_mut(|src| {
            if self.drain_source(src) {
                src.source.abort();
                false
            } else {
                true
            }
        });
    }

    /// Merge the source's new lines into the aggregate. Returns true once
    /// the source has ended.
    fn drain_source(&self, src: &mut ActiveSource) -> bool {
        let mut batch = Vec::new();
        if let Err(e) = src.source.notify(&mut batch) {
            let description = src.source.description();
            tracing::warn!(source = %src.id, error = %e, "Source drain failed");
            batch.push(Line::new(
                self.timer.get(),
                Utc::now(),
                0,
                constants::INTERNAL_PROCESS_NAME,
                format!("Source '{description}': {e}"),
            ));
        }

        let ended = src.source.at_end();
        let changed = !batch.is_empty() || ended;
        if !batch.is_empty() {
            for line in batch.iter_mut() {
                line.source = src.id;
                src.source.pre_process(line);
            }
            tracing::trace!(source = %src.id, lines = batch.len(), "Source drained");
            merge_sorted(&mut self.aggregate.lock(), batch);
        }
        if ended {
            tracing::info!(source = %src.id, "Source reached end of stream");
            self.mark_ended(src.id);
        }
        if changed {
            self.throttle.trigger();
        }
        ended
    }

    fn mark_ended(&self, id: SourceId) {
        if let Some(info) = self.registry.lock().get_mut(&id) {
            info.ended = true;
        }
    }

    // -------------------------------------------------------------------------
    // Lines and processes
    // -------------------------------------------------------------------------

    fn add_message(&self, text: String) {
        let mut line = Line::new(
            self.timer.get(),
            Utc::now(),
            0,
            constants::INTERNAL_PROCESS_NAME,
            text,
        );
        line.source = SourceId::LOOPBACK;
        merge_sorted(&mut self.aggregate.lock(), vec![line]);
        self.throttle.trigger();
    }

    /// Move the aggregate through the source filter and newline reassembly
    /// into `consumer.ready`.
    fn absorb(&self, consumer: &mut Consumer) {
        let batch = std::mem::take(&mut *self.aggregate.lock());
        if batch.is_empty() {
            return;
        }
        let registry = self.registry.lock();
        let mut dropped = 0usize;
        for line in batch {
            let emits_fragments = if line.source == SourceId::LOOPBACK {
                true
            } else {
                match registry.get(&line.source) {
                    Some(info) if info.is_live() => info.emits_fragments(),
                    _ => {
                        dropped += 1;
                        continue;
                    }
                }
            };

            if let Some(process) = line.process.as_ref() {
                if !consumer.pids.contains_key(&line.pid) {
                    self.watch_process(consumer, process);
                }
            }

            if line.source == SourceId::LOOPBACK || line.message.is_empty() {
                consumer.ready.push(line);
            } else {
                let lines = consumer.filter.process(line, emits_fragments);
                consumer.ready.extend(lines);
            }
        }
        if dropped > 0 {
            tracing::trace!(dropped, "Lines from removed or disabled sources discarded");
        }
    }

    fn watch_process(&self, consumer: &mut Consumer, process: &ProcessHandle) {
        if consumer.pids.contains_key(&process.pid()) {
            return;
        }
        consumer.pids.insert(process.pid(), process.clone());
        if let Some(monitor) = self.monitor.lock().as_ref() {
            monitor.add(process.clone());
        }
    }

    /// Process monitor thread.
    fn process_ended(&self, handle: ProcessHandle) {
        self.schedule.lock().ended_processes.push(handle);
        self.topology.set();
    }

    /// Listener thread: hand ended processes to the executor.
    fn post_process_ended(self: &Arc<Self>, ended: Vec<ProcessHandle>) {
        let weak = Arc::downgrade(self);
        let job: Job = Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                for handle in &ended {
                    shared.on_process_ended(handle);
                }
            }
        });
        if let Err(e) = self.executor.post(job) {
            tracing::debug!(error = %e, "Process end not reported, executor gone");
        }
    }

    /// Executor thread: flush the process' pending text, then announce the
    /// termination.
    fn on_process_ended(&self, handle: &ProcessHandle) {
        let status = handle.exit_status().unwrap_or(ExitStatus::Unknown);
        {
            let mut consumer = self.consumer.lock();
            self.absorb(&mut consumer);

            let time = self.timer.get();
            let now = Utc::now();
            if let Some(line) = consumer.filter.flush_terminated(handle.pid(), time, now) {
                consumer.ready.push(line);
            }
            let started = handle
                .started()
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S");
            let mut notice = Line::new(
                time,
                now,
                handle.pid(),
                handle.name(),
                format!("<process started at {started} has terminated with {status}>"),
            );
            notice.source = SourceId::LOOPBACK;
            consumer.ready.push(notice);
            consumer.pids.remove(&handle.pid());
        }
        tracing::info!(pid = handle.pid(), name = handle.name(), status = %status, "Process ended");
        self.throttle.trigger();
    }

    /// Executor thread, via the throttle.
    fn notify_subscribers(&self) {
        let callbacks: Vec<UpdateCallback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
