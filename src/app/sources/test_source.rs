// DbgMux - app/sources/test_source.rs
//
// Scripted source: lines are pushed from any thread through a handle.

use super::{LineSink, LogSource};
use crate::core::model::{Line, SourceKind};
use crate::core::process::ProcessHandle;
use crate::core::signal::WaitHandle;
use crate::util::error::{RingBufferError, SourceError};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct TestSource {
    description: String,
    sink: LineSink,
    finished: Arc<AtomicBool>,
}

/// Feeds a `TestSource` after it has been handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct TestSourceHandle {
    sink: LineSink,
    finished: Arc<AtomicBool>,
}

impl TestSource {
    pub fn new(description: impl Into<String>, sink: LineSink) -> (Self, TestSourceHandle) {
        let finished = Arc::new(AtomicBool::new(false));
        let handle = TestSourceHandle {
            sink: sink.clone(),
            finished: Arc::clone(&finished),
        };
        (
            Self {
                description: description.into(),
                sink,
                finished,
            },
            handle,
        )
    }
}

impl TestSourceHandle {
    /// Push a fragment with an explicit timestamp.
    pub fn push_at(
        &self,
        time: f64,
        pid: u32,
        process_name: &str,
        message: &str,
    ) -> Result<(), RingBufferError> {
        self.sink
            .push(Line::new(time, Utc::now(), pid, process_name, message))
    }

    /// Push a fragment stamped with the capture clock.
    pub fn push(&self, pid: u32, process_name: &str, message: &str) -> Result<(), RingBufferError> {
        self.sink.add(pid, process_name, message)
    }

    /// Push a fragment attributed to a watched process.
    pub fn push_with_process(
        &self,
        process: &ProcessHandle,
        message: &str,
    ) -> Result<(), RingBufferError> {
        let line = Line::new(
            self.sink.timer().get(),
            Utc::now(),
            process.pid(),
            process.name(),
            message,
        )
        .with_process(process.clone());
        self.sink.push(line)
    }

    /// Mark end of stream.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.sink.signal();
    }
}

impl LogSource for TestSource {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Test
    }

    fn wait_handle(&self) -> Option<WaitHandle> {
        Some(self.sink.wait_handle())
    }

    fn notify(&mut self, out: &mut Vec<Line>) -> Result<(), SourceError> {
        self.sink.drain_into(out);
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.finished.load(Ordering::SeqCst) && self.sink.is_empty()
    }

    fn abort(&mut self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}
