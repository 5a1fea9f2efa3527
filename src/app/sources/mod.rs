// DbgMux - app/sources/mod.rs
//
// Pluggable line producers.
//
// A `LogSource` is owned by the orchestrator's wait-loop thread. It exposes a
// readiness handle; when the handle fires the loop calls `notify`, which
// drains whatever the source has produced since the last call. Concrete
// sources run their own I/O on a background thread and hand lines over
// through a `LineSink`.

pub mod file_tail;
pub mod process_reader;
pub mod test_source;
pub mod udp;

use crate::core::clock::Timer;
use crate::core::line_buffer::LineBuffer;
use crate::core::model::{Line, SourceKind};
use crate::core::process::ProcessHandle;
use crate::core::signal::{Event, WaitHandle};
use crate::util::constants::INTERNAL_PROCESS_NAME;
use crate::util::error::{RingBufferError, SourceError};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;

pub use file_tail::{FileTailSource, TailOptions};
pub use process_reader::ProcessSource;
pub use test_source::{TestSource, TestSourceHandle};
pub use udp::UdpSource;

/// A producer of lines, driven by the orchestrator's wait loop.
pub trait LogSource: Send {
    fn description(&self) -> String;

    fn kind(&self) -> SourceKind;

    /// Bound address, for network sources.
    fn address(&self) -> Option<String> {
        None
    }

    /// Whether emitted messages are already whole lines. Such sources bypass
    /// newline reassembly regardless of the auto-newline setting.
    fn line_delimited(&self) -> bool {
        false
    }

    /// Process owned by this source, watched for termination from the moment
    /// the source is added.
    fn process(&self) -> Option<ProcessHandle> {
        None
    }

    /// Fires when `notify` has something to do. `None` = never waited on.
    fn wait_handle(&self) -> Option<WaitHandle>;

    /// Called once on the wait-loop thread before the first wait.
    fn initialize(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Move produced lines into `out`. Must not block.
    fn notify(&mut self, out: &mut Vec<Line>) -> Result<(), SourceError>;

    /// No more lines will ever be produced.
    fn at_end(&self) -> bool;

    /// Stop producing and release background resources.
    fn abort(&mut self);

    /// Per-line hook applied after the line is attributed to this source.
    fn pre_process(&self, _line: &mut Line) {}
}

// =============================================================================
// LineSink
// =============================================================================

/// Producer side shared by the concrete sources: a line transport plus the
/// readiness event the wait loop sleeps on.
#[derive(Clone)]
pub struct LineSink {
    buffer: Arc<dyn LineBuffer>,
    ready: Event,
    timer: Timer,
    // Back half of the double buffer. Only the draining side touches it; its
    // capacity goes back to the producers on the next swap.
    back: Arc<Mutex<Vec<Line>>>,
}

impl std::fmt::Debug for LineSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSink")
            .field("empty", &self.buffer.is_empty())
            .finish()
    }
}

impl LineSink {
    pub fn new(buffer: Arc<dyn LineBuffer>, timer: Timer) -> Self {
        Self {
            buffer,
            ready: Event::new(),
            timer,
            back: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// Stamp a message with the capture clock and queue it.
    pub fn add(
        &self,
        pid: u32,
        process_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), RingBufferError> {
        let line = Line::new(self.timer.get(), Utc::now(), pid, process_name, message);
        self.push(line)
    }

    /// Queue a prepared line and wake the wait loop.
    pub fn push(&self, line: Line) -> Result<(), RingBufferError> {
        self.buffer.push(line)?;
        self.ready.set();
        Ok(())
    }

    /// Queue a diagnostic about the source itself.
    pub fn diagnostic(&self, message: impl Into<String>) {
        if let Err(e) = self.add(0, INTERNAL_PROCESS_NAME, message) {
            tracing::warn!(error = %e, "Source diagnostic dropped");
        }
    }

    /// Wake the wait loop without queueing anything (end of stream).
    pub fn signal(&self) {
        self.ready.set();
    }

    pub fn wait_handle(&self) -> WaitHandle {
        self.ready.wait_handle()
    }

    /// Append everything queued so far to `out`.
    pub fn drain_into(&self, out: &mut Vec<Line>) {
        let mut back = self.back.lock();
        self.buffer.swap_into(&mut back);
        out.append(&mut back);
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Decode the longest valid prefix of `bytes`, leaving an incomplete
/// trailing UTF-8 sequence in place for the next read. Invalid bytes are
/// replaced.
fn take_utf8(bytes: &mut Vec<u8>) -> String {
    let keep_from = incomplete_tail(bytes);
    let rest = bytes.split_off(keep_from);
    let text = match String::from_utf8(std::mem::take(bytes)) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    *bytes = rest;
    text
}

/// Start of a multi-byte sequence cut off at the end of `bytes`, or
/// `bytes.len()` when the tail is complete.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::line_buffer::VectorLineBuffer;

    #[test]
    fn test_take_utf8_keeps_split_sequence() {
        let euro = "€".as_bytes();
        let mut bytes = b"price ".to_vec();
        bytes.extend_from_slice(&euro[..2]);
        assert_eq!(take_utf8(&mut bytes), "price ");
        assert_eq!(bytes.len(), 2);
        bytes.extend_from_slice(&euro[2..]);
        assert_eq!(take_utf8(&mut bytes), "€");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_take_utf8_replaces_invalid_bytes() {
        let mut bytes = b"a\xFFb".to_vec();
        assert_eq!(take_utf8(&mut bytes), "a\u{fffd}b");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_take_utf8_keeps_split_tail_after_invalid_byte() {
        let mut bytes = b"\xFFcaf\xC3".to_vec();
        assert_eq!(take_utf8(&mut bytes), "\u{fffd}caf");
        assert_eq!(bytes, b"\xC3");
    }

    #[test]
    fn test_drain_reuses_back_buffer() {
        let sink = LineSink::new(Arc::new(VectorLineBuffer::new()), Timer::new());
        for i in 0..100 {
            sink.add(1, "p", format!("line {i}")).unwrap();
        }
        let mut out = Vec::new();
        sink.drain_into(&mut out);
        assert_eq!(out.len(), 100);
        assert!(sink.back.lock().capacity() >= 100);

        sink.add(1, "p", "next").unwrap();
        let mut out = Vec::new();
        sink.drain_into(&mut out);
        assert_eq!(out.len(), 1);
        assert!(sink.is_empty());
    }
}
