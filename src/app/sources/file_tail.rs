// DbgMux - app/sources/file_tail.rs
//
// Tails a file and emits each appended line.
//
// Architecture:
//   - `FileTailSource` lives on the orchestrator's wait-loop thread;
//     `run_tail` runs on a background thread polling the file on a fixed
//     interval and pushing complete lines into the source's `LineSink`.
//   - An `Arc<AtomicBool>` cancel flag stops the thread; the poll sleep is
//     split into slices so cancel is honoured within
//     TAIL_CANCEL_CHECK_INTERVAL_MS.
//
// Encoding: new bytes are decoded as UTF-8, invalid bytes replaced. A
// multi-byte character cut by a read boundary is held back until the rest
// of it arrives.
//
// Error handling:
//   - Stat/read errors are non-fatal: logged, reported once as a diagnostic
//     line, and retried on the next tick.
//   - Truncated/rotated files (size < last offset) reset the offset to 0 so
//     the rewritten content is picked up cleanly.
//   - MAX_TAIL_READ_BYTES_PER_TICK caps the bytes consumed per tick and
//     MAX_TAIL_PARTIAL_BYTES caps an unterminated trailing line.

use super::{take_utf8, LineSink, LogSource};
use crate::core::model::{Line, SourceKind};
use crate::core::signal::WaitHandle;
use crate::util::constants::{
    MAX_TAIL_PARTIAL_BYTES, MAX_TAIL_READ_BYTES_PER_TICK, TAIL_CANCEL_CHECK_INTERVAL_MS,
    TAIL_POLL_INTERVAL_MS,
};
use crate::util::error::SourceError;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How a file is read.
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Emit existing content first instead of starting at the current end.
    pub from_start: bool,
    /// Keep watching after reaching the end. When false the source ends at
    /// the first end-of-file.
    pub follow: bool,
    pub poll_interval: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            from_start: false,
            follow: true,
            poll_interval: Duration::from_millis(TAIL_POLL_INTERVAL_MS),
        }
    }
}

pub struct FileTailSource {
    path: PathBuf,
    name: String,
    options: TailOptions,
    sink: LineSink,
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FileTailSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTailSource")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl FileTailSource {
    /// Fails if the file cannot be inspected now; later errors are reported
    /// as diagnostic lines.
    pub fn new(path: impl Into<PathBuf>, options: TailOptions, sink: LineSink) -> Result<Self, SourceError> {
        let path = path.into();
        std::fs::metadata(&path).map_err(|e| SourceError::Io {
            path: path.clone(),
            operation: "stat",
            source: e,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            path,
            name,
            options,
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSource for FileTailSource {
    fn description(&self) -> String {
        self.path.display().to_string()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn line_delimited(&self) -> bool {
        true
    }

    fn wait_handle(&self) -> Option<WaitHandle> {
        Some(self.sink.wait_handle())
    }

    fn initialize(&mut self) -> Result<(), SourceError> {
        if self.thread.is_some() {
            return Ok(());
        }
        let state = TailState {
            path: self.path.clone(),
            name: self.name.clone(),
            offset: 0,
            partial: String::new(),
            carry: Vec::new(),
            error_reported: false,
        };
        let options = self.options.clone();
        let sink = self.sink.clone();
        let cancel = Arc::clone(&self.cancel);
        let finished = Arc::clone(&self.finished);
        let thread = std::thread::Builder::new()
            .name(format!("dbgmux-tail-{}", self.name))
            .spawn(move || run_tail(state, options, sink, cancel, finished))
            .map_err(|e| SourceError::Io {
                path: self.path.clone(),
                operation: "spawn tail thread",
                source: e,
            })?;
        self.thread = Some(thread);
        tracing::info!(file = %self.path.display(), from_start = self.options.from_start, "Tail started");
        Ok(())
    }

    fn notify(&mut self, out: &mut Vec<Line>) -> Result<(), SourceError> {
        self.sink.drain_into(out);
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.finished.load(Ordering::SeqCst) && self.sink.is_empty()
    }

    fn abort(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(file = %self.path.display(), "Tail thread panicked");
            }
        }
    }
}

impl Drop for FileTailSource {
    fn drop(&mut self) {
        self.abort();
    }
}

// =============================================================================
// Background tail loop
// =============================================================================

struct TailState {
    path: PathBuf,
    name: String,
    /// Byte position of the last byte examined. Always advances by exactly
    /// the number of bytes read, whether they completed lines or not.
    offset: u64,
    /// Text after the final newline of the last read: an in-progress line.
    partial: String,
    /// Bytes of an incomplete UTF-8 sequence at the end of the last read.
    carry: Vec<u8>,
    error_reported: bool,
}

enum Tick {
    /// New bytes were consumed; more may be waiting.
    Read,
    /// Nothing beyond the current offset.
    AtEof,
    Error,
}

fn run_tail(
    mut state: TailState,
    options: TailOptions,
    sink: LineSink,
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
) {
    if !options.from_start {
        state.offset = std::fs::metadata(&state.path).map(|m| m.len()).unwrap_or(0);
    }
    tracing::debug!(file = %state.path.display(), offset = state.offset, "Tail: seeding initial offset");

    let slices = (options.poll_interval.as_millis() as u64 / TAIL_CANCEL_CHECK_INTERVAL_MS).max(1);

    loop {
        // Drain everything currently available before sleeping.
        let outcome = loop {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            match poll_once(&mut state, &sink) {
                Tick::Read => continue,
                other => break other,
            }
        };

        if !options.follow && matches!(outcome, Tick::AtEof) {
            if !state.carry.is_empty() {
                let tail = std::mem::take(&mut state.carry);
                state.partial.push_str(&String::from_utf8_lossy(&tail));
            }
            if !state.partial.is_empty() {
                let text = std::mem::take(&mut state.partial);
                push_line(&sink, &state.name, text);
            }
            tracing::debug!(file = %state.path.display(), "Tail: reached end of file");
            finished.store(true, Ordering::SeqCst);
            sink.signal();
            return;
        }

        for _ in 0..slices {
            std::thread::sleep(Duration::from_millis(TAIL_CANCEL_CHECK_INTERVAL_MS));
            if cancel.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

fn poll_once(state: &mut TailState, sink: &LineSink) -> Tick {
    // 1. Current file size.
    let current_size = match std::fs::metadata(&state.path) {
        Ok(m) => m.len(),
        Err(e) => {
            report_error(state, sink, format!("Cannot stat '{}': {e}", state.path.display()));
            return Tick::Error;
        }
    };

    // 2. Rotation / truncation.
    if current_size < state.offset {
        tracing::info!(
            file = %state.path.display(),
            old_offset = state.offset,
            new_size = current_size,
            "Tail: file truncated or rotated, resetting offset to 0"
        );
        state.offset = 0;
        state.partial.clear();
        state.carry.clear();
    }

    // 3. Nothing new.
    if current_size == state.offset {
        return Tick::AtEof;
    }

    // 4. Read new bytes (capped per tick).
    let available = (current_size - state.offset) as usize;
    let limit = available.min(MAX_TAIL_READ_BYTES_PER_TICK);
    let bytes = match read_bytes_at(&state.path, state.offset, limit) {
        Ok(b) => b,
        Err(e) => {
            report_error(state, sink, format!("Cannot read '{}': {e}", state.path.display()));
            return Tick::Error;
        }
    };
    if bytes.is_empty() {
        return Tick::AtEof;
    }
    state.error_reported = false;
    state.offset += bytes.len() as u64;

    // 5. Decode and split at newlines; keep the trailing fragment.
    state.carry.extend_from_slice(&bytes);
    state.partial.push_str(&take_utf8(&mut state.carry));
    let mut count = 0usize;
    if let Some(nl_pos) = state.partial.rfind('\n') {
        let rest = state.partial.split_off(nl_pos + 1);
        let complete = std::mem::replace(&mut state.partial, rest);
        for text in complete.lines() {
            push_line(sink, &state.name, text.to_string());
            count += 1;
        }
    }
    if state.partial.len() > MAX_TAIL_PARTIAL_BYTES {
        tracing::warn!(
            file = %state.path.display(),
            bytes = state.partial.len(),
            "Tail: unterminated line over limit, emitting as is"
        );
        let text = std::mem::take(&mut state.partial);
        push_line(sink, &state.name, text);
        count += 1;
    }
    if count > 0 {
        tracing::debug!(file = %state.path.display(), count, "Tail: new lines");
    }
    Tick::Read
}

fn push_line(sink: &LineSink, name: &str, text: String) {
    if let Err(e) = sink.add(0, name, text) {
        tracing::warn!(file = name, error = %e, "Tail: line dropped");
    }
}

fn report_error(state: &mut TailState, sink: &LineSink, message: String) {
    tracing::warn!(file = %state.path.display(), "{}", message);
    if !state.error_reported {
        state.error_reported = true;
        sink.diagnostic(message);
    }
}

/// Read up to `limit` bytes from `path` starting at byte position `offset`.
fn read_bytes_at(path: &Path, offset: u64, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; limit];
    let n = file.read(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
}
