// DbgMux - core/process.rs
//
// Process handles: a pid plus a level-triggered "has exited" signal and the
// exit status once known. Whoever owns the real process (e.g. the child
// spawner in platform::process) holds the paired `ProcessExit` and fires it
// when the process ends.

use crate::core::signal::{ExitSignal, WaitHandle};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with a status code.
    Code(i64),
    /// Terminated by a signal (Unix).
    Signal(i32),
    /// The status could not be determined.
    Unknown,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ExitStatus::Code(code) => f.write_str(&format_exit_code(code)),
            ExitStatus::Signal(signal) => write!(f, "killed by signal {signal}"),
            ExitStatus::Unknown => f.write_str("unknown exit code"),
        }
    }
}

/// Human-readable exit code: small codes in decimal; negative or large codes
/// also in hex, since those usually encode an OS status value.
pub fn format_exit_code(code: i64) -> String {
    if code.abs() < 16 {
        if code < 0 {
            return format!("exit code {code} ({:#x})", code as u32);
        }
        return format!("exit code {code}");
    }
    format!("exit code {code} ({:#x})", code as u32)
}

#[derive(Debug)]
struct ProcessInner {
    pid: u32,
    name: String,
    started: DateTime<Utc>,
    exited: WaitHandle,
    status: OnceLock<ExitStatus>,
}

/// Shared handle to a (possibly running) process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<ProcessInner>,
}

impl ProcessHandle {
    /// Create a handle for `pid` and the `ProcessExit` that reports its end.
    pub fn new(pid: u32, name: impl Into<String>) -> (ProcessHandle, ProcessExit) {
        let (signal, exited) = ExitSignal::new();
        let inner = Arc::new(ProcessInner {
            pid,
            name: name.into(),
            started: Utc::now(),
            exited,
            status: OnceLock::new(),
        });
        (
            ProcessHandle {
                inner: Arc::clone(&inner),
            },
            ProcessExit {
                inner,
                signal: Some(signal),
            },
        )
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.inner.started
    }

    /// Becomes (and stays) ready once the process has ended.
    pub fn exit_handle(&self) -> &WaitHandle {
        &self.inner.exited
    }

    pub fn has_exited(&self) -> bool {
        self.inner.exited.is_closed()
    }

    /// Exit status, once the process has ended.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.status.get().copied()
    }
}

/// Reporting half of a `ProcessHandle`. Dropping it without calling
/// `exited` reports the process as ended with an unknown status.
#[derive(Debug)]
pub struct ProcessExit {
    inner: Arc<ProcessInner>,
    signal: Option<ExitSignal>,
}

impl ProcessExit {
    /// Record the exit status and signal every waiter.
    pub fn exited(mut self, status: ExitStatus) {
        let _ = self.inner.status.set(status);
        if let Some(signal) = self.signal.take() {
            signal.fire();
        }
    }
}

impl Drop for ProcessExit {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            let _ = self.inner.status.set(ExitStatus::Unknown);
            signal.fire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_signals_handle_with_status() {
        let (handle, exit) = ProcessHandle::new(10, "tool");
        assert!(!handle.has_exited());
        assert_eq!(handle.exit_status(), None);
        exit.exited(ExitStatus::Code(3));
        assert!(handle.has_exited());
        assert_eq!(handle.exit_status(), Some(ExitStatus::Code(3)));
    }

    #[test]
    fn test_dropped_exit_reports_unknown() {
        let (handle, exit) = ProcessHandle::new(11, "tool");
        drop(exit);
        assert!(handle.has_exited());
        assert_eq!(handle.exit_status(), Some(ExitStatus::Unknown));
    }

    #[test]
    fn test_format_exit_code() {
        assert_eq!(format_exit_code(0), "exit code 0");
        assert_eq!(format_exit_code(-1), "exit code -1 (0xffffffff)");
        assert_eq!(format_exit_code(255), "exit code 255 (0xff)");
        assert_eq!(ExitStatus::Signal(9).to_string(), "killed by signal 9");
        assert_eq!(ExitStatus::Unknown.to_string(), "unknown exit code");
    }
}
