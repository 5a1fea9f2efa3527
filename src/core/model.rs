// DbgMux - core/model.rs
//
// Core data model types: captured lines, source identity and the registry
// record kept per source.
//
// These types are the shared vocabulary across all layers.

use crate::core::process::ProcessHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

// =============================================================================
// Source identity
// =============================================================================

/// Non-owning reference from a line back to the source that produced it.
///
/// Ids are allocated monotonically and never reused, so a stale id simply
/// fails to resolve in the source registry; it can never alias a newer
/// source. Registration order is id order, which also breaks timestamp ties
/// in the merged stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SourceId(pub u64);

impl SourceId {
    /// Lines not yet attributed to a registered source.
    pub const UNASSIGNED: SourceId = SourceId(u64::MAX);

    /// The built-in loopback source carrying internal messages.
    pub const LOOPBACK: SourceId = SourceId(0);
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Category of a source, used for display and for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Internal messages generated by the capture core.
    System,
    /// A tailed file.
    File,
    /// Stdout/stderr pipes of a captured child process.
    Process,
    /// Datagrams received on a UDP port.
    Udp,
    /// Scripted lines (tests and demos).
    Test,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::System => "System",
            SourceKind::File => "File",
            SourceKind::Process => "Process",
            SourceKind::Udp => "UDP",
            SourceKind::Test => "Test",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Line
// =============================================================================

/// One captured line (or raw fragment, before newline reassembly).
///
/// Created by a source, stamped with its `SourceId` when the orchestrator
/// drains the source, and consumed by the display layer after merging.
#[derive(Debug, Clone, Serialize)]
pub struct Line {
    /// Seconds since the capture timer was last reset.
    pub time: f64,

    /// Wall-clock time the line was captured.
    pub system_time: DateTime<Utc>,

    /// Id of the emitting process (0 when unknown).
    pub pid: u32,

    /// Name of the emitting process, or a source-specific label.
    pub process_name: String,

    /// Message text.
    pub message: String,

    /// Back-reference to the producing source. Lookup only.
    pub source: SourceId,

    /// Handle of the emitting process, attached by sources that know it so
    /// the orchestrator can watch for the process ending.
    #[serde(skip)]
    pub process: Option<ProcessHandle>,
}

impl Line {
    pub fn new(
        time: f64,
        system_time: DateTime<Utc>,
        pid: u32,
        process_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            time,
            system_time,
            pid,
            process_name: process_name.into(),
            message: message.into(),
            source: SourceId::UNASSIGNED,
            process: None,
        }
    }

    /// Attach the emitting process' handle; also sets `pid`.
    pub fn with_process(mut self, handle: ProcessHandle) -> Self {
        self.pid = handle.pid();
        self.process = Some(handle);
        self
    }

    /// Ordering key of the merged stream: time, then registration order.
    pub fn order_key(&self) -> (f64, SourceId) {
        (self.time, self.source)
    }
}

// =============================================================================
// Source registry record
// =============================================================================

/// Registry entry describing a source, visible to any thread.
///
/// The source object itself is owned by the orchestrator's wait-loop thread;
/// this record only mirrors what other threads are allowed to know about it.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub id: SourceId,
    pub kind: SourceKind,
    pub description: String,
    /// Bound address or port, for network sources.
    pub address: Option<String>,
    /// Lines from a disabled source are dropped by `get_lines`.
    pub enabled: bool,
    /// Lines are emitted per fragment instead of waiting for a newline.
    pub auto_newline: bool,
    /// The source already produces whole lines; its fragments are always
    /// emitted as they arrive, whatever `auto_newline` says.
    pub line_delimited: bool,
    /// Removal requested; the wait loop has not erased it yet.
    pub removal_scheduled: bool,
    /// The source reported end-of-stream and left the wait set.
    pub ended: bool,
}

impl SourceInfo {
    /// Whether lines attributed to this source should still be delivered.
    pub fn is_live(&self) -> bool {
        self.enabled && !self.removal_scheduled
    }

    /// Auto-newline mode actually applied to this source's fragments.
    pub fn emits_fragments(&self) -> bool {
        self.auto_newline || self.line_delimited
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_line_is_unassigned() {
        let line = Line::new(1.5, Utc::now(), 42, "app", "hello");
        assert_eq!(line.source, SourceId::UNASSIGNED);
        assert!(line.process.is_none());
        assert_eq!(line.order_key(), (1.5, SourceId::UNASSIGNED));
    }

    #[test]
    fn test_with_process_sets_pid() {
        let (handle, _exit) = ProcessHandle::new(1234, "worker");
        let line = Line::new(0.0, Utc::now(), 0, "worker", "x").with_process(handle);
        assert_eq!(line.pid, 1234);
        assert!(line.process.is_some());
    }

    #[test]
    fn test_line_serialises_without_process_handle() {
        let (handle, _exit) = ProcessHandle::new(7, "p");
        let mut line = Line::new(2.0, Utc::now(), 0, "p", "msg").with_process(handle);
        line.source = SourceId(3);
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["pid"], 7);
        assert_eq!(json["source"], 3);
        assert!(json.get("process").is_none());
    }

    #[test]
    fn test_source_info_liveness() {
        let mut info = SourceInfo {
            id: SourceId(1),
            kind: SourceKind::File,
            description: "app.log".to_string(),
            address: None,
            enabled: true,
            auto_newline: true,
            line_delimited: false,
            removal_scheduled: false,
            ended: false,
        };
        assert!(info.is_live());
        info.enabled = false;
        assert!(!info.is_live());
        info.enabled = true;
        info.removal_scheduled = true;
        assert!(!info.is_live());
    }

    #[test]
    fn test_line_delimited_sources_always_emit_fragments() {
        let info = SourceInfo {
            id: SourceId(2),
            kind: SourceKind::Udp,
            description: "udp:9999".to_string(),
            address: None,
            enabled: true,
            auto_newline: false,
            line_delimited: true,
            removal_scheduled: false,
            ended: false,
        };
        assert!(info.emits_fragments());
    }
}
