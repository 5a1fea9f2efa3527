// DbgMux - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation; every variant keeps its cause so the
// full chain can be logged.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all DbgMux operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum DbgMuxError {
    /// Ring-buffer transport failed.
    RingBuffer(RingBufferError),

    /// Executor could not run or schedule a task.
    Executor(ExecutorError),

    /// A log source could not be created or read.
    Source(SourceError),

    /// Filter construction failed.
    Filter(FilterError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for DbgMuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RingBuffer(e) => write!(f, "Ring buffer error: {e}"),
            Self::Executor(e) => write!(f, "Executor error: {e}"),
            Self::Source(e) => write!(f, "Source error: {e}"),
            Self::Filter(e) => write!(f, "Filter error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for DbgMuxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RingBuffer(e) => Some(e),
            Self::Executor(e) => Some(e),
            Self::Source(e) => Some(e),
            Self::Filter(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Ring buffer errors
// ---------------------------------------------------------------------------

/// Errors raised by the ring-buffer transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingBufferError {
    /// Not enough free space for the value being written.
    Full { needed: usize, available: usize },

    /// Nothing to read.
    Empty,

    /// Fewer bytes are buffered than the value being read requires, or a
    /// string has no terminating NUL yet.
    Incomplete { needed: usize, used: usize },

    /// A record can never fit, even in an empty buffer.
    RecordTooLarge { size: usize, usable: usize },

    /// A bounded wait for space or data expired.
    Timeout { waited_ms: u64 },

    /// A string to be written contains an embedded NUL byte.
    InteriorNul { position: usize },
}

impl fmt::Display for RingBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full { needed, available } => write!(
                f,
                "buffer full: {needed} bytes needed, {available} available"
            ),
            Self::Empty => write!(f, "read from empty buffer"),
            Self::Incomplete { needed, used } => write!(
                f,
                "incomplete read: {needed} bytes needed, {used} buffered"
            ),
            Self::RecordTooLarge { size, usable } => write!(
                f,
                "record of {size} bytes exceeds usable capacity of {usable} bytes"
            ),
            Self::Timeout { waited_ms } => {
                write!(f, "timed out after {waited_ms} ms waiting on buffer")
            }
            Self::InteriorNul { position } => {
                write!(f, "string contains NUL byte at position {position}")
            }
        }
    }
}

impl std::error::Error for RingBufferError {}

impl From<RingBufferError> for DbgMuxError {
    fn from(e: RingBufferError) -> Self {
        Self::RingBuffer(e)
    }
}

// ---------------------------------------------------------------------------
// Executor errors
// ---------------------------------------------------------------------------

/// Errors related to executing or scheduling work on an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// A blocking `call` was issued from the executor's own thread, which
    /// would deadlock.
    Reentrant,

    /// The executor has shut down; the task was not (or will never be) run.
    Shutdown,

    /// The task panicked while running.
    TaskPanicked { message: String },

    /// A host-loop operation was invoked from a thread other than the host.
    WrongThread,
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reentrant => write!(
                f,
                "blocking call issued from the executor thread would deadlock"
            ),
            Self::Shutdown => write!(f, "executor has shut down"),
            Self::TaskPanicked { message } => write!(f, "task panicked: {message}"),
            Self::WrongThread => write!(f, "operation must run on the executor's host thread"),
        }
    }
}

impl std::error::Error for ExecutorError {}

impl From<ExecutorError> for DbgMuxError {
    fn from(e: ExecutorError) -> Self {
        Self::Executor(e)
    }
}

// ---------------------------------------------------------------------------
// Source errors
// ---------------------------------------------------------------------------

/// Errors related to creating or draining a log source.
#[derive(Debug)]
pub enum SourceError {
    /// I/O failure on a file-backed source.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// The UDP socket could not be bound.
    Bind { port: u16, source: io::Error },

    /// A child process could not be started.
    Spawn { program: String, source: io::Error },

    /// The source's transport rejected a line.
    Transport(RingBufferError),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io {
                path,
                operation,
                source,
            } => write!(f, "cannot {operation} '{}': {source}", path.display()),
            Self::Bind { port, source } => write!(f, "cannot bind UDP port {port}: {source}"),
            Self::Spawn { program, source } => {
                write!(f, "cannot start '{program}': {source}")
            }
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Bind { source, .. } => Some(source),
            Self::Spawn { source, .. } => Some(source),
            Self::Transport(e) => Some(e),
        }
    }
}

impl From<RingBufferError> for SourceError {
    fn from(e: RingBufferError) -> Self {
        Self::Transport(e)
    }
}

impl From<SourceError> for DbgMuxError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

// ---------------------------------------------------------------------------
// Filter errors
// ---------------------------------------------------------------------------

/// Errors related to filter operations.
#[derive(Debug)]
pub enum FilterError {
    /// User-provided regex is invalid.
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegex { pattern, source } => {
                write!(f, "Invalid filter regex '{pattern}': {source}")
            }
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex { source, .. } => Some(source),
        }
    }
}

impl From<FilterError> for DbgMuxError {
    fn from(e: FilterError) -> Self {
        Self::Filter(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for DbgMuxError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for DbgMux results.
pub type Result<T> = std::result::Result<T, DbgMuxError>;
