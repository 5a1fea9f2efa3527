// DbgMux - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "DbgMux";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "DbgMux";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Transport limits
// =============================================================================

/// Default byte capacity of a ring-buffer transport (rounded up to a power
/// of two by `RingBuffer::new`).
pub const DEFAULT_RING_BUFFER_CAPACITY: usize = 64 * 1024; // 64 KiB

/// Minimum user-configurable ring-buffer capacity.
pub const MIN_RING_BUFFER_CAPACITY: usize = 1024;

/// Maximum user-configurable ring-buffer capacity.
pub const MAX_RING_BUFFER_CAPACITY: usize = 64 * 1024 * 1024; // 64 MiB

/// Default bounded wait for a blocked ring-buffer writer (0 = block forever).
pub const DEFAULT_RING_WRITE_TIMEOUT_MS: u64 = 0;

/// Maximum user-configurable bounded wait for a blocked ring-buffer writer.
pub const MAX_RING_WRITE_TIMEOUT_MS: u64 = 60_000;

// =============================================================================
// Line reassembly
// =============================================================================

/// Size at which an unterminated per-process line is force-emitted.
///
/// Guards against unbounded growth when a process writes a very long run of
/// output without a newline.
pub const DEFAULT_NEWLINE_FLUSH_THRESHOLD: usize = 8 * 1024;

/// Minimum user-configurable newline flush threshold.
pub const MIN_NEWLINE_FLUSH_THRESHOLD: usize = 256;

/// Maximum user-configurable newline flush threshold.
pub const MAX_NEWLINE_FLUSH_THRESHOLD: usize = 1024 * 1024;

// =============================================================================
// Update throttling
// =============================================================================

/// Default maximum number of "lines updated" notifications per second.
pub const DEFAULT_UPDATES_PER_SECOND: u32 = 25;

/// Minimum user-configurable update rate.
pub const MIN_UPDATES_PER_SECOND: u32 = 1;

/// Maximum user-configurable update rate.
pub const MAX_UPDATES_PER_SECOND: u32 = 1_000;

// =============================================================================
// Process monitoring
// =============================================================================

/// Maximum number of handles a single multiplexed wait covers, including the
/// monitor's own wake signal. Mirrors the classic 64-object wait limit.
pub const MAX_WAIT_OBJECTS: usize = 64;

/// When more processes are tracked than fit in one wait, each wait is
/// bounded by this timeout before rotating to the next window (ms).
pub const PROCESS_MONITOR_ROTATE_MS: u64 = 1_000;

/// How often a captured child process is polled for exit (ms).
pub const PROCESS_WAIT_POLL_MS: u64 = 50;

/// Read size for a child process stdout/stderr pipe.
pub const PIPE_READ_CHUNK_SIZE: usize = 4 * 1024;

// =============================================================================
// Live tail limits
// =============================================================================

/// How often the tail source polls its file for new content (ms).
pub const TAIL_POLL_INTERVAL_MS: u64 = 500;

/// How often the cancel flag is checked within each poll sleep interval (ms).
pub const TAIL_CANCEL_CHECK_INTERVAL_MS: u64 = 50;

/// Minimum user-configurable tail poll interval (ms).
pub const MIN_TAIL_POLL_INTERVAL_MS: u64 = 100;

/// Maximum user-configurable tail poll interval (ms).
pub const MAX_TAIL_POLL_INTERVAL_MS: u64 = 10_000; // 10 s

/// Maximum bytes read from a single file in one poll tick.
/// Prevents a large burst of new content from stalling the poll loop.
pub const MAX_TAIL_READ_BYTES_PER_TICK: usize = 512 * 1_024; // 512 KiB

/// Maximum accumulated size of the partial (in-progress) line buffer for a
/// tailed file. Set to 4x `MAX_TAIL_READ_BYTES_PER_TICK`; beyond this the
/// fragment is emitted as a line on its own.
pub const MAX_TAIL_PARTIAL_BYTES: usize = MAX_TAIL_READ_BYTES_PER_TICK * 4; // 2 MiB

// =============================================================================
// UDP source
// =============================================================================

/// Read timeout on the UDP socket so the receive thread notices cancellation.
pub const UDP_READ_TIMEOUT_MS: u64 = 100;

/// Largest UDP payload accepted.
pub const MAX_UDP_DATAGRAM_SIZE: usize = 65_507;

// =============================================================================
// Internal lines
// =============================================================================

/// Process name used on lines generated by the capture core itself.
pub const INTERNAL_PROCESS_NAME: &str = "[internal]";

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// How often the CLI host loop wakes when idle to check for completion (ms).
pub const HOST_IDLE_WAKE_MS: u64 = 250;
