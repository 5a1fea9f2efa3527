// DbgMux - platform/config.rs
//
// Platform-specific configuration, directory resolution, and config.toml
// loading with startup validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved platform paths for DbgMux configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/dbgmux/ or %APPDATA%\DbgMux\config\)
    pub config_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            tracing::debug!(config = %config_dir.display(), "Platform paths resolved");
            Self { config_dir }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
            }
        }
    }
}

// =============================================================================
// config.toml shape
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// `[capture]` section.
    pub capture: CaptureSection,
    /// `[tail]` section.
    pub tail: TailSection,
    /// `[logging]` section.
    pub logging: LoggingSection,
}

/// `[capture]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Maximum update notifications per second.
    pub updates_per_second: Option<u32>,
    /// Ring transport capacity in bytes.
    pub ring_buffer_capacity: Option<usize>,
    /// Unterminated text force-emitted beyond this many bytes.
    pub newline_flush_threshold: Option<usize>,
    /// Emit every fragment as a line.
    pub auto_newline: Option<bool>,
    /// "vector" or "ring".
    pub transport: Option<String>,
    /// Producer wait on a full ring, 0 = block forever.
    pub ring_write_timeout_ms: Option<u64>,
}

/// `[tail]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct TailSection {
    pub poll_interval_ms: Option<u64>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

/// How producers hand lines to the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// Mutex-guarded double buffer.
    #[default]
    Vector,
    /// Serialised records in a fixed-capacity ring buffer.
    Ring,
}

/// Validated application configuration derived from `config.toml`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- Capture --
    pub updates_per_second: u32,
    pub ring_buffer_capacity: usize,
    pub newline_flush_threshold: usize,
    pub auto_newline: bool,
    pub transport: TransportKind,
    /// `None` = producers block until the consumer catches up.
    pub ring_write_timeout: Option<Duration>,

    // -- Tail --
    pub tail_poll_interval: Duration,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
    /// Log file path.
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            updates_per_second: constants::DEFAULT_UPDATES_PER_SECOND,
            ring_buffer_capacity: constants::DEFAULT_RING_BUFFER_CAPACITY,
            newline_flush_threshold: constants::DEFAULT_NEWLINE_FLUSH_THRESHOLD,
            auto_newline: false,
            transport: TransportKind::Vector,
            ring_write_timeout: None,
            tail_poll_interval: Duration::from_millis(constants::TAIL_POLL_INTERVAL_MS),
            log_level: None,
            log_file: None,
        }
    }
}

fn out_of_range(field: &str, value: impl ToString, expected: String) -> ConfigError {
    ConfigError::ValueOutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        expected,
    }
}

/// Validate every field, keeping defaults for rejected values.
///
/// All problems are collected rather than stopping at the first one.
pub fn validate(raw: &RawConfig) -> (AppConfig, Vec<ConfigError>) {
    let mut config = AppConfig::default();
    let mut errors = Vec::new();

    // -- Capture: updates_per_second --
    if let Some(ups) = raw.capture.updates_per_second {
        if (constants::MIN_UPDATES_PER_SECOND..=constants::MAX_UPDATES_PER_SECOND).contains(&ups) {
            config.updates_per_second = ups;
        } else {
            errors.push(out_of_range(
                "capture.updates_per_second",
                ups,
                format!(
                    "{}-{} (default {})",
                    constants::MIN_UPDATES_PER_SECOND,
                    constants::MAX_UPDATES_PER_SECOND,
                    constants::DEFAULT_UPDATES_PER_SECOND
                ),
            ));
        }
    }

    // -- Capture: ring_buffer_capacity --
    if let Some(capacity) = raw.capture.ring_buffer_capacity {
        if (constants::MIN_RING_BUFFER_CAPACITY..=constants::MAX_RING_BUFFER_CAPACITY)
            .contains(&capacity)
        {
            config.ring_buffer_capacity = capacity;
        } else {
            errors.push(out_of_range(
                "capture.ring_buffer_capacity",
                capacity,
                format!(
                    "{}-{} bytes (default {})",
                    constants::MIN_RING_BUFFER_CAPACITY,
                    constants::MAX_RING_BUFFER_CAPACITY,
                    constants::DEFAULT_RING_BUFFER_CAPACITY
                ),
            ));
        }
    }

    // -- Capture: newline_flush_threshold --
    if let Some(threshold) = raw.capture.newline_flush_threshold {
        if (constants::MIN_NEWLINE_FLUSH_THRESHOLD..=constants::MAX_NEWLINE_FLUSH_THRESHOLD)
            .contains(&threshold)
        {
            config.newline_flush_threshold = threshold;
        } else {
            errors.push(out_of_range(
                "capture.newline_flush_threshold",
                threshold,
                format!(
                    "{}-{} bytes (default {})",
                    constants::MIN_NEWLINE_FLUSH_THRESHOLD,
                    constants::MAX_NEWLINE_FLUSH_THRESHOLD,
                    constants::DEFAULT_NEWLINE_FLUSH_THRESHOLD
                ),
            ));
        }
    }

    if let Some(auto_newline) = raw.capture.auto_newline {
        config.auto_newline = auto_newline;
    }

    // -- Capture: transport --
    if let Some(ref transport) = raw.capture.transport {
        match transport.to_lowercase().as_str() {
            "vector" => config.transport = TransportKind::Vector,
            "ring" => config.transport = TransportKind::Ring,
            other => errors.push(out_of_range(
                "capture.transport",
                other,
                "\"vector\" or \"ring\" (default \"vector\")".to_string(),
            )),
        }
    }

    // -- Capture: ring_write_timeout_ms --
    if let Some(ms) = raw.capture.ring_write_timeout_ms {
        if ms <= constants::MAX_RING_WRITE_TIMEOUT_MS {
            config.ring_write_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        } else {
            errors.push(out_of_range(
                "capture.ring_write_timeout_ms",
                ms,
                format!(
                    "0-{} (0 = block, default {})",
                    constants::MAX_RING_WRITE_TIMEOUT_MS,
                    constants::DEFAULT_RING_WRITE_TIMEOUT_MS
                ),
            ));
        }
    }

    // -- Tail: poll_interval_ms --
    if let Some(ms) = raw.tail.poll_interval_ms {
        if (constants::MIN_TAIL_POLL_INTERVAL_MS..=constants::MAX_TAIL_POLL_INTERVAL_MS).contains(&ms) {
            config.tail_poll_interval = Duration::from_millis(ms);
        } else {
            errors.push(out_of_range(
                "tail.poll_interval_ms",
                ms,
                format!(
                    "{}-{} (default {})",
                    constants::MIN_TAIL_POLL_INTERVAL_MS,
                    constants::MAX_TAIL_POLL_INTERVAL_MS,
                    constants::TAIL_POLL_INTERVAL_MS
                ),
            ));
        }
    }

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.clone());
        } else {
            errors.push(out_of_range(
                "logging.level",
                level,
                "error, warn, info, debug or trace (default info)".to_string(),
            ));
        }
    }

    // -- Logging: file --
    if let Some(ref file) = raw.logging.file {
        if !file.is_empty() {
            config.log_file = Some(file.clone());
        }
    }

    (config, errors)
}

/// Load and validate an explicit config file.
///
/// Unreadable or unparseable files are errors; out-of-range values are
/// returned as warnings alongside a config that uses defaults for them.
pub fn load_config_file(path: &Path) -> Result<(AppConfig, Vec<String>), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let raw: RawConfig = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source: e,
    })?;

    tracing::info!(path = %path.display(), "Loaded config.toml");

    let (config, errors) = validate(&raw);
    let warnings: Vec<String> = errors
        .iter()
        .map(|e| format!("{e}. Using default."))
        .collect();
    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Config validation produced warnings");
    }
    Ok((config, warnings))
}

/// Load `config.toml` from the given config directory.
///
/// If the file does not exist, returns defaults with no warnings (first run).
/// If it cannot be read or parsed, returns defaults with a warning; the
/// application still starts but the user is informed.
pub fn load_config(config_dir: &Path) -> (AppConfig, Vec<String>) {
    let config_path = config_dir.join(constants::CONFIG_FILE_NAME);

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), Vec::new());
    }

    match load_config_file(&config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            let msg = format!("{e}. Using defaults.");
            tracing::warn!("{}", msg);
            (AppConfig::default(), vec![msg])
        }
    }
}
