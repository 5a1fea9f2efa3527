// DbgMux - app/console.rs
//
// Text and JSON rendering of captured lines for the command-line front end.

use crate::core::model::Line;
use chrono::Local;

/// Output style of the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineFormat {
    /// `relative-time  wall-clock  pid  process  message`
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Render one line, without a trailing newline.
pub fn format_line(line: &Line, format: LineFormat) -> String {
    match format {
        LineFormat::Text => format!(
            "{:>12.6}  {}  {:>6}  {:<16} {}",
            line.time,
            line.system_time
                .with_timezone(&Local)
                .format("%H:%M:%S%.3f"),
            line.pid,
            line.process_name,
            line.message
        ),
        LineFormat::Json => match serde_json::to_string(line) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot serialise line as JSON");
                format!("{{\"message\":{:?}}}", line.message)
            }
        },
    }
}
