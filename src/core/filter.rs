// DbgMux - core/filter.rs
//
// Line filter applied to the merged stream before display.
// All active criteria are AND-combined.
// Core layer: pure logic, no I/O dependencies.

use crate::core::model::Line;
use crate::util::error::FilterError;
use regex::Regex;

/// Compiled filter state. Empty = accept everything.
#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    /// Message must match (None = no constraint).
    pub include: Option<Regex>,

    /// Message must NOT match.
    pub exclude: Option<Regex>,

    /// Process name must match.
    pub process: Option<Regex>,
}

fn compile(pattern: &str) -> Result<Option<Regex>, FilterError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| FilterError::InvalidRegex {
            pattern: pattern.to_string(),
            source: e,
        })
}

impl LineFilter {
    /// Returns true if no criteria are active.
    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_none() && self.process.is_none()
    }

    /// Set the include pattern. An empty pattern clears it.
    pub fn set_include(&mut self, pattern: &str) -> Result<(), FilterError> {
        self.include = compile(pattern)?;
        Ok(())
    }

    pub fn set_exclude(&mut self, pattern: &str) -> Result<(), FilterError> {
        self.exclude = compile(pattern)?;
        Ok(())
    }

    pub fn set_process(&mut self, pattern: &str) -> Result<(), FilterError> {
        self.process = compile(pattern)?;
        Ok(())
    }

    /// Check a single line against all active criteria.
    pub fn matches(&self, line: &Line) -> bool {
        if let Some(ref include) = self.include {
            if !include.is_match(&line.message) {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude {
            if exclude.is_match(&line.message) {
                return false;
            }
        }
        if let Some(ref process) = self.process {
            if !process.is_match(&line.process_name) {
                return false;
            }
        }
        true
    }

    /// Keep only matching lines, preserving order.
    pub fn apply(&self, lines: Vec<Line>) -> Vec<Line> {
        if self.is_empty() {
            return lines;
        }
        lines.into_iter().filter(|l| self.matches(l)).collect()
    }
}
