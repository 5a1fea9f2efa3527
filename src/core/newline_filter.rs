// DbgMux - core/newline_filter.rs
//
// Per-process reassembly of raw output fragments into complete lines.
//
// Fragments from one pid accumulate until a '\n' arrives. Carriage returns
// are dropped. A pid's unterminated text is force-emitted once it grows past
// the flush threshold, and a source in auto-newline mode emits whatever is
// left after every fragment. When a process ends, its pending text is
// flushed exactly once and the pid's state discarded.

use crate::core::model::Line;
use crate::util::constants;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug)]
struct Pending {
    text: String,
    // Metadata of the most recent fragment; message left empty.
    template: Line,
}

/// Partial-line state machine keyed by pid.
#[derive(Debug)]
pub struct NewlineFilter {
    pending: HashMap<u32, Pending>,
    flush_threshold: usize,
}

impl Default for NewlineFilter {
    fn default() -> Self {
        Self::new(constants::DEFAULT_NEWLINE_FLUSH_THRESHOLD)
    }
}

impl NewlineFilter {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            pending: HashMap::new(),
            flush_threshold,
        }
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// Feed one fragment; returns the lines it completes (possibly none).
    pub fn process(&mut self, fragment: Line, auto_newline: bool) -> Vec<Line> {
        let mut out = Vec::new();
        let mut template = fragment;
        let message = std::mem::take(&mut template.message);

        let pid = template.pid;
        let entry = self.pending.entry(pid).or_insert_with(|| Pending {
            text: String::new(),
            template: template.clone(),
        });
        entry.template = template;

        for c in message.chars() {
            match c {
                '\r' => {}
                '\n' => out.push(emit(&entry.template, std::mem::take(&mut entry.text))),
                c => entry.text.push(c),
            }
        }

        if entry.text.is_empty() {
            self.pending.remove(&pid);
        } else if auto_newline || entry.text.len() > self.flush_threshold {
            if !auto_newline {
                tracing::debug!(
                    pid,
                    bytes = entry.text.len(),
                    "Newline filter: unterminated text over threshold, force-emitting"
                );
            }
            out.push(emit(&entry.template, std::mem::take(&mut entry.text)));
            self.pending.remove(&pid);
        }
        out
    }

    /// Flush and forget `pid`'s pending text after its process ended.
    ///
    /// Returns the final line once; later calls for the same pid return `None`.
    pub fn flush_terminated(
        &mut self,
        pid: u32,
        time: f64,
        system_time: DateTime<Utc>,
    ) -> Option<Line> {
        let pending = self.pending.remove(&pid)?;
        if pending.text.is_empty() {
            return None;
        }
        let mut line = emit(&pending.template, pending.text);
        line.time = time;
        line.system_time = system_time;
        Some(line)
    }

    /// Pending unterminated text for `pid`, if any.
    pub fn pending(&self, pid: u32) -> Option<&str> {
        self.pending.get(&pid).map(|p| p.text.as_str())
    }

    pub fn pending_pids(&self) -> usize {
        self.pending.len()
    }
}

fn emit(template: &Line, text: String) -> Line {
    let mut line = template.clone();
    line.message = text;
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(pid: u32, message: &str) -> Line {
        Line::new(1.0, Utc::now(), pid, "proc", message)
    }

    fn messages(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|l| l.message.as_str()).collect()
    }

    #[test]
    fn test_fragments_join_on_newline() {
        let mut filter = NewlineFilter::default();
        assert!(filter.process(fragment(1, "abc"), false).is_empty());
        assert_eq!(filter.pending(1), Some("abc"));
        let out = filter.process(fragment(1, "def\n"), false);
        assert_eq!(messages(&out), ["abcdef"]);
        assert_eq!(filter.pending(1), None);
    }

    #[test]
    fn test_carriage_returns_dropped_and_multiple_lines_split() {
        let mut filter = NewlineFilter::default();
        let out = filter.process(fragment(1, "one\r\ntwo\r\nthr"), false);
        assert_eq!(messages(&out), ["one", "two"]);
        assert_eq!(filter.pending(1), Some("thr"));
    }

    #[test]
    fn test_pids_are_independent() {
        let mut filter = NewlineFilter::default();
        filter.process(fragment(1, "from-one "), false);
        filter.process(fragment(2, "from-two "), false);
        let out = filter.process(fragment(1, "done\n"), false);
        assert_eq!(messages(&out), ["from-one done"]);
        assert_eq!(filter.pending(2), Some("from-two "));
    }

    #[test]
    fn test_threshold_force_emits_once_and_resets() {
        let mut filter = NewlineFilter::new(16);
        assert!(filter.process(fragment(1, "0123456789"), false).is_empty());
        let out = filter.process(fragment(1, "0123456789"), false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message.len(), 20);
        assert_eq!(filter.pending(1), None);
        assert!(filter.process(fragment(1, "abc"), false).is_empty());
    }

    #[test]
    fn test_auto_newline_emits_every_fragment() {
        let mut filter = NewlineFilter::default();
        let out = filter.process(fragment(1, "no terminator"), true);
        assert_eq!(messages(&out), ["no terminator"]);
        assert_eq!(filter.pending_pids(), 0);
    }

    #[test]
    fn test_flush_terminated_exactly_once() {
        let mut filter = NewlineFilter::default();
        filter.process(fragment(9, "partial"), false);
        let now = Utc::now();
        let line = filter.flush_terminated(9, 5.0, now).unwrap();
        assert_eq!(line.message, "partial");
        assert_eq!(line.pid, 9);
        assert_eq!(line.process_name, "proc");
        assert_eq!(line.time, 5.0);
        assert!(filter.flush_terminated(9, 6.0, now).is_none());
    }

    #[test]
    fn test_flush_without_pending_text_is_none() {
        let mut filter = NewlineFilter::default();
        filter.process(fragment(3, "complete\n"), false);
        assert!(filter.flush_terminated(3, 0.0, Utc::now()).is_none());
    }
}
