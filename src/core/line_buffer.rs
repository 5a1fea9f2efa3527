// DbgMux - core/line_buffer.rs
//
// Transports that move complete `Line` records from producer threads to the
// single consumer (the orchestrator's drain step).
//
//   - `VectorLineBuffer`: mutex-guarded double buffer. Producers push under a
//     short lock; the consumer swaps the whole front vector out in O(1) and
//     does all per-line work after releasing the lock.
//   - `RingLineBuffer`: serialises lines into a `SharedRingBuffer`, giving a
//     fixed memory bound and blocking backpressure when the consumer lags.
//     Process handles cannot cross the byte ring and are not carried.

use crate::core::model::Line;
use crate::core::ring_buffer::{RingBuffer, RingValue, SharedRingBuffer};
use crate::util::error::RingBufferError;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// Producer/consumer line handoff.
pub trait LineBuffer: Send + Sync {
    /// Append one line. May block (ring transport) when the consumer lags.
    fn push(&self, line: Line) -> Result<(), RingBufferError>;

    /// Move every buffered line into `out` (which is cleared first), keeping
    /// production order.
    fn swap_into(&self, out: &mut Vec<Line>);

    fn is_empty(&self) -> bool;

    /// Convenience wrapper around `swap_into`.
    fn take_lines(&self) -> Vec<Line> {
        let mut lines = Vec::new();
        self.swap_into(&mut lines);
        lines
    }
}

// =============================================================================
// VectorLineBuffer
// =============================================================================

/// Double-buffered vector transport.
#[derive(Debug, Default)]
pub struct VectorLineBuffer {
    front: Mutex<Vec<Line>>,
}

impl VectorLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LineBuffer for VectorLineBuffer {
    fn push(&self, line: Line) -> Result<(), RingBufferError> {
        self.front.lock().push(line);
        Ok(())
    }

    fn swap_into(&self, out: &mut Vec<Line>) {
        out.clear();
        // Lock hold time is one pointer swap regardless of backlog size.
        std::mem::swap(&mut *self.front.lock(), out);
    }

    fn is_empty(&self) -> bool {
        self.front.lock().is_empty()
    }
}

// =============================================================================
// RingLineBuffer
// =============================================================================

// Record layout:
//   f64 time | i64 system time (µs since epoch) | u32 pid |
//   process name (NUL-terminated) | message (NUL-terminated)
const FIXED_RECORD_SIZE: usize = f64::SIZE + i64::SIZE + u32::SIZE;

/// Ring-buffer backed transport with a fixed memory footprint.
#[derive(Debug)]
pub struct RingLineBuffer {
    ring: SharedRingBuffer,
    write_timeout: Option<Duration>,
}

impl RingLineBuffer {
    /// `write_timeout = None` blocks producers indefinitely on a full ring.
    pub fn new(capacity: usize, write_timeout: Option<Duration>) -> Self {
        Self {
            ring: SharedRingBuffer::new(capacity),
            write_timeout,
        }
    }

    pub fn usable_capacity(&self) -> usize {
        self.ring.usable_capacity()
    }

    fn write_line(rb: &mut RingBuffer, line: &Line) -> Result<(), RingBufferError> {
        rb.write(line.time)?;
        rb.write(line.system_time.timestamp_micros())?;
        rb.write(line.pid)?;
        rb.write_string(&line.process_name)?;
        rb.write_string(&line.message)
    }

    fn read_line(rb: &mut RingBuffer) -> Result<Line, RingBufferError> {
        let time = rb.read::<f64>()?;
        let micros = rb.read::<i64>()?;
        let pid = rb.read::<u32>()?;
        let process_name = rb.read_string()?;
        let message = rb.read_string()?;
        let system_time = Utc
            .timestamp_micros(micros)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(Line::new(time, system_time, pid, process_name, message))
    }
}

/// Strip NUL bytes (they terminate strings in the ring) and shorten
/// `message` so the record fits in `usable` bytes.
fn fit_record(line: &mut Line, usable: usize) {
    if line.process_name.contains('\0') {
        line.process_name = line.process_name.replace('\0', "");
    }
    if line.message.contains('\0') {
        line.message = line.message.replace('\0', "");
    }
    let overhead = FIXED_RECORD_SIZE + RingBuffer::string_size(&line.process_name) + 1;
    if overhead + line.message.len() <= usable {
        return;
    }
    if overhead > usable {
        line.process_name.clear();
    }
    let overhead = FIXED_RECORD_SIZE + RingBuffer::string_size(&line.process_name) + 1;
    let mut keep = usable.saturating_sub(overhead);
    while keep > 0 && !line.message.is_char_boundary(keep) {
        keep -= 1;
    }
    tracing::warn!(
        original = line.message.len(),
        kept = keep,
        "Ring transport: message truncated to fit buffer"
    );
    line.message.truncate(keep);
}

impl LineBuffer for RingLineBuffer {
    fn push(&self, mut line: Line) -> Result<(), RingBufferError> {
        fit_record(&mut line, self.ring.usable_capacity());
        let size = FIXED_RECORD_SIZE
            + RingBuffer::string_size(&line.process_name)
            + RingBuffer::string_size(&line.message);
        self.ring
            .write_record(size, self.write_timeout, |rb| Self::write_line(rb, &line))
    }

    fn swap_into(&self, out: &mut Vec<Line>) {
        out.clear();
        out.extend(self.ring.drain_records(Self::read_line));
    }

    fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn line(time: f64, pid: u32, message: &str) -> Line {
        Line::new(time, Utc::now(), pid, "proc", message)
    }

    #[test]
    fn test_vector_swap_preserves_order_and_empties() {
        let buffer = VectorLineBuffer::new();
        assert!(buffer.is_empty());
        buffer.push(line(1.0, 1, "a")).unwrap();
        buffer.push(line(2.0, 1, "b")).unwrap();

        let mut back = vec![line(0.0, 0, "stale")];
        buffer.swap_into(&mut back);
        let messages: Vec<_> = back.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, ["a", "b"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_vector_many_producers_lose_nothing() {
        let buffer = Arc::new(VectorLineBuffer::new());
        let producers: Vec<_> = (0..4u32)
            .map(|pid| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..250 {
                        buffer.push(line(i as f64, pid, "x")).unwrap();
                    }
                })
            })
            .collect();
        let mut total = 0;
        let mut back = Vec::new();
        for p in producers {
            p.join().unwrap();
        }
        buffer.swap_into(&mut back);
        total += back.len();
        assert_eq!(total, 1000);
        // Per-producer order is preserved.
        for pid in 0..4u32 {
            let times: Vec<f64> = back.iter().filter(|l| l.pid == pid).map(|l| l.time).collect();
            assert!(times.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_ring_line_round_trip() {
        let buffer = RingLineBuffer::new(1024, None);
        let original = line(3.25, 77, "hello ring");
        let system_time = original.system_time;
        buffer.push(original).unwrap();
        buffer.push(line(4.0, 78, "second")).unwrap();

        let lines = buffer.take_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].time, 3.25);
        assert_eq!(lines[0].pid, 77);
        assert_eq!(lines[0].process_name, "proc");
        assert_eq!(lines[0].message, "hello ring");
        assert_eq!(
            lines[0].system_time.timestamp_micros(),
            system_time.timestamp_micros()
        );
        assert_eq!(lines[1].message, "second");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ring_oversized_message_is_truncated() {
        let buffer = RingLineBuffer::new(64, None);
        let long = "x".repeat(500);
        buffer.push(line(0.0, 1, &long)).unwrap();
        let lines = buffer.take_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].message.len() < 64);
        assert!(lines[0].message.chars().all(|c| c == 'x'));
    }

    #[test]
    fn test_ring_full_with_timeout_fails() {
        let buffer = RingLineBuffer::new(64, Some(Duration::from_millis(20)));
        buffer.push(line(0.0, 1, &"y".repeat(30))).unwrap();
        let result = buffer.push(line(0.0, 1, &"z".repeat(30)));
        assert!(matches!(result, Err(RingBufferError::Timeout { .. })));
    }

    #[test]
    fn test_ring_strips_nul_bytes() {
        let buffer = RingLineBuffer::new(256, None);
        buffer.push(line(0.0, 1, "a\0b")).unwrap();
        assert_eq!(buffer.take_lines()[0].message, "ab");
    }
}
