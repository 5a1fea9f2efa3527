// DbgMux - core/ring_buffer.rs
//
// Fixed-capacity byte ring used as a producer/consumer handoff channel.
//
// Layout: the 'always keep one slot open' strategy distinguishes empty
// (read == write) from full (write + 1 == read), so a buffer of capacity N
// holds at most N - 1 bytes. Capacity is rounded up to a power of two and
// cursor arithmetic uses a bit mask instead of division.
//
//   +---+---+---+---+---+---+---+---+
//   | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 |    2 bytes buffered
//   +---+---+---+---+---+---+---+---+
//     W                       R
//
// `RingBuffer` itself is a plain single-threaded structure. `SharedRingBuffer`
// wraps it in a mutex plus two condition variables and provides the blocking
// (backpressure) and bounded-wait behaviour used by transports.

use crate::util::error::RingBufferError;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

// =============================================================================
// Fixed-size values
// =============================================================================

/// Largest `RingValue::SIZE` the buffer accepts.
pub const MAX_RING_VALUE_SIZE: usize = 16;

/// A value with a fixed little-endian byte representation that can be copied
/// into and out of a `RingBuffer`.
pub trait RingValue: Sized {
    /// Encoded size in bytes, at most `MAX_RING_VALUE_SIZE`. Larger impls
    /// fail to compile when written or read.
    const SIZE: usize;

    /// Write the encoding into `out` (exactly `SIZE` bytes).
    fn encode(&self, out: &mut [u8]);

    /// Decode from `bytes` (exactly `SIZE` bytes).
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_ring_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl RingValue for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn encode(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_ring_value!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

struct SizeCheck<T>(std::marker::PhantomData<T>);

impl<T: RingValue> SizeCheck<T> {
    const FITS: () = assert!(
        T::SIZE <= MAX_RING_VALUE_SIZE,
        "RingValue::SIZE exceeds MAX_RING_VALUE_SIZE"
    );
}

// =============================================================================
// RingBuffer
// =============================================================================

/// Byte-addressable circular store with power-of-two capacity.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Box<[u8]>,
    mask: usize,
    read: usize,
    write: usize,
}

impl RingBuffer {
    /// Create a buffer whose capacity is `capacity` rounded up to the next
    /// power of two (minimum 2). Usable capacity is one less.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            mask: capacity - 1,
            read: 0,
            write: 0,
        }
    }

    /// Total slot count (a power of two).
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Maximum number of bytes that can be buffered at once.
    pub fn usable_capacity(&self) -> usize {
        self.mask
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn is_full(&self) -> bool {
        (self.write + 1) & self.mask == self.read
    }

    /// Number of buffered bytes.
    pub fn used_count(&self) -> usize {
        self.write.wrapping_sub(self.read) & self.mask
    }

    /// Number of bytes that can be written before the buffer is full.
    pub fn available_to_write(&self) -> usize {
        self.mask - self.used_count()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Copy a fixed-size value in at the write cursor.
    pub fn write<T: RingValue>(&mut self, value: T) -> Result<(), RingBufferError> {
        let () = SizeCheck::<T>::FITS;
        self.ensure_space(T::SIZE)?;
        let mut scratch = [0u8; MAX_RING_VALUE_SIZE];
        let encoded = &mut scratch[..T::SIZE];
        value.encode(encoded);
        self.put(encoded);
        Ok(())
    }

    /// Copy a fixed-size value out at the read cursor.
    pub fn read<T: RingValue>(&mut self) -> Result<T, RingBufferError> {
        let () = SizeCheck::<T>::FITS;
        self.ensure_data(T::SIZE)?;
        let mut scratch = [0u8; MAX_RING_VALUE_SIZE];
        let raw = &mut scratch[..T::SIZE];
        self.take(raw);
        Ok(T::decode(raw))
    }

    /// Write `text` followed by a terminating NUL byte.
    pub fn write_string(&mut self, text: &str) -> Result<(), RingBufferError> {
        let bytes = text.as_bytes();
        if let Some(position) = bytes.iter().position(|&b| b == 0) {
            return Err(RingBufferError::InteriorNul { position });
        }
        self.ensure_space(bytes.len() + 1)?;
        self.put(bytes);
        self.put(&[0]);
        Ok(())
    }

    /// Read a NUL-terminated string. Invalid UTF-8 is replaced lossily.
    ///
    /// Nothing is consumed when no terminator is buffered yet.
    pub fn read_string(&mut self) -> Result<String, RingBufferError> {
        let used = self.used_count();
        if used == 0 {
            return Err(RingBufferError::Empty);
        }
        let len = (0..used)
            .position(|i| self.buffer[(self.read + i) & self.mask] == 0)
            .ok_or(RingBufferError::Incomplete {
                needed: used + 1,
                used,
            })?;
        let mut bytes = vec![0u8; len];
        self.take(&mut bytes);
        self.read = (self.read + 1) & self.mask; // terminator
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Bytes a NUL-terminated string occupies once written.
    pub fn string_size(text: &str) -> usize {
        text.len() + 1
    }

    fn ensure_space(&self, needed: usize) -> Result<(), RingBufferError> {
        let available = self.available_to_write();
        if needed > available {
            return Err(RingBufferError::Full { needed, available });
        }
        Ok(())
    }

    fn ensure_data(&self, needed: usize) -> Result<(), RingBufferError> {
        let used = self.used_count();
        if used == 0 {
            return Err(RingBufferError::Empty);
        }
        if needed > used {
            return Err(RingBufferError::Incomplete { needed, used });
        }
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) {
        let start = self.write;
        let first = bytes.len().min(self.capacity() - start);
        self.buffer[start..start + first].copy_from_slice(&bytes[..first]);
        self.buffer[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.write = (start + bytes.len()) & self.mask;
    }

    fn take(&mut self, out: &mut [u8]) {
        let start = self.read;
        let first = out.len().min(self.capacity() - start);
        out[..first].copy_from_slice(&self.buffer[start..start + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.buffer[..rest]);
        self.read = (start + out.len()) & self.mask;
    }
}

// =============================================================================
// SharedRingBuffer
// =============================================================================

/// Thread-safe ring buffer with blocking backpressure.
///
/// Writers reserve room for a whole record before writing it, so a reader
/// that holds the lock always sees complete records. A full buffer blocks the
/// writer until the reader makes progress; a bounded wait fails with
/// `RingBufferError::Timeout` instead of blocking forever.
#[derive(Debug)]
pub struct SharedRingBuffer {
    ring: Mutex<RingBuffer>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl SharedRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn usable_capacity(&self) -> usize {
        self.ring.lock().usable_capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    pub fn used_count(&self) -> usize {
        self.ring.lock().used_count()
    }

    /// Wait until `size` bytes are free (or `timeout` expires), then run
    /// `write` with exclusive access.
    ///
    /// `timeout = None` blocks indefinitely.
    pub fn write_record<F>(
        &self,
        size: usize,
        timeout: Option<Duration>,
        write: F,
    ) -> Result<(), RingBufferError>
    where
        F: FnOnce(&mut RingBuffer) -> Result<(), RingBufferError>,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ring = self.ring.lock();
        let usable = ring.usable_capacity();
        if size > usable {
            return Err(RingBufferError::RecordTooLarge { size, usable });
        }
        while ring.available_to_write() < size {
            match deadline {
                Some(deadline) => {
                    if self.not_full.wait_until(&mut ring, deadline).timed_out()
                        && ring.available_to_write() < size
                    {
                        return Err(RingBufferError::Timeout {
                            waited_ms: timeout.map_or(0, |t| t.as_millis() as u64),
                        });
                    }
                }
                None => self.not_full.wait(&mut ring),
            }
        }
        write(&mut ring)?;
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Wait until data is buffered (or `timeout` expires), then run `read`
    /// with exclusive access.
    pub fn read_record<T, F>(&self, timeout: Option<Duration>, read: F) -> Result<T, RingBufferError>
    where
        F: FnOnce(&mut RingBuffer) -> Result<T, RingBufferError>,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ring = self.ring.lock();
        while ring.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut ring, deadline).timed_out() && ring.is_empty()
                    {
                        return Err(RingBufferError::Timeout {
                            waited_ms: timeout.map_or(0, |t| t.as_millis() as u64),
                        });
                    }
                }
                None => self.not_empty.wait(&mut ring),
            }
        }
        let result = read(&mut ring);
        drop(ring);
        self.not_full.notify_all();
        result
    }

    /// Run `read` repeatedly while data is buffered, without blocking.
    /// Returns the collected values; the first read error ends the drain.
    pub fn drain_records<T, F>(&self, mut read: F) -> Vec<T>
    where
        F: FnMut(&mut RingBuffer) -> Result<T, RingBufferError>,
    {
        let mut out = Vec::new();
        {
            let mut ring = self.ring.lock();
            while !ring.is_empty() {
                match read(&mut ring) {
                    Ok(value) => out.push(value),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ring buffer: corrupt record, discarding remainder");
                        ring.clear();
                        break;
                    }
                }
            }
        }
        self.not_full.notify_all();
        out
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

    #[test]
    fn test_capacity_rounds_up_to_power_of_two() {
        assert_eq!(RingBuffer::new(1000).capacity(), 1024);
        assert_eq!(RingBuffer::new(1024).capacity(), 1024);
        assert_eq!(RingBuffer::new(0).capacity(), 2);
        assert_eq!(RingBuffer::new(1000).usable_capacity(), 1023);
    }

    #[test]
    fn test_new_buffer_is_empty_not_full() {
        let rb = RingBuffer::new(8);
        assert!(rb.is_empty());
        assert!(!rb.is_full());
        assert_eq!(rb.used_count(), 0);
        assert_eq!(rb.available_to_write(), 7);
    }

    #[test]
    fn test_fills_to_capacity_minus_one() {
        let mut rb = RingBuffer::new(8);
        for i in 0..7u8 {
            assert!(!rb.is_full(), "spuriously full after {i} bytes");
            rb.write(i).unwrap();
        }
        assert!(rb.is_full());
        assert_eq!(
            rb.write(99u8),
            Err(RingBufferError::Full {
                needed: 1,
                available: 0
            })
        );
        for i in 0..7u8 {
            assert_eq!(rb.read::<u8>().unwrap(), i);
        }
        assert!(rb.is_empty());
    }

    #[test]
    fn test_values_round_trip_across_wrap() {
        let mut rb = RingBuffer::new(16);
        // Advance the cursors so the next values straddle the end.
        for _ in 0..13 {
            rb.write(0u8).unwrap();
            rb.read::<u8>().unwrap();
        }
        rb.write(0xDEAD_BEEFu32).unwrap();
        rb.write(-2.5f64).unwrap();
        assert_eq!(rb.read::<u32>().unwrap(), 0xDEAD_BEEF);
        assert_eq!(rb.read::<f64>().unwrap(), -2.5);
    }

    /// used + available == capacity - 1 after every operation in a mixed
    /// sequence, and bytes come back in write order.
    #[test]
    fn test_largest_value_size_round_trips_across_wrap() {
        assert_eq!(u128::SIZE, MAX_RING_VALUE_SIZE);
        let mut rb = RingBuffer::new(32);
        for _ in 0..3 {
            rb.write(0u64).unwrap();
            rb.read::<u64>().unwrap();
        }

        // Cursor at 24: the 16-byte value wraps around the 32-slot buffer.
        rb.write(u128::MAX - 7).unwrap();
        assert_eq!(rb.used_count(), 16);
        assert_eq!(rb.read::<u128>().unwrap(), u128::MAX - 7);
        rb.write(-3i128).unwrap();
        assert_eq!(rb.read::<i128>().unwrap(), -3);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_counts_invariant_and_order_preserved() {
        let mut rb = RingBuffer::new(32);
        let mut next_write = 0u8;
        let mut next_read = 0u8;
        for round in 0..200usize {
            let writes = (round * 7) % 11;
            for _ in 0..writes {
                if rb.available_to_write() == 0 {
                    break;
                }
                rb.write(next_write).unwrap();
                next_write = next_write.wrapping_add(1);
                assert_eq!(rb.used_count() + rb.available_to_write(), 31);
            }
            let reads = (round * 5) % 9;
            for _ in 0..reads {
                if rb.is_empty() {
                    break;
                }
                assert_eq!(rb.read::<u8>().unwrap(), next_read);
                next_read = next_read.wrapping_add(1);
                assert_eq!(rb.used_count() + rb.available_to_write(), 31);
            }
        }
    }

    #[test]
    fn test_strings_round_trip() {
        let mut rb = RingBuffer::new(64);
        rb.write_string("hello").unwrap();
        rb.write_string("").unwrap();
        rb.write_string("wörld").unwrap();
        assert_eq!(rb.read_string().unwrap(), "hello");
        assert_eq!(rb.read_string().unwrap(), "");
        assert_eq!(rb.read_string().unwrap(), "wörld");
        assert_eq!(rb.read_string(), Err(RingBufferError::Empty));
    }

    #[test]
    fn test_string_with_interior_nul_rejected() {
        let mut rb = RingBuffer::new(64);
        assert_eq!(
            rb.write_string("a\0b"),
            Err(RingBufferError::InteriorNul { position: 1 })
        );
        assert!(rb.is_empty());
    }

    #[test]
    fn test_unterminated_string_not_consumed() {
        let mut rb = RingBuffer::new(16);
        rb.write(b'a').unwrap();
        rb.write(b'b').unwrap();
        assert!(matches!(
            rb.read_string(),
            Err(RingBufferError::Incomplete { .. })
        ));
        assert_eq!(rb.used_count(), 2);
        rb.write(0u8).unwrap();
        assert_eq!(rb.read_string().unwrap(), "ab");
    }

    #[test]
    fn test_read_wider_than_buffered_is_incomplete() {
        let mut rb = RingBuffer::new(16);
        rb.write(1u16).unwrap();
        assert_eq!(
            rb.read::<u64>(),
            Err(RingBufferError::Incomplete { needed: 8, used: 2 })
        );
        assert_eq!(rb.read::<u16>().unwrap(), 1);
    }

    #[test]
    fn test_shared_write_times_out_when_full() {
        let shared = SharedRingBuffer::new(8);
        shared
            .write_record(7, None, |rb| {
                for i in 0..7u8 {
                    rb.write(i)?;
                }
                Ok(())
            })
            .unwrap();
        let result = shared.write_record(1, Some(Duration::from_millis(50)), |rb| rb.write(1u8));
        assert_eq!(result, Err(RingBufferError::Timeout { waited_ms: 50 }));
    }

    #[test]
    fn test_shared_record_larger_than_buffer_rejected() {
        let shared = SharedRingBuffer::new(8);
        let result = shared.write_record(8, None, |_| Ok(()));
        assert_eq!(
            result,
            Err(RingBufferError::RecordTooLarge { size: 8, usable: 7 })
        );
    }

    /// A writer blocked on a full buffer resumes once the reader drains.
    #[test]
    fn test_shared_blocked_writer_wakes_on_read() {
        let shared = Arc::new(SharedRingBuffer::new(8));
        shared
            .write_record(7, None, |rb| {
                for i in 0..7u8 {
                    rb.write(i)?;
                }
                Ok(())
            })
            .unwrap();

        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                shared.write_record(4, Some(Duration::from_secs(5)), |rb| rb.write(42u32))
            })
        };

        thread::sleep(Duration::from_millis(20));
        let drained = shared.drain_records(|rb| rb.read::<u8>());
        assert_eq!(drained, (0..7u8).collect::<Vec<_>>());

        writer.join().unwrap().expect("writer should complete after drain");
        let value = shared
            .read_record(Some(Duration::from_secs(1)), |rb| rb.read::<u32>())
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_shared_read_times_out_when_empty() {
        let shared = SharedRingBuffer::new(8);
        let result = shared.read_record(Some(Duration::from_millis(20)), |rb| rb.read::<u8>());
        assert_eq!(result, Err(RingBufferError::Timeout { waited_ms: 20 }));
    }
}
