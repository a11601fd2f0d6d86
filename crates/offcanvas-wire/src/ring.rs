//! Bounded single-producer / single-consumer ring of variable-length frames.
//!
//! Each direction of a duplex link is one ring. Records are length-prefixed
//! and 4-byte aligned; when a record does not fit before the end of the
//! buffer the producer writes an explicit wrap marker (or leaves implicit
//! padding when fewer than 4 bytes remain) and continues at offset 0.
//!
//! Delivery is FIFO with no loss or duplication, which is exactly what the
//! mutation channel needs from its transport.

use core::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::layout::{align_up, RECORD_ALIGN, WRAP_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("ring is full")]
    Full,
    #[error("frame larger than the ring")]
    TooLarge,
}

/// Rejected ring size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ring capacity {0} must be a non-zero multiple of 4 below 4 GiB")]
pub struct CapacityError(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PopError {
    #[error("ring is empty")]
    Empty,
    /// Corruption detected (e.g. a bogus length).
    #[error("ring is corrupt")]
    Corrupt,
}

/// Heap-backed frame ring shared between two threads (one writer, one reader).
pub struct FrameRing {
    cap: u32,
    head: AtomicU32,
    tail: AtomicU32,

    data_ptr: *mut u8,
    _storage: Box<[u8]>,
}

// SAFETY: `head` is only advanced by the reader and `tail` only by the writer;
// each side touches only the bytes the other side has published via
// Release/Acquire on those counters.
unsafe impl Send for FrameRing {}
unsafe impl Sync for FrameRing {}

impl FrameRing {
    /// # Panics
    ///
    /// When `capacity_bytes` is rejected by [`FrameRing::try_new`].
    pub fn new(capacity_bytes: usize) -> Self {
        match Self::try_new(capacity_bytes) {
            Ok(ring) => ring,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_new(capacity_bytes: usize) -> Result<Self, CapacityError> {
        if capacity_bytes == 0
            || capacity_bytes % RECORD_ALIGN != 0
            || capacity_bytes >= u32::MAX as usize
        {
            return Err(CapacityError(capacity_bytes));
        }
        let mut storage = vec![0u8; capacity_bytes].into_boxed_slice();
        let data_ptr = storage.as_mut_ptr();
        Ok(Self {
            cap: capacity_bytes as u32,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            data_ptr,
            _storage: storage,
        })
    }

    pub fn capacity_bytes(&self) -> usize {
        self.cap as usize
    }

    /// Largest payload a single record can carry in an empty ring.
    pub fn max_payload_bytes(&self) -> usize {
        self.cap as usize - 4
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Append one frame. Never blocks.
    ///
    /// Must only be called from the single writer side.
    pub fn try_push(&self, payload: &[u8]) -> Result<(), PushError> {
        let record_size = record_size(payload.len());
        if payload.len() > (u32::MAX as usize).saturating_sub(4) || record_size > self.cap as usize
        {
            return Err(PushError::TooLarge);
        }

        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        let free = self.cap - tail.wrapping_sub(head);

        let tail_index = (tail % self.cap) as usize;
        let remaining = (self.cap as usize) - tail_index;
        let (padding, write_wrap_marker) = if remaining < 4 {
            (remaining, false)
        } else if remaining < record_size {
            (remaining, true)
        } else {
            (0, false)
        };

        if (padding + record_size) as u32 > free {
            return Err(PushError::Full);
        }

        let start_index = if padding == 0 { tail_index } else { 0 };
        // SAFETY: every byte written lies in `[0, cap)` and was freed by the
        // reader (checked against `free` above).
        unsafe {
            if write_wrap_marker {
                write_u32_le(self.data_ptr.add(tail_index), WRAP_MARKER);
            }
            write_u32_le(self.data_ptr.add(start_index), payload.len() as u32);
            core::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.data_ptr.add(start_index + 4),
                payload.len(),
            );
        }

        let new_tail = tail.wrapping_add((padding + record_size) as u32);
        self.tail.store(new_tail, Ordering::Release);
        Ok(())
    }

    /// Remove the oldest frame.
    ///
    /// Must only be called from the single reader side.
    pub fn try_pop(&self) -> Result<Vec<u8>, PopError> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            if head == tail {
                return Err(PopError::Empty);
            }

            let head_index = (head % self.cap) as usize;
            let remaining = (self.cap as usize) - head_index;

            if remaining < 4 {
                // Implicit padding.
                self.head
                    .store(head.wrapping_add(remaining as u32), Ordering::Release);
                continue;
            }

            // SAFETY: `head_index + 4 <= cap` and the writer published this record.
            let len = unsafe { read_u32_le(self.data_ptr.add(head_index)) };
            if len == WRAP_MARKER {
                self.head
                    .store(head.wrapping_add(remaining as u32), Ordering::Release);
                continue;
            }

            let total = record_size(len as usize);
            if total > remaining || tail.wrapping_sub(head) < total as u32 {
                return Err(PopError::Corrupt);
            }

            let mut out = vec![0u8; len as usize];
            // SAFETY: bounds checked against `remaining` above.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    self.data_ptr.add(head_index + 4),
                    out.as_mut_ptr(),
                    out.len(),
                );
            }

            self.head
                .store(head.wrapping_add(total as u32), Ordering::Release);
            return Ok(out);
        }
    }
}

fn read_u32_le(ptr: *const u8) -> u32 {
    let mut tmp = [0u8; 4];
    // SAFETY: callers pass a pointer to at least 4 readable bytes.
    unsafe { core::ptr::copy_nonoverlapping(ptr, tmp.as_mut_ptr(), 4) };
    u32::from_le_bytes(tmp)
}

fn write_u32_le(ptr: *mut u8, v: u32) {
    let bytes = v.to_le_bytes();
    // SAFETY: callers pass a pointer to at least 4 writable bytes.
    unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, 4) };
}

/// Bytes the next record of `payload_len` bytes will consume in the ring.
pub fn record_size(payload_len: usize) -> usize {
    align_up(4 + payload_len, RECORD_ALIGN)
}
