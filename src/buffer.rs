//! Bounded byte buffer: a fixed-capacity contiguous FIFO with zero-copy spans.
//!
//! Readable bytes always live at offsets `[0, used)`. Producers get a
//! writable span plus an explicit `commit`; consumers get a readable span
//! plus an explicit `consume`, which compacts the live region back to offset
//! zero. No reallocation ever happens after construction.

/// Fixed-capacity byte FIFO.
///
/// Invariant: `0 <= used() <= capacity()` and `used() + free() == capacity()`
/// at every observable point.
#[derive(Debug, Clone)]
pub struct BoundedBuffer {
    data: Vec<u8>,
    used: usize,
}

impl BoundedBuffer {
    /// Create a buffer with the given fixed capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: vec![0u8; capacity], used: 0 }
    }

    /// Total capacity, fixed at construction.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently readable.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes of free space available to a producer.
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity() - self.used
    }

    /// True iff `used() == 0`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// True iff `free() == 0`.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.used == self.capacity()
    }

    /// Copy `min(src.len(), free())` bytes from `src` into the buffer.
    ///
    /// Returns the number of bytes actually copied. Never reallocates.
    pub fn write_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free());
        let start = self.used;
        self.data[start..start + n].copy_from_slice(&src[..n]);
        self.used += n;
        n
    }

    /// Copy `min(dst.len(), used())` bytes into `dst`, consuming them.
    ///
    /// Returns the number of bytes actually copied.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.used);
        dst[..n].copy_from_slice(&self.data[..n]);
        self.consume(n);
        n
    }

    /// A contiguous writable region of length `min(max, free())` at the
    /// write cursor. Must be paired with exactly one [`Self::commit`] call
    /// (with `k <= span.len()`) before the next producer call.
    pub fn writable_span(&mut self, max: usize) -> &mut [u8] {
        let n = max.min(self.free());
        let start = self.used;
        &mut self.data[start..start + n]
    }

    /// Record that `k` bytes were written into the span returned by the most
    /// recent [`Self::writable_span`] call.
    pub fn commit(&mut self, k: usize) {
        debug_assert!(self.used + k <= self.capacity());
        self.used += k.min(self.free());
    }

    /// A contiguous readable region of length `min(max, used())` at offset
    /// zero. May be consumed in full, in part, or not at all.
    pub fn readable_span(&self, max: usize) -> &[u8] {
        let n = max.min(self.used);
        &self.data[..n]
    }

    /// Drop the first `k` bytes (clamped to `used()`) and compact the
    /// remainder to offset zero. A no-op when `k == 0`.
    pub fn consume(&mut self, k: usize) {
        if k == 0 {
            return;
        }
        let k = k.min(self.used);
        self.data.copy_within(k..self.used, 0);
        self.used -= k;
    }

    /// Discard all buffered bytes without touching capacity.
    pub fn clear(&mut self) {
        self.used = 0;
    }
}
