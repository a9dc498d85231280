//! Channel pool: chunked slab allocator with stable slot addresses.
//!
//! Mirrors the teacher's slab/chunk shape from `net.rs`'s connection pool,
//! generalized to the fixed-size-chunk, stable-pointer design spec §4.5
//! calls for: channel slots never move once allocated, so the reactor can
//! hold a raw reference across an `acquire`/`release` pair without an
//! indirection per event.

use crate::channel::Channel;
use crate::invariant;
use crate::protocol::Protocol;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

struct Chunk<P: Protocol> {
    slots: Vec<Channel<P>>,
    free: Vec<usize>,
}

impl<P: Protocol + Default> Chunk<P> {
    fn new(size: usize, rx_capacity: usize, tx_capacity: usize) -> Self {
        let slots = (0..size).map(|_| Channel::new(rx_capacity, tx_capacity)).collect();
        let free = (0..size).rev().collect();
        Self { slots, free }
    }

    fn is_full(&self) -> bool {
        self.free.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Handle {
    chunk: usize,
    slot: usize,
}

/// Slab-chunked pool of [`Channel`] slots, indexed by socket descriptor.
pub struct ChannelPool<P: Protocol> {
    chunks: Vec<Chunk<P>>,
    non_full: Vec<usize>,
    active: HashMap<RawFd, Handle>,
    chunk_size: usize,
    rx_capacity: usize,
    tx_capacity: usize,
}

impl<P: Protocol + Default> ChannelPool<P> {
    /// Build an empty pool. Chunks are allocated lazily, on first `acquire`.
    pub fn new(chunk_size: usize, rx_capacity: usize, tx_capacity: usize) -> Self {
        invariant!(chunk_size > 0, "pool chunk size must be positive");
        Self {
            chunks: Vec::new(),
            non_full: Vec::new(),
            active: HashMap::new(),
            chunk_size,
            rx_capacity,
            tx_capacity,
        }
    }

    /// Number of live (acquired, not yet released) channels.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// True iff no channel is currently acquired.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Allocate a slot for `fd` and return a mutable reference to it.
    ///
    /// Selects a non-full chunk (allocating a fresh one if none exists),
    /// pops a free slot index, and records `fd -> (chunk, slot)`. A
    /// duplicate `fd` is a programming error (spec §4.5), not a `Result`.
    pub fn acquire(&mut self, fd: RawFd) -> &mut Channel<P> {
        invariant!(!self.active.contains_key(&fd), "duplicate fd {fd} acquired from channel pool");

        let chunk_index = match self.non_full.last().copied() {
            Some(idx) => idx,
            None => {
                self.chunks.push(Chunk::new(self.chunk_size, self.rx_capacity, self.tx_capacity));
                let idx = self.chunks.len() - 1;
                self.non_full.push(idx);
                idx
            }
        };

        let chunk = &mut self.chunks[chunk_index];
        let slot = chunk.free.pop().expect("chunk on non_full list must have a free slot");
        if chunk.is_full() {
            self.non_full.retain(|&c| c != chunk_index);
        }

        self.active.insert(fd, Handle { chunk: chunk_index, slot });
        &mut self.chunks[chunk_index].slots[slot]
    }

    /// Return `fd`'s slot to its chunk's free stack and drop the mapping.
    /// An unknown `fd` is a programming error.
    pub fn release(&mut self, fd: RawFd) {
        let handle = match self.active.remove(&fd) {
            Some(h) => h,
            None => invariant::violation(&format!("release of unknown fd {fd} from channel pool")),
        };

        let chunk = &mut self.chunks[handle.chunk];
        let was_full = chunk.is_full();
        chunk.free.push(handle.slot);
        if was_full {
            self.non_full.push(handle.chunk);
        }
    }

    /// O(1) average lookup of `fd`'s channel, if currently acquired.
    pub fn lookup(&mut self, fd: RawFd) -> Option<&mut Channel<P>> {
        let handle = *self.active.get(&fd)?;
        Some(&mut self.chunks[handle.chunk].slots[handle.slot])
    }

    /// Visit every live channel once. `visitor` must not acquire or release
    /// slots (spec §4.5): collect fds to act on and call back afterward.
    pub fn for_each(&mut self, mut visitor: impl FnMut(RawFd, &mut Channel<P>)) {
        for (&fd, handle) in self.active.iter() {
            visitor(fd, &mut self.chunks[handle.chunk].slots[handle.slot]);
        }
    }
}

impl<P: Protocol> Drop for ChannelPool<P> {
    fn drop(&mut self) {
        invariant!(self.active.is_empty(), "channel pool dropped with {} active channel(s)", self.active.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Echo;

    fn pool() -> ChannelPool<Echo> {
        ChannelPool::new(2, 64, 64)
    }

    #[test]
    fn acquire_then_lookup_returns_same_slot() {
        let mut pool = pool();
        let ptr = pool.acquire(10) as *mut Channel<Echo>;
        let looked_up = pool.lookup(10).unwrap() as *mut Channel<Echo>;
        assert_eq!(ptr, looked_up);
        pool.release(10);
    }

    #[test]
    fn release_then_reacquire_reuses_a_freed_slot() {
        let mut pool = pool();
        pool.acquire(1);
        pool.acquire(2);
        pool.release(1);
        // chunk size is 2, so a third distinct fd must reuse the freed slot
        // rather than forcing allocation of a second chunk's worth of state
        // beyond what's needed.
        pool.acquire(3);
        assert!(pool.lookup(3).is_some());
        pool.release(2);
        pool.release(3);
    }

    #[test]
    fn pool_spans_multiple_chunks_once_one_fills() {
        let mut pool = pool(); // chunk_size == 2
        pool.acquire(1);
        pool.acquire(2);
        pool.acquire(3); // forces a second chunk
        assert_eq!(pool.len(), 3);
        pool.release(1);
        pool.release(2);
        pool.release(3);
    }

    #[test]
    fn stability_across_acquire_release_of_other_fds() {
        let mut pool = pool();
        let first = pool.acquire(100) as *mut Channel<Echo>;
        pool.acquire(200);
        pool.release(200);
        pool.acquire(300);
        let first_again = pool.lookup(100).unwrap() as *mut Channel<Echo>;
        assert_eq!(first, first_again);
        pool.release(100);
        pool.release(300);
    }

    // Duplicate-acquire and unknown-fd-release are fatal invariant
    // violations (`invariant::violation` logs and calls `process::abort`),
    // not panics, so they are deliberately not exercised here: aborting the
    // test binary would take down unrelated tests running in the same
    // process rather than reporting a single failure.

    #[test]
    fn empty_pool_drops_cleanly() {
        let pool = pool();
        drop(pool);
    }
}
