//! # Sieve — Window Bitmaps and Composite Marking
//!
//! One sieve window covers `2^24` candidate positions; bit `b` set means
//! position `b` is composite for at least one tuple offset. Three marking
//! paths feed the master bitmap each iteration:
//!
//! - **Dense** primes (`p < 16384`) are walked inline by the master. Their
//!   six offsets are sorted first so the marking walk ascends through the
//!   bitmap once instead of six interleaved passes.
//! - **Sparse** primes are walked by workers into private bitmaps through
//!   [`PendingRing`], which prefetches each target word while older marks
//!   drain out of the ring. The offsets are advanced in place so the next
//!   window starts correct.
//! - **Once-only** hits recorded in the segment buckets are replayed with
//!   the same ring discipline.
//!
//! The ring exists because the read-modify-write of a bitmap byte depends on
//! a load that usually misses cache; queueing 16 addresses ahead hides that
//! latency behind address computation. On targets without a prefetch hint it
//! degrades to plain deferred marking.

use crate::offsets::OffsetArena;
use crate::primes::PrimeTable;
use crate::{PENDING_SIZE, SIEVE_SIZE, SIEVE_WORDS};

/// One sieve window as packed 64-bit words. Bit `b` of the window is bit
/// `b % 64` of word `b / 64`.
pub struct SieveBits {
    words: Box<[u64]>,
}

impl SieveBits {
    pub fn new() -> Self {
        SieveBits {
            words: vec![0u64; SIEVE_WORDS].into_boxed_slice(),
        }
    }

    pub fn zero(&mut self) {
        self.words.fill(0);
    }

    #[inline]
    pub fn mark(&mut self, position: u32) {
        debug_assert!(position < SIEVE_SIZE);
        self.words[(position >> 6) as usize] |= 1u64 << (position & 63);
    }

    #[inline]
    pub fn is_marked(&self, position: u32) -> bool {
        self.words[(position >> 6) as usize] >> (position & 63) & 1 == 1
    }

    /// Word-wise OR of another window into this one.
    pub fn or_from(&mut self, other: &SieveBits) {
        for (word, &merge) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= merge;
        }
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Number of marked positions (test support).
    pub fn count_marked(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Default for SieveBits {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn prefetch(words: &[u64], position: u32) {
    #[cfg(target_arch = "x86_64")]
    // Safety: the pointer stays inside `words` (position < SIEVE_SIZE) and
    // prefetch has no architectural effect beyond the cache.
    unsafe {
        use core::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch(
            words.as_ptr().add((position >> 6) as usize) as *const i8,
            _MM_HINT_T0,
        );
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = (words, position);
}

/// Empty-slot sentinel; `u32::MAX` can never be a window position, so a
/// genuine hit at position 0 survives the ring.
const PENDING_EMPTY: u32 = u32::MAX;

/// Deferred-marking ring: each push prefetches the new position's word and
/// commits the mark evicted from the oldest slot.
pub struct PendingRing {
    slots: [u32; PENDING_SIZE],
    cursor: usize,
}

impl PendingRing {
    pub fn new() -> Self {
        PendingRing {
            slots: [PENDING_EMPTY; PENDING_SIZE],
            cursor: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, bits: &mut SieveBits, position: u32) {
        prefetch(bits.words(), position);
        let evicted = self.slots[self.cursor];
        if evicted != PENDING_EMPTY {
            assert!(evicted < SIEVE_SIZE, "sieve position {} out of range", evicted);
            bits.mark(evicted);
        }
        self.slots[self.cursor] = position;
        self.cursor = (self.cursor + 1) & (PENDING_SIZE - 1);
    }

    /// Commit every still-queued mark. Must be called before the bitmap is
    /// read or handed back.
    pub fn flush(&mut self, bits: &mut SieveBits) {
        for slot in &mut self.slots {
            if *slot != PENDING_EMPTY {
                assert!(*slot < SIEVE_SIZE, "sieve position {} out of range", *slot);
                bits.mark(*slot);
                *slot = PENDING_EMPTY;
            }
        }
    }
}

impl Default for PendingRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Mark all hits of the sparse primes `[start, end)` (absolute table
/// indices) in this window, advancing each offset into the next window.
///
/// This is the body of a SIEVE job: the bitmap is worker-private, the arena
/// ranges of concurrent jobs are disjoint.
pub fn sieve_sparse(
    table: &PrimeTable,
    arena: &OffsetArena,
    bits: &mut SieveBits,
    start: usize,
    end: usize,
) {
    let mut ring = PendingRing::new();
    for i in start..end {
        let p = table.prime(i);
        let mut offsets = arena.load(i);
        for offset in &mut offsets {
            let mut position = *offset;
            while position < SIEVE_SIZE {
                ring.push(bits, position);
                position += p;
            }
            *offset = position - SIEVE_SIZE;
        }
        arena.store(i, offsets);
    }
    ring.flush(bits);
}

/// Mark all hits of the dense primes `[start, end)` in this window. Runs
/// inline on the master; offsets are sorted so the walk streams through the
/// bitmap in ascending order.
pub fn sieve_dense(
    table: &PrimeTable,
    arena: &OffsetArena,
    bits: &mut SieveBits,
    start: usize,
    end: usize,
) {
    for i in start..end {
        let p = table.prime(i);
        let mut offsets = arena.load(i);
        offsets.sort_unstable();
        for offset in &mut offsets {
            let mut position = *offset;
            while position < SIEVE_SIZE {
                bits.mark(position);
                position += p;
            }
            *offset = position - SIEVE_SIZE;
        }
        arena.store(i, offsets);
    }
}

/// Replay the once-only hits recorded for the current window.
pub fn merge_segment_hits(bits: &mut SieveBits, hits: &[u32]) {
    let mut ring = PendingRing::new();
    for &position in hits {
        ring.push(bits, position);
    }
    ring.flush(bits);
}
