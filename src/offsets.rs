//! # Offsets — Hit-Position Arena, Once-Only Buckets, and Seeding
//!
//! Per-block mutable state that positions every prime's next composite hit:
//!
//! - [`OffsetArena`] — for each prime below `2^29`, the six window positions
//!   where it next strikes the tuple offsets. Seeded concurrently by
//!   disjoint index ranges during the MOD phase and advanced in place by
//!   sieve jobs.
//! - [`SegmentBuckets`] — once-only primes strike each tuple offset at most
//!   once per block, so their hits are deposited up front into one bucket
//!   per sieve window and replayed when that window is merged.
//! - [`OffsetStack`] — a per-worker batch of pending bucket deposits;
//!   amortizes the bucket lock to one acquisition per 16384 hits.
//!
//! Arena slots are relaxed atomics: every job touches a disjoint index
//! range, so there is nothing to order — the queue handoffs between phases
//! provide the visibility barrier. Workers copy a slot's six offsets to
//! locals, walk them, and store once, keeping the marking loop free of
//! per-step synchronization.

use std::array;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use rug::Integer;

use crate::primes::PrimeTable;
use crate::{
    MAX_INCREMENTS, MAX_ITERATIONS, OFFSET_STACK_SIZE, PRIME_TUPLE_OFFSET, SIEVE_BITS, SIEVE_SIZE,
    TUPLE_LEN,
};

/// The six next-hit positions of one prime.
pub type TupleOffsets = [u32; TUPLE_LEN];

/// Next-hit positions for every prime below `2^29`, indexed by absolute
/// prime-table position.
pub struct OffsetArena {
    slots: Box<[[AtomicU32; TUPLE_LEN]]>,
}

impl OffsetArena {
    pub fn new(len: usize) -> Self {
        OffsetArena {
            slots: (0..len)
                .map(|_| array::from_fn(|_| AtomicU32::new(0)))
                .collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn load(&self, index: usize) -> TupleOffsets {
        array::from_fn(|f| self.slots[index][f].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, index: usize, offsets: TupleOffsets) {
        for (slot, offset) in self.slots[index].iter().zip(offsets) {
            slot.store(offset, Ordering::Relaxed);
        }
    }
}

struct Segments {
    /// One flat hit array per sieve window.
    hits: Vec<Box<[u32]>>,
    counts: Vec<u32>,
}

/// Once-only hit store: one bucket per sieve window, all behind a single
/// mutex. Deposits arrive in large batches (see [`OffsetStack`]), so the
/// lock is cold.
pub struct SegmentBuckets {
    inner: Mutex<Segments>,
    entries_per_segment: usize,
}

impl SegmentBuckets {
    pub fn new(entries_per_segment: usize) -> Self {
        SegmentBuckets {
            inner: Mutex::new(Segments {
                hits: (0..MAX_ITERATIONS)
                    .map(|_| vec![0u32; entries_per_segment].into_boxed_slice())
                    .collect(),
                counts: vec![0u32; MAX_ITERATIONS],
            }),
            entries_per_segment,
        }
    }

    /// Forget all hits; called once per block before reseeding.
    pub fn reset(&self) {
        let mut segments = self.inner.lock().unwrap();
        segments.counts.fill(0);
    }

    /// Deposit a batch of absolute positions (`< 2^29`). Each position is
    /// split into its window and intra-window offset.
    ///
    /// # Panics
    ///
    /// Overflowing a segment means the capacity estimate was violated —
    /// state is corrupt and the engine must not continue.
    pub fn deposit(&self, batch: &[u32]) {
        let mut segments = self.inner.lock().unwrap();
        for &index in batch {
            let segment = (index >> SIEVE_BITS) as usize;
            let fill = segments.counts[segment] as usize;
            if fill >= self.entries_per_segment {
                panic!(
                    "segment bucket overflow: segment {} already holds {} entries (cap {}) while depositing index {}",
                    segment, fill, self.entries_per_segment, index
                );
            }
            segments.hits[segment][fill] = index & (SIEVE_SIZE - 1);
            segments.counts[segment] = fill as u32 + 1;
        }
    }

    /// Run `f` over the hits recorded for one window.
    pub fn with_segment<R>(&self, segment: usize, f: impl FnOnce(&[u32]) -> R) -> R {
        let segments = self.inner.lock().unwrap();
        let fill = segments.counts[segment] as usize;
        f(&segments.hits[segment][..fill])
    }

    /// Current fill of one segment.
    pub fn fill(&self, segment: usize) -> usize {
        self.inner.lock().unwrap().counts[segment] as usize
    }

    /// Total hits across all segments.
    pub fn total_fill(&self) -> usize {
        let segments = self.inner.lock().unwrap();
        segments.counts.iter().map(|&c| c as usize).sum()
    }
}

/// Per-worker deposit batch for once-only hits.
pub struct OffsetStack {
    entries: Vec<u32>,
}

impl OffsetStack {
    pub fn new() -> Self {
        OffsetStack {
            entries: Vec::with_capacity(OFFSET_STACK_SIZE),
        }
    }

    #[inline]
    pub fn push(&mut self, index: u32, buckets: &SegmentBuckets) {
        self.entries.push(index);
        if self.entries.len() >= OFFSET_STACK_SIZE {
            self.flush(buckets);
        }
    }

    pub fn flush(&mut self, buckets: &SegmentBuckets) {
        if !self.entries.is_empty() {
            buckets.deposit(&self.entries);
            self.entries.clear();
        }
    }
}

impl Default for OffsetStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Seed next-hit positions for the prime-table index range `[start, end)`
/// against the search base `T + R` (the MOD job).
///
/// For each prime `p` and tuple offset `f` this finds the smallest `x < p`
/// with `p | base + P·x + cum_f`: the residue `rem = (base + cum_f) mod p`
/// is cancelled by `x = (p − rem)·P⁻¹ mod p`. Primes below `2^29` store the
/// six positions in the arena; once-only primes deposit in-range hits into
/// the segment buckets via the worker's stack.
pub fn seed_range(
    table: &PrimeTable,
    arena: &OffsetArena,
    buckets: &SegmentBuckets,
    stack: &mut OffsetStack,
    base: &Integer,
    start: usize,
    end: usize,
) {
    for i in start..end {
        let p = table.prime(i) as u64;
        let mut rem = base.mod_u(table.prime(i)) as u64;
        let invert = table.invert(i) as u64;
        let once_only = p >= MAX_INCREMENTS;
        let mut tuple = [0u32; TUPLE_LEN];
        for (f, &step) in PRIME_TUPLE_OFFSET.iter().enumerate() {
            rem += step as u64;
            if rem >= p {
                rem -= p;
            }
            let index = ((p - rem) * invert) % p;
            if once_only {
                if index < MAX_INCREMENTS {
                    stack.push(index as u32, buckets);
                }
            } else {
                tuple[f] = index as u32;
            }
        }
        if !once_only {
            arena.store(i, tuple);
        }
    }
    stack.flush(buckets);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primes::synthetic_table;
    use crate::tuple_offset_sums;

    fn search_base(table: &PrimeTable) -> Integer {
        // An arbitrary wide target in the primorial residue class.
        let target = Integer::from(0x1234_5678_9abc_def0u64) << 200;
        let remainder = crate::block::remainder_for_target(&target, table.primorial());
        target + remainder
    }

    #[test]
    fn arena_roundtrip() {
        let arena = OffsetArena::new(8);
        arena.store(3, [1, 2, 3, 4, 5, 6]);
        assert_eq!(arena.load(3), [1, 2, 3, 4, 5, 6]);
        assert_eq!(arena.load(0), [0; TUPLE_LEN]);
    }

    /// Invariant: after seeding, `offsets[i][f] < p` and
    /// `p | base + P·offsets[i][f] + cum_f` for every prime below `2^29`.
    #[test]
    fn seeded_offsets_cancel_the_residue() {
        let table = synthetic_table();
        let arena = OffsetArena::new(table.arena_len());
        let buckets = SegmentBuckets::new(table.entries_per_segment());
        let mut stack = OffsetStack::new();
        let base = search_base(&table);

        seed_range(
            &table,
            &arena,
            &buckets,
            &mut stack,
            &base,
            table.primorial_number(),
            table.len(),
        );

        let sums = tuple_offset_sums();
        for i in table.first_dense()..table.first_once_only() {
            let p = table.prime(i);
            let offsets = arena.load(i);
            for (f, &cum) in sums.iter().enumerate() {
                assert!(offsets[f] < p, "offset {} >= prime {}", offsets[f], p);
                let member =
                    Integer::from(table.primorial() * offsets[f]) + &base + cum;
                assert!(
                    member.is_divisible_u(p),
                    "prime {} does not divide base + P·{} + {}",
                    p,
                    offsets[f],
                    cum
                );
            }
        }
    }

    /// Every bucket deposit of the once-only prime corresponds to a real
    /// divisibility hit, and every in-range hit was deposited.
    #[test]
    fn once_only_hits_land_in_buckets() {
        let table = synthetic_table();
        let arena = OffsetArena::new(table.arena_len());
        let buckets = SegmentBuckets::new(table.entries_per_segment());
        let mut stack = OffsetStack::new();
        let base = search_base(&table);

        seed_range(
            &table,
            &arena,
            &buckets,
            &mut stack,
            &base,
            table.primorial_number(),
            table.len(),
        );

        // Recompute the six expected absolute positions for M31 by brute
        // modular arithmetic.
        let once_index = table.first_once_only();
        let p = table.prime(once_index);
        let mut expected = Vec::new();
        for cum in tuple_offset_sums() {
            let rem = Integer::from(&base + cum).mod_u(p) as u64;
            let x = ((p as u64 - rem) % p as u64) * table.invert(once_index) as u64 % p as u64;
            if x < MAX_INCREMENTS {
                expected.push(x as u32);
            }
        }
        expected.sort_unstable();

        let mut deposited = Vec::new();
        for segment in 0..MAX_ITERATIONS {
            buckets.with_segment(segment, |hits| {
                for &local in hits {
                    deposited.push(segment as u32 * SIEVE_SIZE + local);
                }
            });
        }
        deposited.sort_unstable();
        assert_eq!(deposited, expected);
    }

    /// Reseeding with the same base is bit-identical.
    #[test]
    fn reseeding_is_idempotent() {
        let table = synthetic_table();
        let arena = OffsetArena::new(table.arena_len());
        let buckets = SegmentBuckets::new(table.entries_per_segment());
        let mut stack = OffsetStack::new();
        let base = search_base(&table);

        let run = |arena: &OffsetArena, buckets: &SegmentBuckets, stack: &mut OffsetStack| {
            buckets.reset();
            seed_range(
                &table,
                arena,
                buckets,
                stack,
                &base,
                table.primorial_number(),
                table.len(),
            );
        };

        run(&arena, &buckets, &mut stack);
        let first: Vec<TupleOffsets> = (0..table.first_once_only())
            .map(|i| arena.load(i))
            .collect();
        let first_fill = buckets.total_fill();

        run(&arena, &buckets, &mut stack);
        let second: Vec<TupleOffsets> = (0..table.first_once_only())
            .map(|i| arena.load(i))
            .collect();

        assert_eq!(first, second);
        assert_eq!(buckets.total_fill(), first_fill);
    }

    #[test]
    fn deposit_splits_window_and_local_position() {
        let buckets = SegmentBuckets::new(8);
        buckets.deposit(&[5, SIEVE_SIZE + 7, 3 * SIEVE_SIZE]);
        assert_eq!(buckets.fill(0), 1);
        assert_eq!(buckets.fill(1), 1);
        assert_eq!(buckets.fill(3), 1);
        buckets.with_segment(1, |hits| assert_eq!(hits, &[7]));
        buckets.with_segment(3, |hits| assert_eq!(hits, &[0]));
    }

    #[test]
    fn reset_forgets_hits() {
        let buckets = SegmentBuckets::new(4);
        buckets.deposit(&[1, 2, 3]);
        assert_eq!(buckets.total_fill(), 3);
        buckets.reset();
        assert_eq!(buckets.total_fill(), 0);
    }

    /// Saturating a segment beyond its capacity estimate is a fatal
    /// invariant violation with a diagnostic naming the segment.
    #[test]
    #[should_panic(expected = "segment bucket overflow: segment 0")]
    fn bucket_overflow_aborts() {
        let buckets = SegmentBuckets::new(2);
        buckets.deposit(&[1, 2, 3]);
    }

    #[test]
    fn stack_flushes_when_full() {
        let buckets = SegmentBuckets::new(OFFSET_STACK_SIZE + 16);
        let mut stack = OffsetStack::new();
        for i in 0..OFFSET_STACK_SIZE as u32 {
            stack.push(i % SIEVE_SIZE, &buckets);
        }
        // The stack auto-flushed at capacity without an explicit flush call.
        assert_eq!(buckets.total_fill(), OFFSET_STACK_SIZE);
    }
}
