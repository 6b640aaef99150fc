//! # Hexad — Prime Sextuplet Proof-of-Work Engine
//!
//! Searches for prime sextuplets above a 256-bit target derived from a block
//! header: integers `n ≥ T` such that `{n, n+4, n+6, n+10, n+12, n+16}` are
//! all prime. The distance `n − T` is the proof submitted as a share; when at
//! least `tuples` of the six members pass the primality chain the candidate
//! still qualifies (pooled mining accepts partial tuples).
//!
//! ## Pipeline
//!
//! All searching follows **seed → sieve → scan → verify**, coordinated by a
//! single master thread and a fixed pool of verifier workers:
//!
//! 1. **Seed** ([`offsets::seed_range`]) — per-prime modular residues place
//!    the first composite hit of each tuple offset inside the search window.
//! 2. **Sieve** ([`sieve`]) — dense primes are marked inline by the master,
//!    sparse primes by workers into private bitmaps that are OR-merged, and
//!    once-only primes are replayed from precomputed segment buckets.
//! 3. **Scan** — zero bits of the merged bitmap are candidate positions,
//!    batched into verification jobs.
//! 4. **Verify** ([`verify`]) — a Fermat base-2 chain walks the tuple and
//!    submits qualifying shares through the [`miner::MiningClient`] seam.
//!
//! ## Module Organization
//!
//! **Engine modules**:
//! - [`primes`] — prime table, primorial, modular inverse precomputation
//! - [`block`] — block work items, target and remainder derivation
//! - [`offsets`] — offset arena, once-only segment buckets, seeding
//! - [`sieve`] — window bitmaps, prefetch ring, dense/sparse marking
//! - [`verify`] — Fermat chain, share payload encoding
//!
//! **Infrastructure modules**:
//! - [`miner`] — master/worker orchestration and preemption
//! - [`queue`] — bounded MPMC job queues
//! - [`config`] — engine parameters and TOML loading
//! - [`stats`] — atomic counters and the background reporter

pub mod block;
pub mod config;
pub mod miner;
pub mod offsets;
pub mod primes;
pub mod queue;
pub mod sieve;
pub mod stats;
pub mod verify;

pub use block::Block;
pub use config::MinerConfig;
pub use miner::{Miner, MiningClient};
pub use primes::{InitError, PrimeTable};
pub use stats::Stats;

/// log2 of the sieve window size.
pub const SIEVE_BITS: u32 = 24;

/// Bit positions per sieve window; each position is one multiple of the
/// primorial above `T + R`.
pub const SIEVE_SIZE: u32 = 1 << SIEVE_BITS;

/// 64-bit words per window bitmap.
pub const SIEVE_WORDS: usize = (SIEVE_SIZE as usize) / 64;

/// Total positions searched per block across all windows.
pub const MAX_INCREMENTS: u64 = 1 << 29;

/// Sieve windows per block.
pub const MAX_ITERATIONS: usize = (MAX_INCREMENTS / SIEVE_SIZE as u64) as usize;

/// Primes below this strike a window often enough that the master sieves
/// them inline; everything up to [`MAX_INCREMENTS`] goes to workers.
pub const DENSE_LIMIT: u32 = 16384;

/// Residue of `T + R` modulo the primorial. 16057 starts a prime sextuplet,
/// so every candidate `T + R + k·P` keeps all six tuple members coprime to
/// the primorial primes.
pub const PRIMORIAL_OFFSET: u32 = 16057;

/// Members of the tuple pattern.
pub const TUPLE_LEN: usize = 6;

/// First differences of the sextuplet pattern {0, 4, 6, 10, 12, 16}.
pub const PRIME_TUPLE_OFFSET: [u32; TUPLE_LEN] = [0, 4, 2, 4, 2, 4];

/// Zero bits inserted above the header hash when constructing the target.
pub const ZEROES_BEFORE_HASH: u32 = 8;

/// Candidate indexes batched into one verification job.
pub const WORK_INDEXES: usize = 64;

/// Slots in the sieve-marking prefetch ring (must stay a power of two).
pub const PENDING_SIZE: usize = 16;

/// Once-only hits batched per worker before taking the bucket lock.
pub const OFFSET_STACK_SIZE: usize = 16384;

/// Cumulative tuple offsets: the six shifts {0, 4, 6, 10, 12, 16} added to a
/// candidate base to reach each tuple member.
pub const fn tuple_offset_sums() -> [u32; TUPLE_LEN] {
    let mut sums = [0u32; TUPLE_LEN];
    let mut acc = 0u32;
    let mut f = 0;
    while f < TUPLE_LEN {
        acc += PRIME_TUPLE_OFFSET[f];
        sums[f] = acc;
        f += 1;
    }
    sums
}
