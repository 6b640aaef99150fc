//! # Primes — Prime Table, Primorial, and Inverse Precomputation
//!
//! Process-global number-theoretic state built once at startup:
//!
//! 1. **Prime table** — every prime below `sieve_max`, generated by a
//!    byte-packed sieve of Eratosthenes.
//! 2. **Primorial** — the product `P = p₀·p₁·…·p_{m−1}` of the first `m`
//!    primes. Candidates are searched in a residue class mod `P`, which
//!    removes the smallest (densest) primes from sieving entirely.
//! 3. **Inverse table** — `P⁻¹ mod pᵢ` for every prime after the primorial,
//!    used to translate a residue of the search base into the window
//!    position of that prime's first tuple hit.
//!
//! The post-primorial suffix of the table is partitioned by strike rate:
//! **dense** primes (`p < 16384`) hit a window thousands of times and are
//! sieved inline by the master; **sparse** primes (up to `2^29`) hit a few
//! times and go to workers; **once-only** primes hit each tuple offset at
//! most once across the whole block and are precomputed into per-window
//! segment buckets instead of being revisited every window.

use std::fmt;
use std::time::Instant;

use rayon::prelude::*;
use rug::Integer;
use tracing::info;

use crate::{DENSE_LIMIT, MAX_INCREMENTS, MAX_ITERATIONS, TUPLE_LEN};

/// Fatal initialization failures. Every variant implies the engine cannot
/// run with the given parameters; there is nothing to retry.
#[derive(Debug)]
pub enum InitError {
    /// `sieve_max` does not fit the 32-bit prime table.
    SieveLimitTooLarge { sieve_max: u64 },
    /// Fewer primes below `sieve_max` than the primorial needs.
    TableTooSmall { needed: usize, got: usize },
    /// A primorial of zero primes was requested.
    EmptyPrimorial,
    /// No modular inverse of the primorial exists for this prime. Cannot
    /// happen for primes outside the primorial; seeing it means the table
    /// is corrupt.
    NoInverse { prime: u32 },
    /// The OS refused to start a verifier thread.
    WorkerSpawn(std::io::Error),
    /// Fewer than two threads configured (one master plus at least one
    /// verifier is required).
    NotEnoughThreads { got: u16 },
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::SieveLimitTooLarge { sieve_max } => {
                write!(f, "sieve_max {} exceeds the 32-bit prime table", sieve_max)
            }
            InitError::TableTooSmall { needed, got } => write!(
                f,
                "prime table has {} primes but the primorial needs {}",
                got, needed
            ),
            InitError::EmptyPrimorial => write!(f, "primorial_number must be at least 1"),
            InitError::NoInverse { prime } => {
                write!(f, "no inverse of the primorial modulo {}", prime)
            }
            InitError::WorkerSpawn(err) => write!(f, "failed to spawn verifier thread: {}", err),
            InitError::NotEnoughThreads { got } => write!(
                f,
                "{} threads configured but at least 2 are required (master + verifier)",
                got
            ),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::WorkerSpawn(err) => Some(err),
            _ => None,
        }
    }
}

/// Immutable prime table shared by the master and all workers.
pub struct PrimeTable {
    primes: Vec<u32>,
    /// `P⁻¹ mod primes[i]` for `i >= primorial_number`; earlier entries are
    /// zero and never read (those primes divide `P`).
    inverts: Vec<u32>,
    primorial: Integer,
    primorial_number: usize,
    n_dense: usize,
    n_sparse: usize,
    /// Primes below `MAX_INCREMENTS`, not counting the first five — the
    /// historical sizing term for the offset arena.
    store_offsets_len: usize,
    entries_per_segment: usize,
}

impl PrimeTable {
    /// Generate all primes below `sieve_max` and derive the primorial,
    /// inverse table, and partition counts.
    pub fn build(sieve_max: u64, primorial_number: usize) -> Result<Self, InitError> {
        if sieve_max > u32::MAX as u64 + 1 {
            return Err(InitError::SieveLimitTooLarge { sieve_max });
        }
        let limit = sieve_max as usize;
        let started = Instant::now();

        let mut composite = vec![0u8; limit / 8 + 1];
        let mut factor = 2usize;
        while factor * factor < limit {
            if composite[factor >> 3] & (1 << (factor & 7)) == 0 {
                let mut multiple = factor * factor;
                while multiple < limit {
                    composite[multiple >> 3] |= 1 << (multiple & 7);
                    multiple += factor;
                }
            }
            factor += 1;
        }

        let mut primes = Vec::with_capacity(estimate_prime_count(limit));
        for n in 2..limit {
            if composite[n >> 3] & (1 << (n & 7)) == 0 {
                primes.push(n as u32);
            }
        }
        drop(composite);
        info!(
            primes = primes.len(),
            sieve_max,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "prime table generated"
        );

        Self::from_primes(primes, primorial_number)
    }

    /// Derive primorial, inverses, and partitions from an explicit prime
    /// list. Split out of [`PrimeTable::build`] so tests can construct
    /// synthetic tables (e.g. with once-only primes) without sieving to
    /// 2^29.
    pub(crate) fn from_primes(
        primes: Vec<u32>,
        primorial_number: usize,
    ) -> Result<Self, InitError> {
        if primorial_number == 0 {
            return Err(InitError::EmptyPrimorial);
        }
        if primes.len() < primorial_number {
            return Err(InitError::TableTooSmall {
                needed: primorial_number,
                got: primes.len(),
            });
        }

        let mut primorial = Integer::from(primes[0]);
        for &p in &primes[1..primorial_number] {
            primorial *= p;
        }

        let mut inverts = vec![0u32; primes.len()];
        let tail: Result<Vec<u32>, InitError> = primes[primorial_number..]
            .par_iter()
            .map(|&p| {
                let modulus = Integer::from(p);
                match primorial.invert_ref(&modulus) {
                    Some(inverse) => Ok(Integer::from(inverse).to_u32().unwrap_or(0)),
                    None => Err(InitError::NoInverse { prime: p }),
                }
            })
            .collect();
        inverts[primorial_number..].copy_from_slice(&tail?);

        let mut n_dense = 0;
        let mut n_sparse = 0;
        for &p in &primes[primorial_number..] {
            if p < DENSE_LIMIT {
                n_dense += 1;
            } else if (p as u64) < MAX_INCREMENTS {
                n_sparse += 1;
            }
        }

        let store_offsets_len = primes
            .iter()
            .skip(5)
            .filter(|&&p| (p as u64) < MAX_INCREMENTS)
            .count();

        // Expected once-only hits: each prime p >= 2^29 strikes each of the
        // six offsets with probability max_increments/p.
        let mut high_floats = 0f64;
        for &p in &primes {
            if p as u64 >= MAX_INCREMENTS {
                high_floats += TUPLE_LEN as f64 * MAX_INCREMENTS as f64 / p as f64;
            }
        }
        let high_segment_entries = high_floats.ceil() as u64;
        let entries_per_segment = if high_segment_entries == 0 {
            1
        } else {
            let per_segment = high_segment_entries as usize / MAX_ITERATIONS + 4;
            per_segment + (per_segment >> 3)
        };

        Ok(PrimeTable {
            primes,
            inverts,
            primorial,
            primorial_number,
            n_dense,
            n_sparse,
            store_offsets_len,
            entries_per_segment,
        })
    }

    /// Number of primes in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.primes.len()
    }

    /// Returns true when the table holds no primes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    #[inline]
    pub fn prime(&self, index: usize) -> u32 {
        self.primes[index]
    }

    /// `P⁻¹ mod prime(index)`. Only meaningful for `index >=
    /// primorial_number()`.
    #[inline]
    pub fn invert(&self, index: usize) -> u32 {
        self.inverts[index]
    }

    #[inline]
    pub fn primorial(&self) -> &Integer {
        &self.primorial
    }

    #[inline]
    pub fn primorial_number(&self) -> usize {
        self.primorial_number
    }

    #[inline]
    pub fn n_dense(&self) -> usize {
        self.n_dense
    }

    #[inline]
    pub fn n_sparse(&self) -> usize {
        self.n_sparse
    }

    /// First index of the dense partition.
    #[inline]
    pub fn first_dense(&self) -> usize {
        self.primorial_number
    }

    /// First index of the sparse partition.
    #[inline]
    pub fn first_sparse(&self) -> usize {
        self.primorial_number + self.n_dense
    }

    /// First index of the once-only partition (one past the sparse range).
    #[inline]
    pub fn first_once_only(&self) -> usize {
        self.primorial_number + self.n_dense + self.n_sparse
    }

    /// Bucket capacity per sieve window for once-only hits.
    #[inline]
    pub fn entries_per_segment(&self) -> usize {
        self.entries_per_segment
    }

    /// Offset arena length: every prime below `MAX_INCREMENTS` is indexed by
    /// its absolute table position, so the arena carries slack for the
    /// leading primes plus headroom.
    #[inline]
    pub fn arena_len(&self) -> usize {
        self.store_offsets_len + 1024
    }
}

/// Prime counting approximation for the table's initial capacity.
fn estimate_prime_count(limit: usize) -> usize {
    if limit < 10 {
        return 8;
    }
    let n = limit as f64;
    (1.3 * n / n.ln()) as usize
}

/// A tiny synthetic table used by several test modules: primorial of the
/// first five primes (2·3·5·7·11 = 2310) plus one dense prime (101), one
/// sparse prime (65537, the largest Fermat prime), and one once-only prime
/// (2^31 − 1, the Mersenne prime M31, which is >= 2^29).
#[cfg(test)]
pub(crate) fn synthetic_table() -> PrimeTable {
    PrimeTable::from_primes(vec![2, 3, 5, 7, 11, 101, 65537, 2147483647], 5).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// π(10^6) = 78498 (OEIS A000720).
    #[test]
    fn prime_count_to_one_million() {
        let table = PrimeTable::build(1_000_000, 40).unwrap();
        assert_eq!(table.len(), 78498);
        assert_eq!(table.prime(0), 2);
        assert_eq!(table.prime(39), 173); // p_40
    }

    #[test]
    fn small_table_counts() {
        // π(1000) = 168
        let table = PrimeTable::build(1000, 5).unwrap();
        assert_eq!(table.len(), 168);
        assert_eq!(
            table.primorial(),
            &Integer::from(2u32 * 3 * 5 * 7 * 11) // 2310
        );
        // Everything after the primorial is below 16384, so all dense.
        assert_eq!(table.n_dense(), 163);
        assert_eq!(table.n_sparse(), 0);
        // No once-only primes below 2^29: capacity estimate degenerates to 1.
        assert_eq!(table.entries_per_segment(), 1);
    }

    /// `(P · P⁻¹) mod p = 1` for every post-primorial prime.
    #[test]
    fn inverses_invert_the_primorial() {
        let table = PrimeTable::build(10_000, 10).unwrap();
        for i in table.primorial_number()..table.len() {
            let p = table.prime(i);
            let product = Integer::from(table.primorial() * table.invert(i));
            assert_eq!(
                product.mod_u(p),
                1,
                "invert({}) is not an inverse mod {}",
                i,
                p
            );
        }
    }

    #[test]
    fn primorial_divisible_by_members_only() {
        let table = PrimeTable::build(1000, 40).unwrap();
        for i in 0..40 {
            assert!(table.primorial().is_divisible_u(table.prime(i)));
        }
        assert!(!table.primorial().is_divisible_u(table.prime(40)));
    }

    #[test]
    fn too_shallow_sieve_is_an_error() {
        // π(10) = 4 < 40
        match PrimeTable::build(10, 40) {
            Err(InitError::TableTooSmall { needed: 40, got: 4 }) => {}
            other => panic!("expected TableTooSmall, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn zero_primorial_is_an_error() {
        assert!(matches!(
            PrimeTable::build(100, 0),
            Err(InitError::EmptyPrimorial)
        ));
    }

    #[test]
    fn oversized_sieve_limit_is_an_error() {
        assert!(matches!(
            PrimeTable::build(u32::MAX as u64 + 2, 40),
            Err(InitError::SieveLimitTooLarge { .. })
        ));
    }

    /// primorial_number = 1: P = 2, and every odd prime still gets a valid
    /// inverse.
    #[test]
    fn single_prime_primorial() {
        let table = PrimeTable::build(100, 1).unwrap();
        assert_eq!(table.primorial(), &Integer::from(2u32));
        for i in 1..table.len() {
            let p = table.prime(i);
            assert_eq!((2 * table.invert(i) as u64 % p as u64) as u32, 1);
        }
    }

    /// A table holding exactly the primorial primes: every partition is
    /// empty and there is nothing to sieve, but init still succeeds.
    #[test]
    fn table_with_only_primorial_primes() {
        let table = PrimeTable::from_primes(vec![2, 3, 5, 7, 11], 5).unwrap();
        assert_eq!(table.n_dense(), 0);
        assert_eq!(table.n_sparse(), 0);
        assert_eq!(table.first_dense(), table.len());
        assert_eq!(table.entries_per_segment(), 1);
    }

    #[test]
    fn partitions_tile_the_table() {
        let table = synthetic_table();
        assert_eq!(table.primorial_number(), 5);
        assert_eq!(table.n_dense(), 1); // 101
        assert_eq!(table.n_sparse(), 1); // 65537
        assert_eq!(table.first_sparse(), 6);
        assert_eq!(table.first_once_only(), 7);
        assert_eq!(table.len() - table.first_once_only(), 1); // M31
    }

    /// One once-only prime: expected hits = 6 · 2^29 / (2^31 − 1) ≈ 1.5,
    /// so ceil = 2 and the per-segment capacity is (2/32 + 4) · 9/8 = 4.
    #[test]
    fn entries_per_segment_from_once_only_sum() {
        let table = synthetic_table();
        assert_eq!(table.entries_per_segment(), 4);
    }
}
