//! # Verify — Candidate Tuple Testing and Share Encoding
//!
//! The CHECK job: reconstruct a candidate `n = T + R + P·(segment·W + index)`
//! from its window position and run the Fermat base-2 chain across the six
//! tuple members. The test is a fast necessary condition (`2^(n−1) mod n =
//! 1` for every prime `n`) and the one-in-astronomical false positive is
//! tolerated: the submission layer re-verifies with Miller–Rabin
//! server-side, so a full Miller–Rabin here would just slow the hot path.
//!
//! The chain stops at the first composite member; candidates reaching the
//! configured tuple length are serialized as `n − T` in 32 little-endian
//! bytes and submitted.

use rug::integer::Order;
use rug::Integer;
use tracing::warn;

use crate::miner::{MiningClient, SearchCtx};
use crate::primes::PrimeTable;
use crate::stats::Stats;
use crate::{PRIME_TUPLE_OFFSET, SIEVE_SIZE, TUPLE_LEN};

/// Fermat base-2 probable-prime test: `2^(n−1) ≡ 1 (mod n)`.
pub fn fermat_base2(candidate: &Integer) -> bool {
    if *candidate <= 1u32 {
        return false;
    }
    let exponent = Integer::from(candidate - 1u32);
    let base = Integer::from(2);
    match base.pow_mod_ref(&exponent, candidate) {
        Some(power) => Integer::from(power) == 1u32,
        None => false,
    }
}

/// Serialize a share offset as 32 little-endian bytes, zero-padded.
/// Returns `None` when the offset does not fit 256 bits — submitting a
/// truncated offset would be silently corrupt.
pub fn encode_offset(offset: &Integer) -> Option<[u8; 32]> {
    if offset.significant_bits() > 256 {
        return None;
    }
    let digits = offset.to_digits::<u8>(Order::Lsf);
    let mut payload = [0u8; 32];
    payload[..digits.len()].copy_from_slice(&digits);
    Some(payload)
}

/// Run the Fermat chain over a batch of candidate window positions and
/// submit every tuple of at least `tuples_required` prime members.
pub fn check_candidates(
    table: &PrimeTable,
    ctx: &SearchCtx,
    segment: u32,
    indexes: &[u32],
    tuples_required: u8,
    stats: &Stats,
    client: &dyn MiningClient,
) {
    let window_base = segment as u64 * SIEVE_SIZE as u64;
    for &index in indexes {
        let steps = window_base + index as u64;
        let mut member = Integer::from(table.primorial() * steps);
        member += &ctx.base;
        let offset = Integer::from(&member - &ctx.target);

        if !fermat_base2(&member) {
            continue;
        }
        let mut primes_found: u8 = 1;
        for &step in &PRIME_TUPLE_OFFSET[1..TUPLE_LEN] {
            member += step;
            if !fermat_base2(&member) {
                break;
            }
            primes_found += 1;
            stats.record_tuple(primes_found);
        }

        if primes_found < tuples_required {
            continue;
        }
        match encode_offset(&offset) {
            Some(payload) => {
                stats.record_share();
                client.submit_share(&ctx.descriptor, &payload, primes_found);
            }
            None => warn!(
                bits = offset.significant_bits(),
                "share offset exceeds 256 bits, not submitting"
            ),
        }
    }
}
