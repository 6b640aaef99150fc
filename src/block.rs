//! # Block — Work Items and Target Derivation
//!
//! A [`Block`] is the unit of work handed to the engine: an opaque 80-byte
//! header, a compact target width, the chain height used for preemption, and
//! an opaque descriptor echoed back on share submission.
//!
//! The search target `T` is derived by double-SHA-256 of the header: a high
//! guard bit, [`ZEROES_BEFORE_HASH`](crate::ZEROES_BEFORE_HASH) zero bits,
//! the 256 hash bits (least-significant bit of each byte first, placed from
//! the top down), then left-shifted so the total width equals
//! `target_compact`. The remainder `R` then moves `T` into the residue class
//! `primorial_offset mod P`, which is what makes the sieve's candidate
//! arithmetic work: every `T + R + k·P` keeps all six tuple members coprime
//! to the primorial primes.

use anyhow::{bail, Result};
use rug::Integer;
use sha2::{Digest, Sha256};

use crate::{PRIMORIAL_OFFSET, ZEROES_BEFORE_HASH};

/// One unit of mining work. Immutable once dispatched.
#[derive(Debug, Clone)]
pub struct Block {
    /// Raw 80-byte header prefix; only ever hashed.
    pub header: [u8; 80],
    /// Total bit width of the derived target.
    pub target_compact: u32,
    /// Chain height; a differing live height preempts this block.
    pub height: u64,
    /// Opaque work descriptor forwarded to share submission.
    pub descriptor: Vec<u8>,
}

/// Derive the search target from a block header.
///
/// Fails when `target_compact` leaves no room for the guard bit, the zero
/// padding, and the 256 hash bits.
pub fn target_from_block(block: &Block) -> Result<Integer> {
    let min_width = 1 + ZEROES_BEFORE_HASH + 256;
    let Some(trailing) = block.target_compact.checked_sub(min_width) else {
        bail!(
            "target compact {} is narrower than the {}-bit target prefix",
            block.target_compact,
            min_width
        );
    };

    let digest = Sha256::digest(Sha256::digest(block.header));

    let mut target = Integer::from(1) << ZEROES_BEFORE_HASH;
    for i in 0..256usize {
        target <<= 1;
        if digest[i / 8] >> (i % 8) & 1 == 1 {
            target += 1;
        }
    }
    target <<= trailing;
    Ok(target)
}

/// The unique `R ∈ [offset, P + offset)` with `(T + R) ≡ primorial_offset
/// (mod P)`.
pub fn remainder_for_target(target: &Integer, primorial: &Integer) -> Integer {
    let rem = Integer::from(target % primorial);
    let mut r = Integer::from(primorial - &rem);
    r %= primorial;
    r += PRIMORIAL_OFFSET;
    r
}
