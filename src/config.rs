//! # Config — Engine Parameters
//!
//! Engine configuration shared by the binary and the library. Values come
//! from a TOML file (`--config`) with CLI flags overriding individual fields;
//! everything has a working default so `hexad` runs with no arguments.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::TUPLE_LEN;

/// Tunable engine parameters.
///
/// `sieve_workers` is derived rather than stored: a quarter of the pool
/// sieves, clamped to [1, 8]. Sieving is memory-bound, so more sieve threads
/// than that just fight over bandwidth while starving verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinerConfig {
    /// Sieve of Eratosthenes bound for the prime table. Must fit `u32`.
    pub sieve_max: u64,
    /// Total threads: one master plus `threads - 1` verifier workers.
    pub threads: u16,
    /// Number of leading primes multiplied into the primorial.
    pub primorial_number: u32,
    /// Minimum tuple length submitted as a share (1..=6).
    pub tuples: u8,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            sieve_max: 1 << 30,
            threads: 4,
            primorial_number: 40,
            tuples: 6,
        }
    }
}

impl MinerConfig {
    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: MinerConfig =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Reject parameter combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.threads < 2 {
            bail!(
                "threads = {} but the engine needs at least 2 (one master, one verifier)",
                self.threads
            );
        }
        if self.primorial_number == 0 {
            bail!("primorial_number must be at least 1");
        }
        if self.tuples == 0 || self.tuples as usize > TUPLE_LEN {
            bail!(
                "tuples = {} out of range (expected 1..={})",
                self.tuples,
                TUPLE_LEN
            );
        }
        if self.sieve_max > u32::MAX as u64 + 1 {
            bail!("sieve_max = {} exceeds the 32-bit prime table", self.sieve_max);
        }
        Ok(())
    }

    /// Sieve worker count: `clamp(threads / 4, 1, 8)`.
    pub fn sieve_workers(&self) -> usize {
        ((self.threads / 4) as usize).clamp(1, 8)
    }
}
