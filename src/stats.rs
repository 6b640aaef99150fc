//! # Stats — Atomic Search Counters
//!
//! Thread-safe counters shared between the master, the verifier workers, and
//! the background reporter. All updates are relaxed atomics — the counters
//! are observational, nothing synchronizes through them.
//!
//! `found_tuples[k]` counts every candidate observed with at least `k` prime
//! members (k ≥ 2), so the entries are cumulative: a full sextuplet bumps
//! slots 2 through 6.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::TUPLE_LEN;

pub struct Stats {
    difficulty: AtomicU64,
    candidates: AtomicU64,
    blocks: AtomicU64,
    shares: AtomicU64,
    found_tuples: [AtomicU64; TUPLE_LEN + 1],
    start: Instant,
    shutdown: AtomicBool,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Stats {
            difficulty: AtomicU64::new(0),
            candidates: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            shares: AtomicU64::new(0),
            found_tuples: Default::default(),
            start: Instant::now(),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn set_difficulty(&self, bits: u64) {
        self.difficulty.store(bits, Ordering::Relaxed);
    }

    pub fn difficulty(&self) -> u64 {
        self.difficulty.load(Ordering::Relaxed)
    }

    pub fn record_candidates(&self, scanned: u64) {
        self.candidates.fetch_add(scanned, Ordering::Relaxed);
    }

    pub fn candidates(&self) -> u64 {
        self.candidates.load(Ordering::Relaxed)
    }

    pub fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn record_share(&self) {
        self.shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shares(&self) -> u64 {
        self.shares.load(Ordering::Relaxed)
    }

    /// Record a candidate reaching `length` prime members.
    pub fn record_tuple(&self, length: u8) {
        if let Some(slot) = self.found_tuples.get(length as usize) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn tuples_found(&self, length: usize) -> u64 {
        self.found_tuples
            .get(length)
            .map(|slot| slot.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Spawn the background reporter, which logs a status line every
    /// `interval` until [`stop`](Self::stop).
    pub fn start_reporter(self: &Arc<Self>, interval: Duration) -> thread::JoinHandle<()> {
        let stats = Arc::clone(self);
        thread::spawn(move || loop {
            thread::sleep(interval);
            if stats.shutdown.load(Ordering::Relaxed) {
                break;
            }
            stats.print_status();
        })
    }

    pub fn print_status(&self) {
        let elapsed = self.start.elapsed();
        let tuples: Vec<String> = (2..=TUPLE_LEN)
            .map(|k| format!("{}:{}", k, self.tuples_found(k)))
            .collect();
        let h = elapsed.as_secs() / 3600;
        let m = (elapsed.as_secs() % 3600) / 60;
        let s = elapsed.as_secs() % 60;
        info!(
            difficulty = self.difficulty(),
            blocks = self.blocks(),
            candidates = self.candidates(),
            tuples = tuples.join(" "),
            shares = self.shares(),
            elapsed = format_args!("{:02}:{:02}:{:02}", h, m, s),
            "search progress"
        );
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
