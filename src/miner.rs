//! # Miner — Master/Worker Orchestration
//!
//! One thread — whichever calls [`Miner::run`] — is the master; `threads − 1`
//! verifier workers are spawned at construction and live until the miner is
//! dropped. Workers block on the shared work queue and dispatch on the job
//! tag; they never become master and never exit mid-search.
//!
//! Per block the master:
//!
//! 1. Derives the target and remainder, publishes them as an immutable
//!    [`SearchCtx`] carried inside every job of that block.
//! 2. Partitions the post-primorial table into ~128 MOD jobs and waits for
//!    all of them — sieving must not start on a half-seeded arena.
//! 3. For each of the 32 windows: dispatches sparse SIEVE jobs to the front
//!    of the queue (ahead of any verification backlog), sieves the dense
//!    primes inline, waits for the worker bitmaps, ORs them into the master
//!    bitmap, replays the once-only bucket for this window, then scans zero
//!    bits into 64-candidate CHECK batches.
//! 4. Drains outstanding CHECK completions before returning.
//!
//! Preemption is advisory: the live chain height is compared against the
//! block at every window boundary and every candidate enqueue. On a height
//! change queued jobs are cleared and the block abandoned; CHECK jobs
//! already in flight finish against their own block's context, so the share
//! sink may still receive stale-but-well-formed submissions.

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use rug::Integer;
use tracing::{debug, info};

use crate::block::{remainder_for_target, target_from_block};
use crate::offsets::{seed_range, OffsetArena, OffsetStack, SegmentBuckets};
use crate::primes::{InitError, PrimeTable};
use crate::queue::JobQueue;
use crate::sieve::{merge_segment_hits, sieve_dense, sieve_sparse, SieveBits};
use crate::stats::Stats;
use crate::verify::check_candidates;
use crate::{Block, MinerConfig, MAX_ITERATIONS, WORK_INDEXES};

/// Work queue capacity; bounds candidate backlog.
const WORK_QUEUE_CAP: usize = 1024;
/// Completion queue capacity; must exceed any possible in-flight count.
const DONE_QUEUE_CAP: usize = 3096;
/// Target number of MOD jobs per block.
const MOD_JOBS: usize = 128;
/// A sparse partition closer than this to the end absorbs the tail.
const SIEVE_TAIL_SLACK: usize = 1000;

/// External collaborators: the block source, the live-height observable,
/// and the share sink. Implementations must be internally synchronized —
/// `current_height` is polled from the master while submissions arrive from
/// workers.
pub trait MiningClient: Send + Sync {
    /// Blocking source of work. `None` ends [`Miner::run`].
    fn next_block(&self) -> Option<Block>;
    /// Height of the chain tip right now; differing from a block's height
    /// preempts it.
    fn current_height(&self) -> u64;
    /// Accept a share: the block's descriptor, `n − T` as 32 little-endian
    /// bytes, and how many tuple members were prime. May be called for a
    /// superseded block; the sink must tolerate stale work.
    fn submit_share(&self, descriptor: &[u8], offset: &[u8; 32], tuple_len: u8);
}

/// Immutable per-block search context, shared by every job of the block.
pub struct SearchCtx {
    /// The target `T`.
    pub target: Integer,
    /// `T + R`: the first integer of the searched residue class.
    pub base: Integer,
    pub height: u64,
    pub descriptor: Vec<u8>,
}

enum Job {
    /// Seed offsets and buckets for table indices `[start, end)`.
    Mod {
        start: usize,
        end: usize,
        ctx: Arc<SearchCtx>,
    },
    /// Sieve sparse indices `[start, end)` into the carried bitmap.
    Sieve {
        start: usize,
        end: usize,
        sieve_id: usize,
        bits: Box<SieveBits>,
    },
    /// Fermat-test a batch of candidate positions from one window.
    Check {
        segment: u32,
        indexes: Vec<u32>,
        ctx: Arc<SearchCtx>,
    },
}

enum WorkerDone {
    Mod,
    /// Returns the worker bitmap to its home slot.
    Sieve { sieve_id: usize, bits: Box<SieveBits> },
}

struct Shared {
    table: PrimeTable,
    arena: OffsetArena,
    buckets: SegmentBuckets,
    stats: Arc<Stats>,
    work: JobQueue<Job>,
    worker_done: JobQueue<WorkerDone>,
    test_done: JobQueue<()>,
    tuples_required: u8,
}

/// The engine aggregate: prime table, arenas, queues, worker pool, and the
/// master-owned bitmaps.
pub struct Miner {
    shared: Arc<Shared>,
    client: Arc<dyn MiningClient>,
    workers: Vec<thread::JoinHandle<()>>,
    sieve_workers: usize,
    /// Master window bitmap.
    sieve: SieveBits,
    /// Worker bitmaps, `None` while riding inside a SIEVE job.
    worker_bits: Vec<Option<Box<SieveBits>>>,
}

impl Miner {
    /// Build the prime table and arenas and spawn the verifier pool.
    pub fn new(config: &MinerConfig, client: Arc<dyn MiningClient>) -> Result<Self, InitError> {
        if config.threads < 2 {
            return Err(InitError::NotEnoughThreads {
                got: config.threads,
            });
        }
        let table = PrimeTable::build(config.sieve_max, config.primorial_number as usize)?;
        let shared = Arc::new(Shared {
            arena: OffsetArena::new(table.arena_len()),
            buckets: SegmentBuckets::new(table.entries_per_segment()),
            table,
            stats: Stats::new(),
            work: JobQueue::with_capacity(WORK_QUEUE_CAP),
            worker_done: JobQueue::with_capacity(DONE_QUEUE_CAP),
            test_done: JobQueue::with_capacity(DONE_QUEUE_CAP),
            tuples_required: config.tuples,
        });

        let mut workers = Vec::with_capacity(config.threads as usize - 1);
        for id in 0..config.threads - 1 {
            let shared = Arc::clone(&shared);
            let client = Arc::clone(&client);
            let handle = thread::Builder::new()
                .name(format!("verify-{}", id))
                .spawn(move || worker_main(shared, client))
                .map_err(InitError::WorkerSpawn)?;
            workers.push(handle);
        }

        let sieve_workers = config.sieve_workers();
        info!(
            threads = config.threads,
            sieve_workers,
            primorial_number = config.primorial_number,
            tuples = config.tuples,
            "miner initialized"
        );
        Ok(Miner {
            shared,
            client,
            workers,
            sieve_workers,
            sieve: SieveBits::new(),
            worker_bits: (0..sieve_workers)
                .map(|_| Some(Box::new(SieveBits::new())))
                .collect(),
        })
    }

    /// Observable counters.
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.shared.stats)
    }

    /// Mine blocks from the client until it runs dry.
    pub fn run(&mut self) {
        while let Some(block) = self.client.next_block() {
            if let Err(error) = self.process(&block) {
                tracing::error!(height = block.height, %error, "block rejected");
            }
        }
    }

    /// Search one block until it is superseded or fully searched.
    pub fn process(&mut self, block: &Block) -> Result<()> {
        let target = target_from_block(block)?;
        self.search(block, target)
    }

    /// The search loop behind [`process`](Self::process), taking an already
    /// derived target. Callers that obtain the target elsewhere (tests hand
    /// in small synthetic targets so a known sextuplet lands inside the
    /// first window) drive the same pipeline through here.
    pub fn search(&mut self, block: &Block, target: Integer) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let table = &shared.table;

        shared.stats.set_difficulty(target.significant_bits() as u64);
        let remainder = remainder_for_target(&target, table.primorial());
        let base = Integer::from(&target + &remainder);
        let ctx = Arc::new(SearchCtx {
            target,
            base,
            height: block.height,
            descriptor: block.descriptor.clone(),
        });
        shared.buckets.reset();

        // MOD phase: seed the whole post-primorial table, then barrier.
        // Sieving against a half-seeded arena would mark garbage positions.
        let first = table.first_dense();
        let len = table.len();
        let step = (len / MOD_JOBS).max(1);
        let mut mod_jobs = 0usize;
        let mut lo = first;
        while lo < len {
            let hi = (lo + step).min(len);
            shared.work.push_back(Job::Mod {
                start: lo,
                end: hi,
                ctx: Arc::clone(&ctx),
            });
            mod_jobs += 1;
            lo = hi;
        }
        for _ in 0..mod_jobs {
            match shared.worker_done.pop_front() {
                Some(WorkerDone::Mod) => {}
                Some(WorkerDone::Sieve { .. }) => {
                    unreachable!("sieve completion during remainder seeding")
                }
                None => return Ok(()), // shutting down
            }
        }

        let first_sparse = table.first_sparse();
        let sparse_end = table.first_once_only();
        let n_sparse = table.n_sparse();
        let mut outstanding = 0usize;
        let mut candidates = 0u64;
        let mut preempted = false;

        for segment in 0..MAX_ITERATIONS as u32 {
            // Publish/observe the height written by the client's poller.
            fence(Ordering::SeqCst);
            if self.client.current_height() != block.height {
                preempted = true;
                break;
            }

            // Sparse sieving goes to the *front* of the queue: this window
            // cannot close until sieving is done, while queued CHECK work is
            // from an older window and can wait.
            let mut sieve_jobs = 0usize;
            if n_sparse > 0 {
                let step = n_sparse / self.sieve_workers + 1;
                let mut which = 0usize;
                let mut lo = first_sparse;
                while lo < sparse_end {
                    let mut hi = (lo + step).min(sparse_end);
                    if hi + SIEVE_TAIL_SLACK > sparse_end {
                        hi = sparse_end;
                    }
                    let mut bits = self.worker_bits[which]
                        .take()
                        .expect("worker bitmap still in flight");
                    bits.zero();
                    shared.work.push_front(Job::Sieve {
                        start: lo,
                        end: hi,
                        sieve_id: which,
                        bits,
                    });
                    sieve_jobs += 1;
                    which = (which + 1) % self.sieve_workers;
                    lo = hi;
                }
            }

            self.sieve.zero();
            sieve_dense(table, &shared.arena, &mut self.sieve, first, first_sparse);

            outstanding = outstanding.saturating_sub(shared.test_done.clear());
            for _ in 0..sieve_jobs {
                match shared.worker_done.pop_front() {
                    Some(WorkerDone::Sieve { sieve_id, bits }) => {
                        self.sieve.or_from(&bits);
                        self.worker_bits[sieve_id] = Some(bits);
                    }
                    Some(WorkerDone::Mod) => {
                        unreachable!("remainder completion during sieving")
                    }
                    None => return Ok(()),
                }
            }

            shared
                .buckets
                .with_segment(segment as usize, |hits| {
                    merge_segment_hits(&mut self.sieve, hits)
                });

            // Scan: zero bits are candidates, walked most-significant-first
            // within each word.
            let mut indexes: Vec<u32> = Vec::with_capacity(WORK_INDEXES);
            'scan: for (word_index, &word) in self.sieve.words().iter().enumerate() {
                let mut zeros = !word;
                let mut from_word = 0u32;
                while zeros != 0 {
                    from_word += 1;
                    assert!(
                        from_word <= 64,
                        "more than 64 candidates out of one sieve word, bitmap corrupt"
                    );
                    let bit = 63 - zeros.leading_zeros();
                    zeros &= !(1u64 << bit);
                    candidates += 1;
                    indexes.push(word_index as u32 * 64 + bit);

                    outstanding = outstanding.saturating_sub(shared.test_done.clear());
                    if indexes.len() == WORK_INDEXES {
                        let batch =
                            std::mem::replace(&mut indexes, Vec::with_capacity(WORK_INDEXES));
                        shared.work.push_back(Job::Check {
                            segment,
                            indexes: batch,
                            ctx: Arc::clone(&ctx),
                        });
                        outstanding += 1;
                        outstanding = outstanding.saturating_sub(shared.test_done.clear());
                    }

                    // Cheap enough to do per candidate, and bounds how much
                    // stale work a new block has to wait behind.
                    if self.client.current_height() != block.height {
                        outstanding = outstanding.saturating_sub(shared.work.clear());
                        preempted = true;
                        break 'scan;
                    }
                }
            }
            if preempted {
                break;
            }
            if !indexes.is_empty() {
                shared.work.push_back(Job::Check {
                    segment,
                    indexes,
                    ctx: Arc::clone(&ctx),
                });
                outstanding += 1;
            }
        }

        // Let in-flight verification finish; a height change mid-drain still
        // clears whatever has not started.
        outstanding = outstanding.saturating_sub(shared.test_done.clear());
        while outstanding > 0 {
            if shared.test_done.pop_front().is_none() {
                break;
            }
            outstanding -= 1;
            if self.client.current_height() != block.height {
                outstanding = outstanding.saturating_sub(shared.work.clear());
            }
        }

        shared.stats.record_candidates(candidates);
        shared.stats.record_block();
        debug!(
            height = block.height,
            candidates, preempted, "block search finished"
        );
        Ok(())
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.shared.work.close();
        self.shared.worker_done.close();
        self.shared.test_done.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Verifier loop: block on the work queue, dispatch on the job tag, report
/// completion. Runs until the queue is closed.
fn worker_main(shared: Arc<Shared>, client: Arc<dyn MiningClient>) {
    let mut stack = OffsetStack::new();
    while let Some(job) = shared.work.pop_front() {
        match job {
            Job::Mod { start, end, ctx } => {
                seed_range(
                    &shared.table,
                    &shared.arena,
                    &shared.buckets,
                    &mut stack,
                    &ctx.base,
                    start,
                    end,
                );
                shared.worker_done.push_back(WorkerDone::Mod);
            }
            Job::Sieve {
                start,
                end,
                sieve_id,
                mut bits,
            } => {
                sieve_sparse(&shared.table, &shared.arena, &mut bits, start, end);
                shared
                    .worker_done
                    .push_back(WorkerDone::Sieve { sieve_id, bits });
            }
            Job::Check {
                segment,
                indexes,
                ctx,
            } => {
                check_candidates(
                    &shared.table,
                    &ctx,
                    segment,
                    &indexes,
                    shared.tuples_required,
                    &shared.stats,
                    client.as_ref(),
                );
                shared.test_done.push_back(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    /// Chain stub whose tip height is set directly by the test.
    struct StubChain {
        tip: AtomicU64,
        shares: Mutex<Vec<(Vec<u8>, [u8; 32], u8)>>,
    }

    impl StubChain {
        fn at_height(height: u64) -> Arc<Self> {
            Arc::new(StubChain {
                tip: AtomicU64::new(height),
                shares: Mutex::new(Vec::new()),
            })
        }
    }

    impl MiningClient for StubChain {
        fn next_block(&self) -> Option<Block> {
            None
        }
        fn current_height(&self) -> u64 {
            self.tip.load(Ordering::SeqCst)
        }
        fn submit_share(&self, descriptor: &[u8], offset: &[u8; 32], tuple_len: u8) {
            self.shares
                .lock()
                .unwrap()
                .push((descriptor.to_vec(), *offset, tuple_len));
        }
    }

    fn small_config() -> MinerConfig {
        MinerConfig {
            sieve_max: 100_000,
            threads: 3,
            primorial_number: 10,
            tuples: 6,
        }
    }

    fn block_at(height: u64) -> Block {
        Block {
            header: [0u8; 80],
            target_compact: 304,
            height,
            descriptor: vec![1, 2, 3],
        }
    }

    #[test]
    fn rejects_single_thread_pool() {
        let chain = StubChain::at_height(0);
        let config = MinerConfig {
            threads: 1,
            ..small_config()
        };
        assert!(matches!(
            Miner::new(&config, chain),
            Err(InitError::NotEnoughThreads { got: 1 })
        ));
    }

    /// A block whose height is already stale runs the MOD phase, preempts at
    /// window 0, and leaves all queues drained.
    #[test]
    fn stale_block_preempts_before_sieving() {
        let chain = StubChain::at_height(101);
        let mut miner = Miner::new(&small_config(), Arc::clone(&chain) as Arc<dyn MiningClient>)
            .unwrap();
        miner.process(&block_at(100)).unwrap();

        assert!(chain.shares.lock().unwrap().is_empty());
        assert!(miner.shared.work.is_empty());
        assert!(miner.shared.worker_done.is_empty());
        assert!(miner.shared.test_done.is_empty());
        assert_eq!(miner.stats().blocks(), 1);
        assert_eq!(miner.stats().candidates(), 0);
        // Difficulty was still published from the target derivation.
        assert_eq!(miner.stats().difficulty(), 304);
    }

    /// The MOD barrier leaves the arena fully seeded: every post-primorial
    /// prime below 2^29 cancels its residue for all six offsets.
    #[test]
    fn stale_block_still_seeds_the_arena() {
        let chain = StubChain::at_height(2);
        let mut miner = Miner::new(&small_config(), Arc::clone(&chain) as Arc<dyn MiningClient>)
            .unwrap();
        let block = block_at(1);
        miner.process(&block).unwrap();

        let table = &miner.shared.table;
        let target = target_from_block(&block).unwrap();
        let remainder = remainder_for_target(&target, table.primorial());
        let base = Integer::from(&target + &remainder);
        let sums = crate::tuple_offset_sums();
        // Sample a few primes across the dense range.
        for i in [table.first_dense(), table.first_dense() + 97, table.len() - 1] {
            let p = table.prime(i);
            let offsets = miner.shared.arena.load(i);
            for (f, &cum) in sums.iter().enumerate() {
                assert!(offsets[f] < p);
                let member = Integer::from(table.primorial() * offsets[f]) + &base + cum;
                assert!(member.is_divisible_u(p), "prime {} offset {}", p, f);
            }
        }
    }

    /// Two stale blocks back to back: the pool survives a preempted block
    /// and processes the next one.
    #[test]
    fn pool_survives_across_blocks() {
        let chain = StubChain::at_height(7);
        let mut miner = Miner::new(&small_config(), Arc::clone(&chain) as Arc<dyn MiningClient>)
            .unwrap();
        miner.process(&block_at(5)).unwrap();
        miner.process(&block_at(6)).unwrap();
        assert_eq!(miner.stats().blocks(), 2);
    }

    #[test]
    fn undersized_target_is_reported_not_fatal() {
        let chain = StubChain::at_height(0);
        let mut miner = Miner::new(&small_config(), Arc::clone(&chain) as Arc<dyn MiningClient>)
            .unwrap();
        let mut block = block_at(0);
        block.target_compact = 100;
        assert!(miner.process(&block).is_err());
        // Engine still usable afterwards.
        miner.process(&block_at(99)).unwrap();
    }

    /// Dropping the miner closes the queues and joins the pool without
    /// hanging.
    #[test]
    fn drop_joins_workers() {
        let chain = StubChain::at_height(0);
        let miner = Miner::new(&small_config(), chain).unwrap();
        drop(miner);
    }
}
