//! # Main — CLI Entry Point
//!
//! Loads configuration (TOML file plus flag overrides), initializes
//! structured logging, and drives the engine against a deterministic
//! in-process chain: headers are derived by hashing the block height, so a
//! run is reproducible and needs no network. Each simulated block is
//! searched to completion before the chain advances.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sha2::{Digest, Sha256};
use tracing::info;

use hexad::{Block, Miner, MinerConfig, MiningClient};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "hexad", about = "Prime sextuplet proof-of-work search engine")]
struct Cli {
    /// TOML config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sieve of Eratosthenes bound for the prime table
    #[arg(long)]
    sieve_max: Option<u64>,

    /// Total threads: one master plus verifier workers
    #[arg(long, env = "HEXAD_THREADS")]
    threads: Option<u16>,

    /// Number of leading primes multiplied into the primorial
    #[arg(long)]
    primorial_number: Option<u32>,

    /// Minimum tuple length submitted as a share (1-6)
    #[arg(long)]
    tuples: Option<u8>,

    /// Simulated blocks to mine before exiting
    #[arg(long, default_value_t = 1)]
    blocks: u64,

    /// Compact target width (total bits) for simulated blocks
    #[arg(long, default_value_t = 600)]
    search_bits: u32,

    /// Seconds between progress reports (0 disables the reporter)
    #[arg(long, default_value_t = 30)]
    report_secs: u64,
}

/// Deterministic block source for local runs: block `h` gets a header
/// derived from SHA-256 of `h`, and the tip height always matches the block
/// being handed out, so every block is searched to completion.
struct SimulatedChain {
    tip: AtomicU64,
    remaining: AtomicU64,
    search_bits: u32,
    shares: AtomicU64,
}

impl SimulatedChain {
    fn new(blocks: u64, search_bits: u32) -> Self {
        SimulatedChain {
            tip: AtomicU64::new(0),
            remaining: AtomicU64::new(blocks),
            search_bits,
            shares: AtomicU64::new(0),
        }
    }

    fn shares(&self) -> u64 {
        self.shares.load(Ordering::Relaxed)
    }
}

impl MiningClient for SimulatedChain {
    fn next_block(&self) -> Option<Block> {
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return None;
        }
        let height = self.tip.fetch_add(1, Ordering::SeqCst) + 1;

        let mut header = [0u8; 80];
        let mut seed = Sha256::digest(height.to_le_bytes());
        for chunk in header.chunks_mut(32) {
            chunk.copy_from_slice(&seed[..chunk.len()]);
            seed = Sha256::digest(seed);
        }
        info!(height, "simulated block");
        Some(Block {
            header,
            target_compact: self.search_bits,
            height,
            descriptor: height.to_le_bytes().to_vec(),
        })
    }

    fn current_height(&self) -> u64 {
        self.tip.load(Ordering::SeqCst)
    }

    fn submit_share(&self, descriptor: &[u8], offset: &[u8; 32], tuple_len: u8) {
        self.shares.fetch_add(1, Ordering::Relaxed);
        let mut hex = String::with_capacity(64);
        for byte in offset.iter().rev() {
            hex.push_str(&format!("{:02x}", byte));
        }
        info!(
            block = u64::from_le_bytes(descriptor.try_into().unwrap_or_default()),
            tuple_len,
            offset = %hex,
            "share submitted"
        );
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for fleet deployments, human-readable stderr otherwise.
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    // A panicked worker means a violated sieve invariant; a miner limping on
    // without it would silently lose throughput or submit garbage.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(70);
    }));

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => MinerConfig::load(path)?,
        None => MinerConfig::default(),
    };
    if let Some(sieve_max) = cli.sieve_max {
        config.sieve_max = sieve_max;
    }
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(primorial_number) = cli.primorial_number {
        config.primorial_number = primorial_number;
    }
    if let Some(tuples) = cli.tuples {
        config.tuples = tuples;
    }
    config.validate()?;

    let chain = Arc::new(SimulatedChain::new(cli.blocks, cli.search_bits));
    let mut miner = Miner::new(&config, Arc::clone(&chain) as Arc<dyn MiningClient>)?;
    let stats = miner.stats();
    let _reporter = (cli.report_secs > 0)
        .then(|| stats.start_reporter(Duration::from_secs(cli.report_secs)));

    miner.run();

    stats.stop();
    stats.print_status();
    info!(
        blocks = stats.blocks(),
        shares = chain.shares(),
        "simulation finished"
    );
    Ok(())
}
