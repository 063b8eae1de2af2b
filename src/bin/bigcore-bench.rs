use std::hint::black_box;
use std::path::PathBuf;
use std::process::exit;
use std::time::Instant;

use clap::Parser;
use log::{error, info};

use bigcore::{PoolConfig, Result, WorkerPool};

#[derive(Parser)]
#[command(
    name = "bigcore-bench",
    version,
    about = "Runs a synthetic workload on a performance-core worker pool"
)]
struct Cli {
    /// JSON pool configuration; flags below override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Number of tasks to submit
    #[arg(long, default_value_t = 1000, value_name = "N")]
    tasks: u64,

    /// Spin iterations per task
    #[arg(long, default_value_t = 10_000, value_name = "N")]
    work: u64,

    /// Do not pin workers to performance cores
    #[arg(long)]
    no_pin: bool,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if cli.no_pin {
        config.pin_workers = false;
    }

    info!("bigcore-bench {}", env!("CARGO_PKG_VERSION"));
    info!("{} logical CPUs, topology {:?}", num_cpus::get(), config.topology);

    let pool = WorkerPool::with_config(&config)?;
    let start = Instant::now();

    let work = cli.work;
    let handles = (0..cli.tasks)
        .map(|seed| pool.enqueue(move || spin(seed, work)))
        .collect::<Result<Vec<_>>>()?;

    let mut checksum = 0u64;
    for handle in handles {
        checksum = checksum.wrapping_add(handle.join()?);
    }
    let elapsed = start.elapsed();
    pool.shutdown();

    println!(
        "tasks={} threads={} elapsed_ms={} checksum={}",
        cli.tasks,
        pool.thread_count(),
        elapsed.as_millis(),
        checksum
    );
    Ok(())
}

/// Burns CPU with an xorshift loop.
fn spin(seed: u64, iterations: u64) -> u64 {
    let mut x = seed | 1;
    for _ in 0..iterations {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
    }
    black_box(x)
}
