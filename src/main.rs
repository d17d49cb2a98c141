#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::needless_pass_by_value,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result, bail};
use bulkhead::config::BulkheadsFile;
use bulkhead::{Bulkhead, CallError, ConfigSource, Metrics, Registry, execute};
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

/// Drive bulkheads described in a TOML file.
#[derive(Parser, Debug)]
#[command(name = "bulkhead")]
#[command(version)]
#[command(about = "Bulkhead admission control: simulate load and check configs.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run simulated calls through one bulkhead and report the outcome
    Simulate {
        /// Bulkheads file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Bulkhead to drive; uses the config of the same name when present
        #[arg(short, long, default_value = "default")]
        name: String,

        /// Total number of calls
        #[arg(long, default_value_t = 100)]
        calls: usize,

        /// Simulated work per call, in milliseconds
        #[arg(long, default_value_t = 10)]
        work_ms: u64,

        /// Caller threads issuing calls in parallel
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
    },

    /// Validate a bulkheads file
    Check {
        /// Bulkheads file (TOML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    match cli.command {
        Commands::Simulate {
            config,
            name,
            calls,
            work_ms,
            concurrency,
        } => simulate(&config, &name, calls, Duration::from_millis(work_ms), concurrency),
        Commands::Check { config } => check(&config),
    }
}

fn load_registry(path: &Path) -> Result<Registry> {
    BulkheadsFile::load(path)?
        .into_registry()
        .with_context(|| format!("Invalid bulkheads file: {}", path.display()))
}

fn check(path: &Path) -> Result<()> {
    let file = BulkheadsFile::load(path)?;
    let strategy = file.strategy;
    let configs = file.strategy_configs()?;
    for (name, config) in &configs {
        config
            .validate(name)
            .with_context(|| format!("Invalid bulkheads file: {}", path.display()))?;
    }

    println!("✅ {} ({strategy} strategy)", path.display());
    for (name, config) in &configs {
        println!("   {name}: {config:?}");
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Tally {
    permitted: AtomicU64,
    rejected: AtomicU64,
}

fn simulate(
    path: &Path,
    name: &str,
    calls: usize,
    work: Duration,
    concurrency: usize,
) -> Result<()> {
    if concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }

    let registry = load_registry(path)?;
    let source = if registry.configuration(name).is_some() {
        ConfigSource::from(name)
    } else {
        ConfigSource::Default
    };
    let bulkhead = registry.get_or_create(name, source)?;
    info!(
        bulkhead = name,
        strategy = %registry.strategy(),
        calls,
        concurrency,
        "Starting simulation"
    );

    let next_call = Arc::new(AtomicUsize::new(0));
    let tally = Arc::new(Tally::default());
    let started = Instant::now();

    thread::scope(|scope| {
        for _ in 0..concurrency {
            let bulkhead = bulkhead.clone();
            let next_call = Arc::clone(&next_call);
            let tally = Arc::clone(&tally);
            scope.spawn(move || {
                while next_call.fetch_add(1, Ordering::SeqCst) < calls {
                    record(&tally, run_call(&bulkhead, work));
                }
            });
        }
    });

    let elapsed = started.elapsed();
    println!("Simulated {calls} calls through '{name}' in {elapsed:.2?}");
    println!("  permitted: {}", tally.permitted.load(Ordering::SeqCst));
    println!("  rejected:  {}", tally.rejected.load(Ordering::SeqCst));
    print_metrics(&bulkhead.metrics());
    Ok(())
}

fn run_call(bulkhead: &Bulkhead, work: Duration) -> Result<(), CallError<Infallible>> {
    execute(bulkhead, move || {
        thread::sleep(work);
        Ok(())
    })
}

fn record(tally: &Tally, outcome: Result<(), CallError<Infallible>>) {
    match outcome {
        Ok(()) => tally.permitted.fetch_add(1, Ordering::SeqCst),
        Err(_) => tally.rejected.fetch_add(1, Ordering::SeqCst),
    };
}

fn print_metrics(metrics: &Metrics) {
    match metrics {
        Metrics::Semaphore(m) => {
            println!(
                "  permits:   {}/{} available",
                m.available_concurrent_calls, m.max_allowed_concurrent_calls
            );
        }
        Metrics::ThreadPool(m) => {
            println!(
                "  threads:   {} alive (core {}, max {})",
                m.thread_pool_size, m.core_thread_pool_size, m.maximum_thread_pool_size
            );
            println!(
                "  queue:     {}/{} used",
                m.queue_depth, m.queue_capacity
            );
        }
    }
}
