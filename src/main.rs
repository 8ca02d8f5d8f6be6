//! drainpool - CLI

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use drainpool::util::config::{load_layered, ConfigOverrides, PoolConfig};
use drainpool::util::logger::{self, LogLevel};
use drainpool::{Drainer, Pool, Task, NAME, VERSION};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// Bounded-concurrency task executor
#[derive(Parser, Debug)]
#[command(name = "drainpool")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

/// Pool settings shared by every subcommand.
#[derive(Args, Debug)]
struct PoolArgs {
    /// TOML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum number of tasks running at once
    #[arg(short, long)]
    limit: Option<usize>,

    /// Pool-wide retry attempts, replacing each task's own policy
    #[arg(short, long)]
    attempts: Option<u32>,

    /// Delay before the first retry, in milliseconds
    #[arg(long, value_name = "MS")]
    base_delay_ms: Option<u64>,

    /// Skip tasks not yet started once one task has failed
    #[arg(long)]
    fail_fast: bool,
}

impl PoolArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            limit: self.limit,
            attempts: self.attempts,
            base_delay_ms: self.base_delay_ms,
            fail_fast: self.fail_fast.then_some(true),
        }
    }

    fn load(&self) -> Result<PoolConfig> {
        load_layered(self.config.as_deref(), &self.overrides())
            .context("Failed to load configuration")
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic batch of tasks and print a summary
    Run {
        #[command(flatten)]
        pool: PoolArgs,

        /// Number of tasks to submit
        #[arg(short, long, default_value_t = 16)]
        tasks: usize,

        /// Simulated work per attempt, in milliseconds
        #[arg(short, long, value_name = "MS", default_value_t = 10)]
        work_ms: u64,

        /// Make every K-th task fail on every attempt
        #[arg(long, value_name = "K")]
        fail_every: Option<usize>,

        /// Make every K-th task fail on its first attempt only
        #[arg(long, value_name = "K")]
        flaky_every: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        pool: PoolArgs,
    },

    /// Print version information
    Version,
}

/// Shape of the synthetic batch.
#[derive(Debug, Clone, Copy)]
struct Batch {
    tasks: usize,
    work: Duration,
    fail_every: usize,
    flaky_every: usize,
}

impl Batch {
    fn task(
        &self,
        index: usize,
    ) -> Task<(), usize> {
        let work = self.work;
        let fails = every(index, self.fail_every);
        let flaky = every(index, self.flaky_every);

        let task = Task::<(), usize>::new(move |args| {
            thread::sleep(work);
            if fails {
                bail!("task {} failed", index);
            }
            if flaky && args.attempt() == 1 {
                bail!("task {} failed on its first attempt", index);
            }
            args.send(index)?;
            Ok(())
        })
        .named(format!("task-{}", index));

        if flaky {
            task.with_retry(2, Duration::from_millis(10))
        } else {
            task
        }
    }
}

/// Whether `index` is one of every `k`-th tasks; `k == 0` matches nothing.
fn every(
    index: usize,
    k: usize,
) -> bool {
    k > 0 && (index + 1) % k == 0
}

fn run_batch(
    config: &PoolConfig,
    batch: &Batch,
) -> Result<()> {
    let mut pool = Pool::from_config(config)?;
    let output = Drainer::new();
    let tasks: Vec<_> = (0..batch.tasks)
        .map(|index| batch.task(index).drain_to(&output))
        .collect();

    let started = Instant::now();
    let result = pool.submit(tasks).wait();
    let elapsed = started.elapsed();

    let stats = pool.stats();
    let failed = stats.failed.load(Ordering::SeqCst);
    println!(
        "{} {} tasks in {:.2?}",
        "finished".bold(),
        stats.submitted.load(Ordering::SeqCst),
        elapsed
    );
    println!("  limit            {}", describe_limit(pool.limit()));
    println!(
        "  completed        {}",
        stats.completed.load(Ordering::SeqCst).green()
    );
    if failed > 0 {
        println!("  failed           {}", failed.red());
    } else {
        println!("  failed           {}", failed);
    }
    println!("  skipped          {}", stats.skipped.load(Ordering::SeqCst));
    println!("  invocations      {}", stats.invocations.load(Ordering::SeqCst));
    println!(
        "  peak parallelism {}",
        stats.peak_parallelism.load(Ordering::SeqCst)
    );
    println!("  drained outputs  {}", output.len());

    let (errors, has_errors) = pool.errors();
    if has_errors {
        println!("{}", "errors:".red().bold());
        for err in &errors {
            println!("  [{}] {}", err.index(), err);
        }
    }

    pool.close();
    result.context("batch failed")?;
    Ok(())
}

fn describe_limit(limit: Option<usize>) -> String {
    match limit {
        Some(limit) => limit.to_string(),
        None => "unbounded".to_string(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::try_init_with_level(LogLevel::from_verbosity(cli.verbose))
        .context("Failed to install logger")?;

    match cli.command {
        Commands::Run {
            pool,
            tasks,
            work_ms,
            fail_every,
            flaky_every,
        } => {
            let config = pool.load()?;
            let batch = Batch {
                tasks,
                work: Duration::from_millis(work_ms),
                fail_every: fail_every.unwrap_or(0),
                flaky_every: flaky_every.unwrap_or(0),
            };
            run_batch(&config, &batch)?;
        }
        Commands::Config { pool } => {
            let config = pool.load()?;
            print!("{}", config.to_toml_string()?);
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
