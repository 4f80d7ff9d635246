use crate::backend::{check_contract, AnyBackend, Backend};
use crate::config::{BackendConfig, BenchConfig, SuiteConfig};
use crate::driver::{BenchmarkDriver, RunReport, WorkerLauncher};
use crate::error::{BenchError, Result};
use crate::workload::WorkerJob;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kvbench")]
#[command(about = "Multi-process benchmark of key/value storage strategies", long_about = None)]
pub struct Command {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Benchmark a single backend configuration
    Run {
        #[command(flatten)]
        backend: BackendArgs,

        #[command(flatten)]
        bench: BenchArgs,
    },

    /// Benchmark every backend of a suite
    Suite {
        /// Suite file written by `init-suite`; the reference suite is used if absent
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Root directory of the reference suite's storage
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Write the reference suite to a JSON file for editing
    InitSuite {
        /// Output file
        #[arg(short, long, default_value = "./suite.json")]
        output: PathBuf,

        /// Root directory of the suite's storage
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Put a key-value pair
    Put {
        /// Key to store
        key: String,

        /// Value to store
        value: String,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Get value for a key
    Get {
        /// Key to retrieve
        key: String,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Check that a backend honours the get/put contract
    Check {
        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Run one worker job and print its report as JSON
    #[command(hide = true)]
    Worker {
        /// Serialized worker job
        #[arg(long)]
        job: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    InMemory,
    Sharded,
    Transactional,
}

/// Backend selection flags shared by several commands.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Storage strategy
    #[arg(short, long, value_enum, default_value = "sharded")]
    pub backend: BackendKind,

    /// Shard root directory, or the database file for `transactional`
    #[arg(short, long, default_value = "./data/kv")]
    pub path: PathBuf,

    /// Shard depth for `sharded`
    #[arg(short, long, default_value = "1")]
    pub levels: u32,

    /// Enable write-ahead logging for `transactional`
    #[arg(long, default_value = "false")]
    pub wal: bool,

    /// Fail a sharded operation after waiting this long for its lock
    #[arg(long)]
    pub lock_timeout_ms: Option<u64>,
}

impl BackendArgs {
    pub fn to_config(&self) -> BackendConfig {
        match self.backend {
            BackendKind::InMemory => BackendConfig::InMemory,
            BackendKind::Sharded => BackendConfig::sharded(self.path.clone(), self.levels)
                .with_lock_timeout(self.lock_timeout_ms.map(Duration::from_millis)),
            BackendKind::Transactional => {
                BackendConfig::transactional(self.path.clone(), self.wal)
            }
        }
    }
}

/// Workload and process-pool flags.
#[derive(Args, Debug, Clone)]
pub struct BenchArgs {
    /// Number of worker processes
    #[arg(long, default_value = "8")]
    pub parallelism: usize,

    /// Operations per worker
    #[arg(short, long, default_value = "50000")]
    pub iterations: u64,

    /// Inclusive upper bound of the key space
    #[arg(short, long, default_value = "100000")]
    pub key_range: u64,

    /// Inclusive lower bound of the key space
    #[arg(long, default_value = "0")]
    pub first_key: u64,

    /// Operations of the single-process preload pass
    #[arg(long, default_value = "20000")]
    pub preload: u64,

    /// Progress log cadence of worker 1 (0 disables)
    #[arg(long, default_value = "5000")]
    pub progress_interval: u64,

    /// Kill workers still running after this many seconds (0 waits forever)
    #[arg(long, default_value = "1800")]
    pub worker_timeout_secs: u64,
}

impl BenchArgs {
    pub fn to_config(&self) -> BenchConfig {
        let timeout = match self.worker_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        BenchConfig::default()
            .with_parallelism(self.parallelism)
            .with_iterations(self.iterations)
            .with_key_space(self.first_key, self.key_range)
            .with_preload(self.preload)
            .with_progress(self.progress_interval, Some(1))
            .with_worker_timeout(timeout)
    }
}

pub async fn execute_command(cmd: Command) -> Result<()> {
    match cmd.command {
        Commands::Run { backend, bench } => {
            execute_run_command(backend.to_config(), bench.to_config()).await
        }
        Commands::Suite { config, data_dir } => execute_suite_command(config, data_dir).await,
        Commands::InitSuite { output, data_dir } => execute_init_suite_command(output, data_dir),
        Commands::Put {
            key,
            value,
            backend,
        } => execute_put_command(key, value, backend.to_config()).await,
        Commands::Get { key, backend } => execute_get_command(key, backend.to_config()).await,
        Commands::Check { backend } => execute_check_command(backend.to_config()).await,
        Commands::Worker { job } => execute_worker_command(job),
    }
}

async fn execute_run_command(backend: BackendConfig, bench: BenchConfig) -> Result<()> {
    let driver = BenchmarkDriver::new(bench, WorkerLauncher::current_exe()?);
    let report = driver.run(&backend).await?;
    fail_on_missing_workers(std::slice::from_ref(&report), driver.bench().parallelism)
}

async fn execute_suite_command(config: Option<PathBuf>, data_dir: PathBuf) -> Result<()> {
    let suite = match config {
        Some(path) => SuiteConfig::load(&path)?,
        None => SuiteConfig::reference(&data_dir),
    };
    suite.validate()?;

    tracing::info!("Running suite of {} backends", suite.backends.len());
    let driver = BenchmarkDriver::new(suite.bench.clone(), WorkerLauncher::current_exe()?);
    let reports = driver.run_suite(&suite.backends).await?;
    fail_on_missing_workers(&reports, driver.bench().parallelism)
}

fn fail_on_missing_workers(reports: &[RunReport], parallelism: usize) -> Result<()> {
    let failed: usize = reports.iter().map(|r| r.failures.len()).sum();
    if failed > 0 {
        return Err(BenchError::WorkersFailed {
            failed,
            total: parallelism * reports.len(),
        });
    }
    Ok(())
}

fn execute_init_suite_command(output: PathBuf, data_dir: PathBuf) -> Result<()> {
    let suite = SuiteConfig::reference(&data_dir);
    suite.save(&output)?;

    println!(
        "✓ Wrote suite with {} backends to {}",
        suite.backends.len(),
        output.display()
    );
    for backend in &suite.backends {
        println!("  {}", backend);
    }
    Ok(())
}

/// Open `config` and apply `op` to it on the blocking pool.
async fn with_backend<T, F>(config: BackendConfig, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut AnyBackend) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut backend = AnyBackend::open(&config)?;
        op(&mut backend)
    })
    .await
    .map_err(|e| {
        BenchError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("backend task failed: {}", e),
        ))
    })?
}

async fn execute_put_command(key: String, value: String, config: BackendConfig) -> Result<()> {
    let shown = key.clone();
    with_backend(config, move |backend| backend.put(&key, &value)).await?;
    println!("✓ Put key: {}", shown);
    Ok(())
}

async fn execute_get_command(key: String, config: BackendConfig) -> Result<()> {
    let lookup = key.clone();
    match with_backend(config, move |backend| backend.get(&lookup)).await? {
        Some(value) => println!("{}", value),
        None => println!("Key not found: {}", key),
    }
    Ok(())
}

async fn execute_check_command(config: BackendConfig) -> Result<()> {
    let unseen_key = format!("kvbench-check-{:016x}", rand::random::<u64>());
    let name = config.to_string();
    with_backend(config, move |backend| check_contract(backend, &unseen_key)).await?;
    println!("✓ {} honours the get/put contract", name);
    Ok(())
}

/// Runs inside a worker process. Stdout carries exactly the report line.
fn execute_worker_command(job: String) -> Result<()> {
    let job: WorkerJob = serde_json::from_str(&job)?;
    tracing::debug!("Worker {} starting on {}", job.worker_id, job.backend);

    let report = job.run()?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
