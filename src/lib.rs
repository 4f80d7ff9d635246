//! # kvbench - Multi-Process Key/Value Backend Benchmark
//!
//! kvbench measures how interchangeable key/value storage strategies behave
//! when several independent OS processes hammer the same key space with a
//! get-or-put workload.
//!
//! ## Architecture
//!
//! - **Backends**: an in-memory baseline, hash-sharded unit files guarded by
//!   advisory file locks, and a single SQLite file (optionally in WAL mode)
//! - **Workload**: uniform keys over a fixed range; a miss is followed by a
//!   put of a random value
//! - **Driver**: an in-process preload pass, then `parallelism` worker
//!   processes whose reports come back over a result channel
//! - **Metrics**: per-worker counters, derived statistics and a latency
//!   histogram
//!
//! ## Example Usage
//!
//! ```no_run
//! use kvbench::{BackendConfig, BenchConfig, BenchmarkDriver};
//! use kvbench::driver::WorkerLauncher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bench = BenchConfig::default()
//!         .with_parallelism(4)
//!         .with_iterations(10_000);
//!
//!     let driver = BenchmarkDriver::new(bench, WorkerLauncher::current_exe()?);
//!     let report = driver.run(&BackendConfig::sharded("./data/sharded_l1", 1)).await?;
//!
//!     println!("combined: {}", report.combined().summarize());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`backend`]: `Backend` trait and the three strategies
//! - [`shard`]: key to unit-file routing
//! - [`lock`]: advisory file locks
//! - [`unit`]: append-only record log behind each shard
//! - [`workload`]: workload runner and worker entry point
//! - [`driver`]: preload, worker processes and aggregation
//! - [`metrics`]: counters, derived statistics, latency
//! - [`config`]: configuration structures
//! - [`error`]: error types and result aliases

/// Storage strategies behind a common get/put trait
pub mod backend;

/// Configuration structures and validation
pub mod config;

/// Benchmark orchestration across worker processes
pub mod driver;

/// Advisory file locks
pub mod lock;

/// Counters, derived statistics and latency histograms
pub mod metrics;

/// Key to unit-file routing
pub mod shard;

/// Per-shard record log files
pub mod unit;

/// Get-or-put workload runner
pub mod workload;

/// Command-line interface
pub mod cli;

/// Error types and result aliases
pub mod error;

// Re-export commonly used types
pub use backend::{AnyBackend, Backend};
pub use config::{BackendConfig, BenchConfig, SuiteConfig};
pub use driver::BenchmarkDriver;
pub use error::{BenchError, Result};
