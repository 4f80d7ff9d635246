//! Synthetic get-or-put workload and the worker-process entry point.

use crate::backend::{AnyBackend, Backend};
use crate::config::{BackendConfig, BenchConfig};
use crate::error::{BenchError, Result};
use crate::metrics::{LatencyRecorder, MetricsTuple, WorkerReport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::{Builder, Uuid};

/// Parameters of one workload run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Operations to perform.
    pub iterations: u64,
    /// Inclusive lower bound of the sampled key space.
    pub first_key: u64,
    /// Inclusive upper bound of the sampled key space.
    pub key_range: u64,
    /// Log progress every this many iterations.
    #[serde(default)]
    pub progress_interval: Option<u64>,
    /// Fixed RNG seed; absent draws one from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl WorkloadSpec {
    pub fn new(iterations: u64, first_key: u64, key_range: u64) -> Self {
        Self {
            iterations,
            first_key,
            key_range,
            progress_interval: None,
            seed: None,
        }
    }

    /// Spec for `iterations` operations over the key space of `bench`.
    pub fn from_bench(bench: &BenchConfig, iterations: u64) -> Self {
        Self::new(iterations, bench.first_key, bench.key_range)
    }

    pub fn with_progress(mut self, interval: Option<u64>) -> Self {
        self.progress_interval = interval.filter(|n| *n > 0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates the key space.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `first_key` is greater than `key_range`.
    pub fn validate(&self) -> Result<()> {
        if self.first_key > self.key_range {
            return Err(BenchError::ConfigError(format!(
                "first_key ({}) cannot exceed key_range ({})",
                self.first_key, self.key_range
            )));
        }
        Ok(())
    }
}

/// Runs a [`WorkloadSpec`] against one backend instance.
///
/// Each iteration samples a key uniformly from `[first_key, key_range]` and
/// a fresh random value, then times `get` and, on a miss, the following
/// `put`. Elapsed time is accumulated across all iterations.
pub struct WorkloadRunner {
    spec: WorkloadSpec,
    rng: StdRng,
    worker_id: Option<usize>,
}

impl WorkloadRunner {
    pub fn new(spec: WorkloadSpec) -> Self {
        let rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            spec,
            rng,
            worker_id: None,
        }
    }

    /// Tag the report (and progress logs) with a worker index.
    pub fn with_worker_id(mut self, worker_id: Option<usize>) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    fn next_key(&mut self) -> String {
        self.rng
            .gen_range(self.spec.first_key..=self.spec.key_range)
            .to_string()
    }

    /// Random version-4 UUID in 32-character hex form.
    fn next_value(&mut self) -> String {
        let uuid: Uuid = Builder::from_random_bytes(self.rng.gen()).into_uuid();
        uuid.simple().to_string()
    }

    /// Execute the workload and produce its report.
    ///
    /// # Errors
    ///
    /// An empty key space is rejected before any operation. Any backend
    /// error aborts the run; no partial report is produced.
    pub fn run<B: Backend + ?Sized>(&mut self, backend: &mut B) -> Result<WorkerReport> {
        self.spec.validate()?;

        let mut metrics = MetricsTuple {
            iterations: self.spec.iterations,
            ..MetricsTuple::default()
        };
        let mut latency = LatencyRecorder::new()?;

        for i in 0..self.spec.iterations {
            let key = self.next_key();
            let value = self.next_value();

            let start = Instant::now();
            if backend.get(&key)?.is_some() {
                metrics.hits += 1;
            } else {
                backend.put(&key, &value)?;
                metrics.bytes_stored += (key.len() + value.len()) as u64;
            }
            let elapsed = start.elapsed();

            metrics.elapsed_ns += elapsed.as_nanos() as u64;
            latency.record(elapsed);

            if let Some(interval) = self.spec.progress_interval {
                let done = i + 1;
                if done % interval == 0 {
                    let avg_time_ms = metrics.elapsed_ns as f64 / done as f64 / 1_000_000.0;
                    tracing::info!(
                        "worker {:?} at i={}: avg_time_ms {:.2}",
                        self.worker_id,
                        done,
                        avg_time_ms
                    );
                }
            }
        }

        Ok(WorkerReport {
            worker_id: self.worker_id,
            metrics,
            latency: latency.summary(),
        })
    }
}

/// Instructions for one worker process, passed on its command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerJob {
    pub worker_id: usize,
    pub backend: BackendConfig,
    pub workload: WorkloadSpec,
}

impl WorkerJob {
    /// Open a private backend instance and run the workload on it.
    pub fn run(&self) -> Result<WorkerReport> {
        let mut backend = AnyBackend::open(&self.backend)?;
        WorkloadRunner::new(self.workload.clone())
            .with_worker_id(Some(self.worker_id))
            .run(&mut backend)
    }
}
