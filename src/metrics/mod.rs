use crate::error::{BenchError, Result};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const NANOS_PER_MS: f64 = 1_000_000.0;
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Raw counters produced once by a workload run.
///
/// `bytes_stored` counts key+value bytes written on the put path only;
/// reads are not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsTuple {
    pub elapsed_ns: u64,
    pub hits: u64,
    pub iterations: u64,
    pub bytes_stored: u64,
}

impl MetricsTuple {
    /// Derived statistics for reporting.
    pub fn summarize(&self) -> ResultSummary {
        let time_ms = self.elapsed_ns as f64 / NANOS_PER_MS;
        let (avg_cycle_ms, hit_rate) = if self.iterations == 0 {
            (0.0, 0.0)
        } else {
            (
                time_ms / self.iterations as f64,
                self.hits as f64 / self.iterations as f64,
            )
        };

        ResultSummary {
            time_ms,
            avg_cycle_ms: round_to(avg_cycle_ms, 4),
            hit_rate: round_to(hit_rate, 6),
            bytes_stored_mb: round_to(self.bytes_stored as f64 / BYTES_PER_MIB, 2),
        }
    }

    /// Field-wise sum of several tuples.
    pub fn combine<'a>(tuples: impl IntoIterator<Item = &'a MetricsTuple>) -> MetricsTuple {
        tuples
            .into_iter()
            .fold(MetricsTuple::default(), |acc, t| MetricsTuple {
                elapsed_ns: acc.elapsed_ns + t.elapsed_ns,
                hits: acc.hits + t.hits,
                iterations: acc.iterations + t.iterations,
                bytes_stored: acc.bytes_stored + t.bytes_stored,
            })
    }
}

/// Statistics derived from a [`MetricsTuple`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub time_ms: f64,
    pub avg_cycle_ms: f64,
    pub hit_rate: f64,
    pub bytes_stored_mb: f64,
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time_ms: {:.3}, avg_cycle_ms: {}, hit_rate: {}, bytes_stored_mb: {}",
            self.time_ms, self.avg_cycle_ms, self.hit_rate, self.bytes_stored_mb
        )
    }
}

/// Round to `places` decimals, ties to even on the exact binary value.
///
/// `0.125` becomes `0.12` and `2.675` (stored as 2.67499...) becomes `2.67`.
pub fn round_to(value: f64, places: usize) -> f64 {
    format!("{:.*}", places, value).parse().unwrap_or(value)
}

/// Per-operation latency distribution in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p50: {} µs, p95: {} µs, p99: {} µs, max: {} µs",
            self.p50_us, self.p95_us, self.p99_us, self.max_us
        )
    }
}

/// Histogram of iteration latencies
pub struct LatencyRecorder {
    histogram: Histogram<u64>,
}

impl LatencyRecorder {
    pub fn new() -> Result<Self> {
        let histogram = Histogram::<u64>::new(3)
            .map_err(|e| BenchError::ConfigError(format!("latency histogram: {}", e)))?;
        Ok(Self { histogram })
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        self.histogram.saturating_record(micros);
    }

    pub fn summary(&self) -> LatencySummary {
        if self.histogram.len() == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            count: self.histogram.len(),
            p50_us: self.histogram.value_at_quantile(0.50),
            p95_us: self.histogram.value_at_quantile(0.95),
            p99_us: self.histogram.value_at_quantile(0.99),
            max_us: self.histogram.max(),
        }
    }
}

/// Everything one workload run reports back to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Worker index in the parallel pass; `None` for the preload pass.
    pub worker_id: Option<usize>,
    pub metrics: MetricsTuple,
    pub latency: LatencySummary,
}

impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.worker_id {
            Some(id) => write!(f, "worker {}: ", id)?,
            None => write!(f, "preload: ")?,
        }
        write!(f, "{{{}}} [{}]", self.metrics.summarize(), self.latency)
    }
}
