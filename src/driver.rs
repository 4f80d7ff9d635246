//! Benchmark orchestration: preload pass, parallel worker processes and
//! result aggregation.
//!
//! # Protocol
//!
//! 1. Run one workload in-process with `preload` iterations and print its
//!    report before anything else.
//! 2. Spawn `parallelism` worker processes. Each opens its own backend from
//!    the same [`BackendConfig`] and runs the full workload.
//! 3. A supervisor task per worker waits for the child (bounded by the
//!    worker timeout), parses its single JSON report line and posts the
//!    outcome onto an unbounded channel.
//! 4. After every supervisor has been joined the channel is drained and
//!    reports are printed in completion order, followed by failures, a
//!    combined line and the on-disk footprint.

use crate::backend::AnyBackend;
use crate::config::{BackendConfig, BenchConfig};
use crate::error::{BenchError, Result};
use crate::metrics::{MetricsTuple, WorkerReport};
use crate::workload::{WorkerJob, WorkloadRunner, WorkloadSpec};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// How long to wait for a killed worker to exit.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Program (and leading arguments) used to start worker processes.
///
/// The launcher appends `worker --job <json>` to the configured arguments.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-execute the running binary.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn spawn(&self, job: &WorkerJob) -> Result<Child> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg("worker")
            .arg("--job")
            .arg(serde_json::to_string(job)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

/// Why a worker produced no report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The process could not be started.
    Spawn(String),
    /// The process exited unsuccessfully; `None` if killed by a signal.
    Exited(Option<i32>),
    /// The process was still running at the deadline and was killed.
    TimedOut(Duration),
    /// The process exited cleanly but its report was missing or unreadable.
    MissingReport(String),
}

/// A worker of the parallel pass that did not deliver a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub worker: usize,
    pub kind: FailureKind,
}

impl WorkerFailure {
    pub fn to_error(&self) -> BenchError {
        match &self.kind {
            FailureKind::TimedOut(timeout) => BenchError::WorkerTimeout {
                worker: self.worker,
                timeout: *timeout,
            },
            _ => BenchError::WorkerFailed {
                worker: self.worker,
                reason: self.kind.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Spawn(reason) => write!(f, "could not spawn: {}", reason),
            FailureKind::Exited(Some(code)) => write!(f, "exited with status {}", code),
            FailureKind::Exited(None) => write!(f, "terminated by signal"),
            FailureKind::TimedOut(timeout) => {
                write!(f, "still running after {:?}, killed", timeout)
            }
            FailureKind::MissingReport(reason) => write!(f, "no usable report: {}", reason),
        }
    }
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} FAILED: {}", self.worker, self.kind)
    }
}

enum WorkerMessage {
    Finished(WorkerReport),
    Failed(WorkerFailure),
}

/// Everything measured for one backend configuration.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub backend: BackendConfig,
    pub preload: WorkerReport,
    /// Parallel-pass reports in completion order.
    pub workers: Vec<WorkerReport>,
    pub failures: Vec<WorkerFailure>,
    /// Allocated bytes of the backend's files after the run.
    pub disk_usage_bytes: Option<u64>,
}

impl RunReport {
    /// Sum of all successful parallel-pass tuples.
    pub fn combined(&self) -> MetricsTuple {
        MetricsTuple::combine(self.workers.iter().map(|report| &report.metrics))
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs preload and parallel passes for backend configurations.
pub struct BenchmarkDriver {
    bench: BenchConfig,
    launcher: WorkerLauncher,
}

impl BenchmarkDriver {
    pub fn new(bench: BenchConfig, launcher: WorkerLauncher) -> Self {
        Self { bench, launcher }
    }

    pub fn bench(&self) -> &BenchConfig {
        &self.bench
    }

    /// Benchmark one backend configuration and print its results.
    ///
    /// Worker failures do not abort the run; they are listed in the
    /// returned report.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the preload pass
    /// fails.
    pub async fn run(&self, backend: &BackendConfig) -> Result<RunReport> {
        self.bench.validate()?;
        backend.validate()?;

        println!(
            "\n\nMultiple Process ({}) Testing: {}",
            self.bench.parallelism,
            backend.kind()
        );
        println!("{}", backend);

        println!("Preloading");
        let preload = self.preload(backend).await?;
        println!("{}", preload);

        let (workers, failures) = self.parallel_pass(backend).await;
        for report in &workers {
            println!("{}", report);
        }
        for failure in &failures {
            tracing::warn!("{}", failure);
            println!("{}", failure);
        }

        let disk_usage_bytes = match backend.storage_root() {
            Some(root) => match disk_footprint(root) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!("Could not measure {:?}: {}", root, e);
                    None
                }
            },
            None => None,
        };

        let report = RunReport {
            backend: backend.clone(),
            preload,
            workers,
            failures,
            disk_usage_bytes,
        };

        if !report.workers.is_empty() {
            println!(
                "combined ({} workers): {{{}}}",
                report.workers.len(),
                report.combined().summarize()
            );
        }
        if let Some(bytes) = report.disk_usage_bytes {
            println!("on-disk footprint: {:.2} MiB", bytes as f64 / (1024.0 * 1024.0));
        }

        Ok(report)
    }

    /// Benchmark several configurations one after another.
    pub async fn run_suite(&self, backends: &[BackendConfig]) -> Result<Vec<RunReport>> {
        let mut reports = Vec::with_capacity(backends.len());
        for backend in backends {
            reports.push(self.run(backend).await?);
        }
        Ok(reports)
    }

    async fn preload(&self, backend: &BackendConfig) -> Result<WorkerReport> {
        let spec = WorkloadSpec::from_bench(&self.bench, self.bench.preload);
        let backend = backend.clone();

        tokio::task::spawn_blocking(move || {
            let mut instance = AnyBackend::open(&backend)?;
            WorkloadRunner::new(spec).run(&mut instance)
        })
        .await
        .map_err(|e| {
            BenchError::IoError(io::Error::new(
                io::ErrorKind::Other,
                format!("preload task failed: {}", e),
            ))
        })?
    }

    fn job(&self, worker: usize, backend: &BackendConfig) -> WorkerJob {
        let progress = if self.bench.progress_worker == Some(worker) {
            Some(self.bench.progress_interval)
        } else {
            None
        };
        WorkerJob {
            worker_id: worker,
            backend: backend.clone(),
            workload: WorkloadSpec::from_bench(&self.bench, self.bench.iterations)
                .with_progress(progress),
        }
    }

    async fn parallel_pass(
        &self,
        backend: &BackendConfig,
    ) -> (Vec<WorkerReport>, Vec<WorkerFailure>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timeout = self.bench.worker_timeout();
        let mut supervisors = Vec::with_capacity(self.bench.parallelism);

        for worker in 0..self.bench.parallelism {
            let job = self.job(worker, backend);
            match self.launcher.spawn(&job) {
                Ok(child) => {
                    tracing::debug!("Spawned worker {} (pid {:?})", worker, child.id());
                    supervisors.push(tokio::spawn(supervise(worker, child, timeout, tx.clone())));
                }
                Err(e) => {
                    let _ = tx.send(WorkerMessage::Failed(WorkerFailure {
                        worker,
                        kind: FailureKind::Spawn(e.to_string()),
                    }));
                }
            }
        }
        drop(tx);

        for supervisor in supervisors {
            if let Err(e) = supervisor.await {
                tracing::error!("Worker supervisor task failed: {}", e);
            }
        }

        let mut workers = Vec::new();
        let mut failures = Vec::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                WorkerMessage::Finished(report) => workers.push(report),
                WorkerMessage::Failed(failure) => failures.push(failure),
            }
        }
        (workers, failures)
    }
}

async fn supervise(
    worker: usize,
    child: Child,
    timeout: Option<Duration>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
) {
    let message = match collect(worker, child, timeout).await {
        Ok(report) => WorkerMessage::Finished(report),
        Err(kind) => WorkerMessage::Failed(WorkerFailure { worker, kind }),
    };
    // The driver keeps the receiver alive until every supervisor is joined
    let _ = tx.send(message);
}

async fn collect(
    worker: usize,
    mut child: Child,
    timeout: Option<Duration>,
) -> std::result::Result<WorkerReport, FailureKind> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| FailureKind::MissingReport("stdout was not captured".to_string()))?;

    let run = async {
        let mut output = Vec::new();
        let (status, read) = tokio::join!(child.wait(), stdout.read_to_end(&mut output));
        read?;
        Ok::<_, io::Error>((status?, output))
    };
    let finished = match timeout {
        Some(limit) => tokio::time::timeout(limit, run).await.ok(),
        None => Some(run.await),
    };

    let Some(finished) = finished else {
        let limit = timeout.unwrap_or_default();
        reap(worker, &mut child).await;
        return Err(FailureKind::TimedOut(limit));
    };
    let (status, stdout) = finished.map_err(|e| FailureKind::MissingReport(e.to_string()))?;

    if !status.success() {
        return Err(FailureKind::Exited(status.code()));
    }

    let stdout = String::from_utf8_lossy(&stdout);
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| FailureKind::MissingReport("empty output".to_string()))?;
    let report: WorkerReport =
        serde_json::from_str(line).map_err(|e| FailureKind::MissingReport(e.to_string()))?;

    if report.worker_id != Some(worker) {
        return Err(FailureKind::MissingReport(format!(
            "report claims worker {:?}",
            report.worker_id
        )));
    }
    Ok(report)
}

/// Kill a worker that overran its deadline and wait for its exit status.
async fn reap(worker: usize, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!("Could not kill worker {}: {}", worker, e);
    }
    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!("Worker {} killed after deadline: {}", worker, status),
        Ok(Err(e)) => tracing::warn!("Waiting for killed worker {} failed: {}", worker, e),
        Err(_) => tracing::warn!(
            "Worker {} still running {:?} after being killed",
            worker,
            REAP_TIMEOUT
        ),
    }
}

/// Bytes allocated on disk for `path`.
///
/// Directories are walked recursively. For a single file, SQLite's `-wal`
/// and `-shm` companions are included when present.
pub fn disk_footprint(path: &Path) -> io::Result<u64> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        let mut total = metadata.blocks() * 512;
        for entry in std::fs::read_dir(path)? {
            total += disk_footprint(&entry?.path())?;
        }
        return Ok(total);
    }

    let mut total = metadata.blocks() * 512;
    if metadata.is_file() {
        for suffix in ["-wal", "-shm"] {
            let mut companion = OsString::from(path.as_os_str());
            companion.push(suffix);
            if let Ok(meta) = std::fs::metadata(PathBuf::from(companion)) {
                total += meta.blocks() * 512;
            }
        }
    }
    Ok(total)
}
