use kvbench::backend::{AnyBackend, Backend};
use kvbench::driver::{BenchmarkDriver, FailureKind, WorkerLauncher};
use kvbench::shard::ShardRouter;
use kvbench::unit::UnitFile;
use kvbench::{BackendConfig, BenchConfig};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn launcher() -> WorkerLauncher {
    WorkerLauncher::new(env!("CARGO_BIN_EXE_kvbench"))
}

fn quiet(bench: BenchConfig) -> BenchConfig {
    bench.with_progress(0, None)
}

#[tokio::test]
async fn first_access_misses_then_workers_hit() {
    let temp_dir = TempDir::new().unwrap();
    let backend = BackendConfig::sharded(temp_dir.path().join("l0"), 0);
    let bench = quiet(
        BenchConfig::default()
            .with_parallelism(1)
            .with_iterations(1)
            .with_key_space(1, 1)
            .with_preload(1),
    );

    let report = BenchmarkDriver::new(bench, launcher())
        .run(&backend)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.preload.metrics.summarize().hit_rate, 0.0);
    assert_eq!(report.preload.metrics.bytes_stored, 33);

    assert_eq!(report.workers.len(), 1);
    let worker = &report.workers[0];
    assert_eq!(worker.worker_id, Some(0));
    assert_eq!(worker.metrics.summarize().hit_rate, 1.0);
    assert_eq!(worker.metrics.bytes_stored, 0);

    assert!(temp_dir.path().join("l0").join("single.unit").exists());
    assert!(report.disk_usage_bytes.unwrap() > 0);
}

#[tokio::test]
async fn contended_single_unit_stays_consistent() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("l0");
    let backend = BackendConfig::sharded(base.clone(), 0);
    let bench = quiet(
        BenchConfig::default()
            .with_parallelism(4)
            .with_iterations(200)
            .with_key_space(0, 50)
            .with_preload(0),
    );

    let report = BenchmarkDriver::new(bench, launcher())
        .run(&backend)
        .await
        .unwrap();

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    let mut ids: Vec<_> = report.workers.iter().filter_map(|w| w.worker_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert_eq!(report.combined().iterations, 800);

    let unit = UnitFile::open_read(&ShardRouter::new(base, 0).unit_path("0")).unwrap();
    assert!(unit.verify().is_ok());

    let mut reader = AnyBackend::open(&backend).unwrap();
    for k in 0..=50 {
        if let Some(value) = reader.get(&k.to_string()).unwrap() {
            assert_eq!(value.len(), 32);
            assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}

#[tokio::test]
async fn transactional_wal_workers_share_one_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sqlite").join("single.sqlite");
    let backend = BackendConfig::transactional(path.clone(), true);
    let bench = quiet(
        BenchConfig::default()
            .with_parallelism(3)
            .with_iterations(100)
            .with_key_space(0, 30)
            .with_preload(31),
    );

    let report = BenchmarkDriver::new(bench, launcher())
        .run(&backend)
        .await
        .unwrap();

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert_eq!(report.workers.len(), 3);
    assert!(path.exists());
}

#[tokio::test]
async fn crashed_worker_reported_separately() {
    let bench = quiet(BenchConfig::default().with_parallelism(2).with_preload(5));

    let report = BenchmarkDriver::new(bench, WorkerLauncher::new("false"))
        .run(&BackendConfig::InMemory)
        .await
        .unwrap();

    assert_eq!(report.preload.metrics.iterations, 5);
    assert!(report.workers.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.kind, FailureKind::Exited(Some(1)))));
}

#[tokio::test]
async fn report_without_json_is_malformed() {
    let bench = quiet(BenchConfig::default().with_parallelism(1).with_preload(0));

    let report = BenchmarkDriver::new(bench, WorkerLauncher::new("echo"))
        .run(&BackendConfig::InMemory)
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].kind, FailureKind::MissingReport(_)));
}

#[tokio::test]
async fn hung_worker_is_killed_at_deadline() {
    let bench = quiet(
        BenchConfig::default()
            .with_parallelism(1)
            .with_preload(0)
            .with_worker_timeout(Some(Duration::from_secs(1))),
    );
    let hanging = WorkerLauncher::new("sh").with_args(["-c", "sleep 30"]);

    let start = Instant::now();
    let report = BenchmarkDriver::new(bench, hanging)
        .run(&BackendConfig::InMemory)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(20));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        report.failures[0].kind,
        FailureKind::TimedOut(Duration::from_secs(1))
    );
}

#[tokio::test]
async fn missing_program_is_a_spawn_failure() {
    let bench = quiet(BenchConfig::default().with_parallelism(2).with_preload(0));

    let report = BenchmarkDriver::new(bench, WorkerLauncher::new("/nonexistent/kvbench"))
        .run(&BackendConfig::InMemory)
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 2);
    assert!(matches!(report.failures[0].kind, FailureKind::Spawn(_)));
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let bench = BenchConfig::default().with_parallelism(0);
    let result = BenchmarkDriver::new(bench, launcher())
        .run(&BackendConfig::InMemory)
        .await;
    assert!(result.is_err());
}
