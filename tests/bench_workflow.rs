//! End-to-end bench workflow on the replay instruments: parameters on disk,
//! calibration file, measurement, template and report export.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use vco_bench::bench::{try_measure, BenchController, SharedBench};
use vco_bench::calibration::CalibrationTable;
use vco_bench::config::{BenchConfig, TimingConfig};
use vco_bench::error::BenchError;
use vco_bench::instrument::mock::MockRole;
use vco_bench::measurement::{DerivedPoint, RawPoint};
use vco_bench::results::ReportExporter;
use vco_bench::sweep::{CancellationToken, NoopObserver, SecondaryParams, SweepState};

fn bench_config(dir: &Path) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.files.params = dir.join("params.toml");
    config.files.calibration = dir.join("calibration.csv");
    config.files.calibration_template = dir.join("calibration-template.csv");
    config.files.output_dir = dir.join("reports");
    config.timing = TimingConfig {
        point_settle: Duration::ZERO,
        first_point_settle: Duration::ZERO,
        marker_settle: Duration::ZERO,
        series_settle: Duration::ZERO,
    };
    config
}

fn small_params() -> SecondaryParams {
    SecondaryParams {
        u_src_drift_1: 4.7,
        u_src_drift_2: 5.0,
        u_src_drift_3: 0.0,
        u_vco_min: 0.0,
        u_vco_max: 2.0,
        u_vco_delta: 1.0,
        ..SecondaryParams::default()
    }
}

async fn connected_bench(dir: &Path, params: &SecondaryParams) -> BenchController {
    let config = bench_config(dir);
    params.save(&config.files.params).unwrap();
    let mut bench = BenchController::new(config).unwrap();
    bench.connect().await.unwrap();
    bench
}

#[tokio::test]
async fn test_measure_and_export_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut bench = connected_bench(dir.path(), &small_params()).await;

    let report = bench
        .measure(&CancellationToken::new(), &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(report.points, 6);
    assert_eq!(report.table.blocks().len(), 2);
    assert_eq!(bench.state(), SweepState::Completed);
    assert!(bench.has_result());

    let template = CalibrationTable::load(dir.path().join("calibration-template.csv"));
    assert_eq!(template.len(), 6);

    let exported = ReportExporter::new(dir.path().join("reports"))
        .export(&report.table, &report.metadata())
        .unwrap();
    let text = fs::read_to_string(exported.join("table.csv")).unwrap();
    assert!(text.starts_with("# "));
    assert!(text.contains(&report.run_id.to_string()));
    assert!(text.contains("U_drift = 4.70 V"));
    assert!(text.contains("U_drift = 5.00 V"));
    assert!(exported.join("charts.json").exists());

    let mock = bench.mock_bench().unwrap();
    assert!(!mock.output_enabled().await);
    assert!(mock.auto_calibration().await);
}

#[tokio::test]
async fn test_calibration_file_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("calibration.csv"),
        "supply-voltage,control-voltage,frequency-offset,power-offset\n5.0,1.0,2.0,-1.0\n",
    )
    .unwrap();
    let mut bench = connected_bench(dir.path(), &small_params()).await;
    let mut points = Vec::new();
    let mut observer = |_raw: &RawPoint, derived: &DerivedPoint| points.push(*derived);

    bench
        .measure(&CancellationToken::new(), &mut observer)
        .await
        .unwrap();

    let commands = bench.mock_bench().unwrap().commands(MockRole::Analyzer).await;
    assert!(commands.iter().any(|c| c == ":SENS:FREQ:OFFS 2.000MHz"));
    assert!(commands.iter().any(|c| c == ":DISP:WIND:TRAC:Y:RLEV:OFFS -1.000"));

    let calibrated = points
        .iter()
        .find(|p| p.drift_voltage == 5.0 && p.control_voltage == 1.0)
        .unwrap();
    let plain = points
        .iter()
        .find(|p| p.drift_voltage == 4.7 && p.control_voltage == 1.0)
        .unwrap();
    // Same tuning slope, 0.3 V more drift, plus the 2 MHz offset.
    assert!((calibrated.frequency_mhz - plain.frequency_mhz - 2.3).abs() < 1e-6);
    assert!((calibrated.power_dbm - plain.power_dbm + 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_cancelled_measure_keeps_partial_points() {
    let dir = tempfile::tempdir().unwrap();
    let mut bench = connected_bench(dir.path(), &small_params()).await;
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let mut seen = 0;
    let mut observer = move |_raw: &RawPoint, _derived: &DerivedPoint| {
        seen += 1;
        if seen == 2 {
            stop.cancel();
        }
    };

    let err = bench.measure(&cancel, &mut observer).await.unwrap_err();

    assert!(matches!(err, BenchError::Cancelled { completed: 2 }));
    assert_eq!(bench.state(), SweepState::Cancelled);
    assert!(!bench.has_result());
    assert_eq!(bench.aggregator().len(), 2);

    let template = CalibrationTable::load(dir.path().join("calibration-template.csv"));
    assert_eq!(template.len(), 2);

    let mock = bench.mock_bench().unwrap();
    assert!(!mock.output_enabled().await);
    assert!(mock.auto_calibration().await);

    // The bench accepts a new sweep afterwards.
    let report = bench
        .measure(&CancellationToken::new(), &mut NoopObserver)
        .await
        .unwrap();
    assert_eq!(report.points, 6);
}

#[tokio::test]
async fn test_params_reloaded_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut bench = connected_bench(dir.path(), &small_params()).await;
    let first = bench
        .measure(&CancellationToken::new(), &mut NoopObserver)
        .await
        .unwrap();
    assert_eq!(first.points, 6);

    let wider = SecondaryParams {
        u_vco_max: 4.0,
        ..small_params()
    };
    wider.save(&bench.config().files.params).unwrap();

    let second = bench
        .measure(&CancellationToken::new(), &mut NoopObserver)
        .await
        .unwrap();
    assert_eq!(second.points, 10);
    assert_eq!(bench.params().u_vco_max, 4.0);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_unsaved_params_are_measured() {
    let dir = tempfile::tempdir().unwrap();
    let mut bench = connected_bench(dir.path(), &SecondaryParams::default()).await;
    let edited = SecondaryParams {
        u_src_drift_2: 0.0,
        u_src_drift_3: 0.0,
        u_vco_max: 2.0,
        ..SecondaryParams::default()
    };
    bench.set_params(edited.clone()).unwrap();
    assert!(bench.has_unsaved_params());
    assert_eq!(bench.plan().unwrap().len(), 3);

    let report = bench
        .measure(&CancellationToken::new(), &mut NoopObserver)
        .await
        .unwrap();

    assert_eq!(report.points, 3);
    assert_eq!(report.params, edited);
    assert_eq!(bench.params(), &edited);
    // The file on disk is untouched until saved.
    let on_disk = SecondaryParams::load(&bench.config().files.params).unwrap();
    assert_eq!(on_disk, SecondaryParams::default());
}

#[tokio::test]
async fn test_saved_params_reload_from_file_again() {
    let dir = tempfile::tempdir().unwrap();
    let mut bench = connected_bench(dir.path(), &SecondaryParams::default()).await;
    bench.set_params(small_params()).unwrap();
    bench.save_params().unwrap();
    assert!(!bench.has_unsaved_params());

    let wider = SecondaryParams {
        u_vco_max: 4.0,
        ..small_params()
    };
    wider.save(&bench.config().files.params).unwrap();

    let report = bench
        .measure(&CancellationToken::new(), &mut NoopObserver)
        .await
        .unwrap();
    assert_eq!(report.points, 10);
}

#[tokio::test]
async fn test_clear_results_drops_last_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut bench = connected_bench(dir.path(), &small_params()).await;
    bench
        .measure(&CancellationToken::new(), &mut NoopObserver)
        .await
        .unwrap();

    bench.clear_results();
    assert!(!bench.has_result());
    assert!(bench.aggregator().is_empty());
    assert!(bench.last_report().is_none());
}

#[tokio::test]
async fn test_shared_bench_serializes_measurements() {
    let dir = tempfile::tempdir().unwrap();
    let bench = connected_bench(dir.path(), &small_params()).await;
    let shared: SharedBench = Arc::new(Mutex::new(bench));

    {
        let _held = shared.lock().await;
        let err = try_measure(&shared, &CancellationToken::new(), &mut NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::SweepInProgress));
    }

    let report = try_measure(&shared, &CancellationToken::new(), &mut NoopObserver)
        .await
        .unwrap();
    assert_eq!(report.points, 6);
}
