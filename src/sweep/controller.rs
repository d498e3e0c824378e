//! The sweep state machine.
//!
//! [`SweepController::run`] walks a [`SweepPlan`] drift-major, applies the
//! calibration offsets of each setpoint, reads the analyzer marker and the
//! supply current, and feeds every reading to the [`ResultAggregator`] and the
//! caller's [`PointObserver`].
//!
//! Whatever way the sweep ends (all points visited, cancelled, or an instrument
//! fault) the shutdown sequence runs before `run` returns: source output off,
//! analyzer automatic calibration on.

use super::{CancellationToken, SweepPlan, SweepState};
use crate::calibration::CalibrationTable;
use crate::error::{AppResult, BenchError};
use crate::instrument::{PowerSource, SpectrumAnalyzer};
use crate::measurement::{DerivedPoint, RawPoint};
use crate::results::{HarmonicSet, ResultAggregator, ResultTable};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Settle delays used by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTiming {
    /// After applying the voltages of a point
    pub point_settle: Duration,
    /// After applying the voltages of the first point of a series
    pub first_point_settle: Duration,
    /// Between the two peak searches on the first point of a series
    pub marker_settle: Duration,
    /// Between two series
    pub series_settle: Duration,
}

impl SweepTiming {
    /// No delays at all, for replay benches and tests.
    pub fn immediate() -> Self {
        Self {
            point_settle: Duration::ZERO,
            first_point_settle: Duration::ZERO,
            marker_settle: Duration::ZERO,
            series_settle: Duration::ZERO,
        }
    }
}

impl Default for SweepTiming {
    fn default() -> Self {
        crate::config::TimingConfig::default().into()
    }
}

/// Receives every point as soon as it is measured.
///
/// Callbacks run on the sweep's own task; a slow observer stalls the sweep.
pub trait PointObserver: Send {
    /// A point was measured and derived.
    fn on_point(&mut self, raw: &RawPoint, derived: &DerivedPoint);

    /// The sweep is about to start on `plan`.
    fn on_start(&mut self, _plan: &SweepPlan) {}

    /// The sweep changed state.
    fn on_state(&mut self, _state: SweepState) {}
}

impl<F> PointObserver for F
where
    F: FnMut(&RawPoint, &DerivedPoint) + Send,
{
    fn on_point(&mut self, raw: &RawPoint, derived: &DerivedPoint) {
        self(raw, derived)
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PointObserver for NoopObserver {
    fn on_point(&mut self, _raw: &RawPoint, _derived: &DerivedPoint) {}
}

/// Drives the source and the analyzer through a sweep.
///
/// Assumes exclusive use of both instruments for the duration of `run`;
/// callers serialize sweeps.
pub struct SweepController {
    source: PowerSource,
    analyzer: SpectrumAnalyzer,
    timing: SweepTiming,
    run_id: Uuid,
}

impl SweepController {
    /// Controller over two connected instruments, with a fresh run id.
    pub fn new(source: PowerSource, analyzer: SpectrumAnalyzer, timing: SweepTiming) -> Self {
        Self {
            source,
            analyzer,
            timing,
            run_id: Uuid::new_v4(),
        }
    }

    /// Log sweeps under a caller-chosen run id.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Run id attached to the `sweep` span.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Settle delays in use.
    pub fn timing(&self) -> SweepTiming {
        self.timing
    }

    /// Run one sweep.
    ///
    /// Instruments must have been reset with the source output off. The
    /// aggregator is cleared first; on cancellation or failure it keeps the
    /// points measured so far.
    ///
    /// # Errors
    ///
    /// - [`BenchError::Cancelled`] when `cancel` was set before the last point
    /// - [`BenchError::Instrument`] on the first failed instrument exchange
    /// - [`BenchError::ShutdownFailed`] when all points were measured but the
    ///   instruments could not be returned to their safe state
    pub async fn run(
        &self,
        plan: &SweepPlan,
        calibration: &CalibrationTable,
        harmonics: &HarmonicSet,
        cancel: &CancellationToken,
        aggregator: &mut ResultAggregator,
        observer: &mut dyn PointObserver,
    ) -> AppResult<ResultTable> {
        let span = info_span!("sweep", run_id = %self.run_id, points = plan.len());
        async move {
            if plan.control_voltages().is_empty() {
                return Err(BenchError::Configuration(
                    "A sweep needs at least one control voltage".to_string(),
                ));
            }

            aggregator.clear();
            observer.on_start(plan);
            observer.on_state(SweepState::Running);
            info!(
                series = plan.drift_voltages().len(),
                calibrated = calibration.len(),
                "Sweep started"
            );

            let outcome = self.visit_grid(plan, calibration, cancel, aggregator, observer).await;

            observer.on_state(SweepState::ShuttingDown);
            let shutdown = self.shutdown().await;

            match (outcome, shutdown) {
                (Ok(()), Ok(())) => {
                    let table = aggregator.finalize(harmonics);
                    match &table {
                        Ok(_) => {
                            observer.on_state(SweepState::Completed);
                            info!(points = aggregator.len(), "Sweep completed");
                        }
                        Err(e) => {
                            observer.on_state(SweepState::Failed);
                            error!(error = %e, "Result table could not be built");
                        }
                    }
                    table
                }
                (Ok(()), Err(errors)) => {
                    observer.on_state(SweepState::Failed);
                    error!(failures = errors.len(), "Instrument shutdown failed");
                    Err(BenchError::ShutdownFailed(errors))
                }
                (Err(err), shutdown) => {
                    if let Err(errors) = shutdown {
                        for shutdown_err in &errors {
                            error!(error = %shutdown_err, "Instrument shutdown failed");
                        }
                    }
                    if err.is_cancellation() {
                        observer.on_state(SweepState::Cancelled);
                        info!(points = aggregator.len(), "Sweep cancelled");
                    } else {
                        observer.on_state(SweepState::Failed);
                        error!(error = %err, points = aggregator.len(), "Sweep failed");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn visit_grid(
        &self,
        plan: &SweepPlan,
        calibration: &CalibrationTable,
        cancel: &CancellationToken,
        aggregator: &mut ResultAggregator,
        observer: &mut dyn PointObserver,
    ) -> AppResult<()> {
        let series_count = plan.drift_voltages().len();
        for (series, &drift) in plan.drift_voltages().iter().enumerate() {
            check_cancel(cancel, aggregator)?;
            self.begin_series(plan, drift).await.map_err(instrument_error)?;

            for (index, &control) in plan.control_voltages().iter().enumerate() {
                check_cancel(cancel, aggregator)?;
                let raw = self
                    .measure_point(plan, calibration, drift, control, index == 0)
                    .await
                    .map_err(instrument_error)?;
                let derived = aggregator.add_point(raw);
                debug!(
                    drift,
                    control,
                    frequency_mhz = derived.frequency_mhz,
                    power_dbm = derived.power_dbm,
                    point = aggregator.len(),
                    "Point measured"
                );
                observer.on_point(&raw, &derived);
            }

            if series + 1 < series_count {
                settle(self.timing.series_settle).await;
            }
        }
        Ok(())
    }

    async fn begin_series(&self, plan: &SweepPlan, drift: f64) -> anyhow::Result<()> {
        let first_control = plan.control_voltages().first().copied().unwrap_or_default();
        info!(drift, "Series started");
        self.source.apply_supply(drift, plan.supply_current_ma).await?;
        self.source
            .apply_control(first_control, plan.control_current_ma)
            .await?;
        self.analyzer.set_window(&plan.window).await?;
        self.analyzer.set_ref_level(plan.ref_level_db).await?;
        self.analyzer.set_auto_calibration(false).await?;
        self.source.set_output(true).await
    }

    async fn measure_point(
        &self,
        plan: &SweepPlan,
        calibration: &CalibrationTable,
        drift: f64,
        control: f64,
        first_in_series: bool,
    ) -> anyhow::Result<RawPoint> {
        self.source.apply_supply(drift, plan.supply_current_ma).await?;
        self.source.apply_control(control, plan.control_current_ma).await?;
        settle(if first_in_series {
            self.timing.first_point_settle
        } else {
            self.timing.point_settle
        })
        .await;

        let offset = calibration.lookup(drift, control);
        self.analyzer
            .set_offsets(offset.freq_offset_mhz, offset.power_offset_db)
            .await?;
        self.analyzer.set_window(&plan.window).await?;

        self.analyzer.peak_search().await?;
        if first_in_series {
            // The marker may still sit on the previous series' peak.
            settle(self.timing.marker_settle).await;
            self.analyzer.peak_search().await?;
        }
        let marker = self.analyzer.read_marker().await?;
        let current_a = self.source.measure_supply_current().await?;

        Ok(RawPoint {
            drift_voltage: drift,
            control_voltage: control,
            frequency_hz: marker.frequency_hz,
            power_dbm: marker.power_dbm,
            current_a,
        })
    }

    /// Source output off, analyzer automatic calibration on.
    ///
    /// Both steps are attempted even if the first one fails.
    pub async fn shutdown(&self) -> Result<(), Vec<BenchError>> {
        let mut errors = Vec::new();
        if let Err(e) = self.source.set_output(false).await {
            warn!(error = %e, "Could not switch source output off");
            errors.push(instrument_error(e));
        }
        if let Err(e) = self.analyzer.set_auto_calibration(true).await {
            warn!(error = %e, "Could not restore analyzer auto calibration");
            errors.push(instrument_error(e));
        }
        if errors.is_empty() {
            debug!("Instruments in safe state");
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_cancel(cancel: &CancellationToken, aggregator: &ResultAggregator) -> AppResult<()> {
    if cancel.is_cancelled() {
        Err(BenchError::Cancelled {
            completed: aggregator.len(),
        })
    } else {
        Ok(())
    }
}

fn instrument_error(err: anyhow::Error) -> BenchError {
    BenchError::Instrument(format!("{:#}", err))
}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{MockBench, MockRole};
    use crate::instrument::{AnalyzerCommands, SourceCommands};
    use tracing_test::traced_test;

    fn controller(bench: &MockBench) -> SweepController {
        SweepController::new(
            PowerSource::new(bench.session(MockRole::Source), SourceCommands::default()),
            SpectrumAnalyzer::new(bench.session(MockRole::Analyzer), AnalyzerCommands::default()),
            SweepTiming::immediate(),
        )
    }

    #[tokio::test]
    async fn first_point_of_series_searches_peak_twice() {
        let bench = MockBench::new();
        let plan = SweepPlan::from_grid(vec![5.0], vec![0.0, 1.0]).unwrap();
        let mut aggregator = ResultAggregator::new();

        controller(&bench)
            .run(
                &plan,
                &CalibrationTable::new(),
                &HarmonicSet::default(),
                &CancellationToken::new(),
                &mut aggregator,
                &mut NoopObserver,
            )
            .await
            .unwrap();

        let searches = bench
            .commands(MockRole::Analyzer)
            .await
            .iter()
            .filter(|c| c.as_str() == ":CALC:MARK1:MAX")
            .count();
        assert_eq!(searches, 3);
    }

    #[tokio::test]
    async fn closure_observer_sees_every_point() {
        let bench = MockBench::new();
        let plan = SweepPlan::from_grid(vec![4.7, 5.0], vec![0.0, 1.0]).unwrap();
        let mut aggregator = ResultAggregator::new();
        let mut seen = Vec::new();
        let mut observer = |raw: &RawPoint, _derived: &DerivedPoint| {
            seen.push((raw.drift_voltage, raw.control_voltage));
        };

        controller(&bench)
            .run(
                &plan,
                &CalibrationTable::new(),
                &HarmonicSet::default(),
                &CancellationToken::new(),
                &mut aggregator,
                &mut observer,
            )
            .await
            .unwrap();

        assert_eq!(seen, plan.points().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn shutdown_attempts_both_steps() {
        let bench = MockBench::new();
        bench.fail_next(MockRole::Source).await;

        let errors = controller(&bench).shutdown().await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            bench.commands(MockRole::Analyzer).await,
            vec![":CAL:AUTO ON".to_string()]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn logs_sweep_lifecycle() {
        let bench = MockBench::new();
        let plan = SweepPlan::from_grid(vec![5.0], vec![0.0]).unwrap();

        controller(&bench)
            .run(
                &plan,
                &CalibrationTable::new(),
                &HarmonicSet::default(),
                &CancellationToken::new(),
                &mut ResultAggregator::new(),
                &mut NoopObserver,
            )
            .await
            .unwrap();

        assert!(logs_contain("Sweep started"));
        assert!(logs_contain("Sweep completed"));
    }

    #[tokio::test]
    async fn too_many_series_fail_after_shutdown() {
        let bench = MockBench::new();
        let plan = SweepPlan::from_grid(vec![4.0, 4.5, 5.0, 5.5], vec![0.0]).unwrap();
        let mut aggregator = ResultAggregator::new();

        let err = controller(&bench)
            .run(
                &plan,
                &CalibrationTable::new(),
                &HarmonicSet::default(),
                &CancellationToken::new(),
                &mut aggregator,
                &mut NoopObserver,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::Processing(_)));
        assert_eq!(aggregator.len(), 4);
        assert!(!bench.output_enabled().await);
    }
}
