//! Bench controller: owns the instrument pair, the operator parameters and
//! the last result, and runs one sweep at a time.
//!
//! ```no_run
//! use vco_bench::bench::{BenchController, SharedBench, try_measure};
//! use vco_bench::config::BenchConfig;
//! use vco_bench::sweep::{CancellationToken, NoopObserver};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! # async fn example() -> vco_bench::error::AppResult<()> {
//! let mut bench = BenchController::new(BenchConfig::load()?)?;
//! bench.connect().await?;
//! let shared: SharedBench = Arc::new(Mutex::new(bench));
//!
//! let report = try_measure(&shared, &CancellationToken::new(), &mut NoopObserver).await?;
//! println!("{} points", report.points);
//! # Ok(())
//! # }
//! ```

use crate::calibration::{CalibrationTable, CalibrationTemplate};
use crate::config::{BenchConfig, InstrumentKind};
use crate::error::{AppResult, BenchError};
use crate::instrument::mock::{MockBench, MockRole, VcoModel};
use crate::instrument::tcp::TcpScpiSession;
use crate::instrument::{PowerSource, ScpiSession, SessionStatus, SpectrumAnalyzer};
use crate::results::{HarmonicSet, ReportMetadata, ResultAggregator, ResultTable};
use crate::sweep::{
    CancellationToken, PointObserver, SecondaryParams, SweepController, SweepPlan, SweepState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Bench shared between tasks; the mutex serializes sweeps.
pub type SharedBench = Arc<Mutex<BenchController>>;

/// Outcome of a completed measurement.
#[derive(Debug, Clone)]
pub struct MeasurementReport {
    /// Run id logged with the sweep
    pub run_id: Uuid,
    /// Finished table
    pub table: ResultTable,
    /// Parameters the sweep ran with
    pub params: SecondaryParams,
    /// Number of measured points
    pub points: usize,
}

impl MeasurementReport {
    /// Export metadata for this report.
    pub fn metadata(&self) -> ReportMetadata {
        ReportMetadata::new(self.run_id, self.params.clone(), self.points)
    }
}

struct Instruments {
    source: PowerSource,
    analyzer: SpectrumAnalyzer,
    mock: Option<MockBench>,
}

/// The bench: connection, reset, measurement and parameter persistence.
pub struct BenchController {
    config: BenchConfig,
    params: SecondaryParams,
    /// Set by `set_params`, cleared by `save_params`.
    unsaved_params: bool,
    instruments: Option<Instruments>,
    aggregator: ResultAggregator,
    last_report: Option<MeasurementReport>,
    state: SweepState,
}

impl BenchController {
    /// Controller with parameters loaded from the configured file.
    pub fn new(config: BenchConfig) -> AppResult<Self> {
        config.validate()?;
        let params = SecondaryParams::load(&config.files.params)?;
        Ok(Self {
            config,
            params,
            unsaved_params: false,
            instruments: None,
            aggregator: ResultAggregator::new(),
            last_report: None,
            state: SweepState::Idle,
        })
    }

    /// Open both instrument sessions as configured.
    pub async fn connect(&mut self) -> AppResult<()> {
        let instruments = &self.config.instruments;
        let mock = if instruments.source.kind == InstrumentKind::Mock
            || instruments.analyzer.kind == InstrumentKind::Mock
        {
            let bench = MockBench::with_model(VcoModel::linear(self.config.mock));
            bench
                .set_channels(
                    &instruments.source.commands.supply_channel,
                    &instruments.source.commands.control_channel,
                )
                .await;
            Some(bench)
        } else {
            None
        };

        let source_session = open_session(
            instruments.source.kind,
            instruments.source.address.as_deref(),
            mock.as_ref(),
            MockRole::Source,
        )
        .await?;
        let analyzer_session = open_session(
            instruments.analyzer.kind,
            instruments.analyzer.address.as_deref(),
            mock.as_ref(),
            MockRole::Analyzer,
        )
        .await?;

        let source = PowerSource::new(source_session, instruments.source.commands.clone());
        let analyzer = SpectrumAnalyzer::new(analyzer_session, instruments.analyzer.commands.clone());
        for status in [source.status().await, analyzer.status().await] {
            info!(kind = %status.kind, address = %status.address, detail = %status.detail, "Instrument connected");
        }

        self.instruments = Some(Instruments {
            source,
            analyzer,
            mock,
        });
        Ok(())
    }

    /// Whether [`connect`](Self::connect) succeeded.
    pub fn is_connected(&self) -> bool {
        self.instruments.is_some()
    }

    /// Replay bench behind the mock sessions, if any.
    pub fn mock_bench(&self) -> Option<&MockBench> {
        self.instruments.as_ref().and_then(|i| i.mock.as_ref())
    }

    /// Reset both instruments and switch the source output off.
    pub async fn reset(&self) -> AppResult<()> {
        let instruments = self.instruments.as_ref().ok_or(BenchError::NotConnected)?;
        instruments
            .source
            .reset()
            .await
            .map_err(|e| BenchError::Instrument(format!("{:#}", e)))?;
        instruments
            .analyzer
            .reset()
            .await
            .map_err(|e| BenchError::Instrument(format!("{:#}", e)))
    }

    /// Run one sweep with the current parameters.
    ///
    /// Calibration and harmonic files are re-read first, so edits made between
    /// runs take effect. The parameter file is re-read too, unless parameters
    /// set with [`set_params`](Self::set_params) are still unsaved; those win.
    /// The visited-setpoint template is written even when the sweep stops early.
    pub async fn measure(
        &mut self,
        cancel: &CancellationToken,
        observer: &mut dyn PointObserver,
    ) -> AppResult<MeasurementReport> {
        if !self.state.can_begin() {
            return Err(BenchError::SweepInProgress);
        }
        self.state = SweepState::Preparing;
        let outcome = self.run_measurement(cancel, observer).await;
        self.state = match &outcome {
            Ok(_) => SweepState::Completed,
            Err(e) if e.is_cancellation() => SweepState::Cancelled,
            Err(_) => SweepState::Failed,
        };
        outcome
    }

    async fn run_measurement(
        &mut self,
        cancel: &CancellationToken,
        observer: &mut dyn PointObserver,
    ) -> AppResult<MeasurementReport> {
        let (source, analyzer) = {
            let instruments = self.instruments.as_ref().ok_or(BenchError::NotConnected)?;
            (instruments.source.clone(), instruments.analyzer.clone())
        };

        let files = &self.config.files;
        if self.unsaved_params {
            info!("Measuring with unsaved parameters");
        } else {
            self.params = SecondaryParams::load(&files.params)?;
        }
        let plan = SweepPlan::from_params(&self.params)?;
        let calibration = CalibrationTable::load(&files.calibration);
        let harmonics = HarmonicSet::load(files.harmonic_x2.as_deref(), files.harmonic_x3.as_deref());

        self.last_report = None;
        self.reset().await?;

        let run_id = Uuid::new_v4();
        let controller =
            SweepController::new(source, analyzer, self.config.timing.into()).with_run_id(run_id);
        self.state = SweepState::Running;
        let outcome = controller
            .run(&plan, &calibration, &harmonics, cancel, &mut self.aggregator, observer)
            .await;

        let template = self.aggregator.visited_template();
        if !template.is_empty() {
            if let Err(e) = template.write(&self.config.files.calibration_template) {
                warn!(error = %e, "Could not write calibration template");
            }
        }

        let report = MeasurementReport {
            run_id,
            table: outcome?,
            params: self.params.clone(),
            points: self.aggregator.len(),
        };
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Session health of both instruments.
    pub async fn status(&self) -> AppResult<Vec<SessionStatus>> {
        let instruments = self.instruments.as_ref().ok_or(BenchError::NotConnected)?;
        Ok(vec![
            instruments.source.status().await,
            instruments.analyzer.status().await,
        ])
    }

    /// Current operator parameters.
    pub fn params(&self) -> &SecondaryParams {
        &self.params
    }

    /// Replace the operator parameters (not persisted until [`save_params`](Self::save_params)).
    pub fn set_params(&mut self, params: SecondaryParams) -> AppResult<()> {
        params.validate()?;
        self.params = params;
        self.unsaved_params = true;
        Ok(())
    }

    /// Persist the operator parameters to the configured file.
    pub fn save_params(&mut self) -> AppResult<()> {
        self.params.save(&self.config.files.params)?;
        self.unsaved_params = false;
        Ok(())
    }

    /// Whether [`set_params`](Self::set_params) holds values not yet saved.
    pub fn has_unsaved_params(&self) -> bool {
        self.unsaved_params
    }

    /// Plan for the current parameters.
    pub fn plan(&self) -> AppResult<SweepPlan> {
        SweepPlan::from_params(&self.params)
    }

    /// Write the zero-offset template of the current plan without measuring.
    pub fn write_template(&self) -> AppResult<PathBuf> {
        let path = self.config.files.calibration_template.clone();
        CalibrationTemplate::from_plan(&self.plan()?).write(&path)?;
        Ok(path)
    }

    /// Whether the last measurement completed.
    pub fn has_result(&self) -> bool {
        self.last_report.is_some()
    }

    /// The last completed measurement.
    pub fn last_report(&self) -> Option<&MeasurementReport> {
        self.last_report.as_ref()
    }

    /// Points of the last sweep, including a cancelled one.
    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    /// Drop the results of the last sweep.
    pub fn clear_results(&mut self) {
        self.aggregator.clear();
        self.last_report = None;
    }

    /// Lifecycle state of the last or current sweep.
    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Configuration in use.
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }
}

async fn open_session(
    kind: InstrumentKind,
    address: Option<&str>,
    mock: Option<&MockBench>,
    role: MockRole,
) -> AppResult<Arc<dyn ScpiSession>> {
    match (kind, mock) {
        (InstrumentKind::Mock, Some(bench)) => Ok(bench.session(role)),
        (InstrumentKind::Mock, None) => Ok(MockBench::new().session(role)),
        (InstrumentKind::Tcp, _) => {
            let address = address.ok_or_else(|| {
                BenchError::Configuration(format!("Instrument '{}' has no address", role))
            })?;
            let session = TcpScpiSession::new(address);
            session
                .connect()
                .await
                .map_err(|e| BenchError::Instrument(format!("{:#}", e)))?;
            Ok(Arc::new(session))
        }
    }
}

/// Run a measurement unless another one holds the bench.
///
/// Returns [`BenchError::SweepInProgress`] immediately instead of queueing.
pub async fn try_measure(
    bench: &SharedBench,
    cancel: &CancellationToken,
    observer: &mut dyn PointObserver,
) -> AppResult<MeasurementReport> {
    let mut guard = bench.try_lock().map_err(|_| BenchError::SweepInProgress)?;
    guard.measure(cancel, observer).await
}
