//! Bench configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/bench.toml` by default)
//! 2. environment variables prefixed with `VCO_BENCH_`, nested with `__`
//!    (e.g. `VCO_BENCH_APPLICATION__LOG_LEVEL=debug`)
//!
//! Every section has defaults, so an empty or missing file yields a mock bench
//! that can run a sweep offline.
//!
//! # Example
//! ```no_run
//! use vco_bench::config::BenchConfig;
//!
//! let config = BenchConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), vco_bench::error::BenchError>(())
//! ```

use crate::error::{AppResult, BenchError};
use crate::instrument::mock::MockModelConfig;
use crate::instrument::{AnalyzerCommands, SourceCommands};
use crate::sweep::SweepTiming;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/bench.toml";

/// Top-level bench configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument sessions
    pub instruments: InstrumentsConfig,
    /// Replay model used by mock instruments
    pub mock: MockModelConfig,
    /// File locations
    pub files: FilesConfig,
    /// Settle delays
    pub timing: TimingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "VCO tuning bench".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// How an instrument is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// Deterministic replay bench
    #[default]
    Mock,
    /// Raw SCPI socket
    Tcp,
}

/// Both instruments of the bench.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Programmable power source
    pub source: SourceConfig,
    /// Spectrum analyzer
    pub analyzer: AnalyzerConfig,
}

/// Power source session and vocabulary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Session kind
    pub kind: InstrumentKind,
    /// `host:port` for tcp sessions
    pub address: Option<String>,
    /// Command template overrides
    pub commands: SourceCommands,
}

/// Spectrum analyzer session and vocabulary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Session kind
    pub kind: InstrumentKind,
    /// `host:port` for tcp sessions
    pub address: Option<String>,
    /// Command template overrides
    pub commands: AnalyzerCommands,
}

/// File locations used by a measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Operator-entered sweep parameters (TOML)
    pub params: PathBuf,
    /// Offset calibration table (CSV), may be absent
    pub calibration: PathBuf,
    /// Where the visited-setpoint template is written after a sweep
    pub calibration_template: PathBuf,
    /// 2nd harmonic side-channel (CSV)
    pub harmonic_x2: Option<PathBuf>,
    /// 3rd harmonic side-channel (CSV)
    pub harmonic_x3: Option<PathBuf>,
    /// Report output directory
    pub output_dir: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            params: PathBuf::from("config/params.toml"),
            calibration: PathBuf::from("data/calibration.csv"),
            calibration_template: PathBuf::from("data/calibration-template.csv"),
            harmonic_x2: None,
            harmonic_x3: None,
            output_dir: PathBuf::from("reports"),
        }
    }
}

/// Settle delays, written as humantime strings (`"300ms"`, `"1s"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// After applying the voltages of a point
    #[serde(with = "humantime_serde")]
    pub point_settle: Duration,
    /// After applying the voltages of the first point of a series
    #[serde(with = "humantime_serde")]
    pub first_point_settle: Duration,
    /// Between the two peak searches on the first point of a series
    #[serde(with = "humantime_serde")]
    pub marker_settle: Duration,
    /// Between two series
    #[serde(with = "humantime_serde")]
    pub series_settle: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            point_settle: Duration::from_millis(300),
            first_point_settle: Duration::from_secs(1),
            marker_settle: Duration::from_millis(500),
            series_settle: Duration::from_secs(1),
        }
    }
}

impl From<TimingConfig> for SweepTiming {
    fn from(timing: TimingConfig) -> Self {
        SweepTiming {
            point_settle: timing.point_settle,
            first_point_settle: timing.first_point_settle,
            marker_settle: timing.marker_settle,
            series_settle: timing.series_settle,
        }
    }
}

impl BenchConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path plus environment variables.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("VCO_BENCH_").split("__"))
            .extract()?)
    }

    /// Switch both instruments to the replay bench.
    pub fn force_mock(&mut self) {
        self.instruments.source.kind = InstrumentKind::Mock;
        self.instruments.analyzer.kind = InstrumentKind::Mock;
    }

    /// Whether both instruments are simulated.
    pub fn is_mock(&self) -> bool {
        self.instruments.source.kind == InstrumentKind::Mock
            && self.instruments.analyzer.kind == InstrumentKind::Mock
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BenchError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(BenchError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let source = &self.instruments.source;
        check_address("source", source.kind, source.address.as_deref())?;
        let analyzer = &self.instruments.analyzer;
        check_address("analyzer", analyzer.kind, analyzer.address.as_deref())?;

        if source.commands.supply_channel == source.commands.control_channel {
            return Err(BenchError::Configuration(format!(
                "Supply and control channel must differ (both '{}')",
                source.commands.supply_channel
            )));
        }

        Ok(())
    }
}

fn check_address(role: &str, kind: InstrumentKind, address: Option<&str>) -> AppResult<()> {
    if kind == InstrumentKind::Tcp && address.map_or(true, |a| a.trim().is_empty()) {
        return Err(BenchError::Configuration(format!(
            "Instrument '{}' uses kind 'tcp' but has no address",
            role
        )));
    }
    Ok(())
}
