//! Operator-entered sweep parameters.
//!
//! These are the values the operator edits between runs. They persist in a small
//! TOML file; a missing file yields the defaults below.

use crate::error::{AppResult, BenchError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Smallest control step; plan voltages are rounded to this resolution.
pub const MIN_CONTROL_STEP_V: f64 = 0.01;

fn default_drift_1() -> f64 {
    4.7
}

fn default_drift_2() -> f64 {
    5.0
}

fn default_drift_3() -> f64 {
    5.3
}

fn default_supply_current() -> f64 {
    50.0
}

fn default_control_max() -> f64 {
    10.0
}

fn default_control_step() -> f64 {
    1.0
}

fn default_control_current() -> f64 {
    10.0
}

fn default_analyzer_ghz() -> f64 {
    1.0
}

fn default_ref_level() -> f64 {
    10.0
}

fn default_span() -> f64 {
    50.0
}

/// Secondary (per-run) parameters of a tuning sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryParams {
    /// First supply (drift) voltage, V. Zero disables the series.
    #[serde(default = "default_drift_1")]
    pub u_src_drift_1: f64,
    /// Second supply (drift) voltage, V. Zero disables the series.
    #[serde(default = "default_drift_2")]
    pub u_src_drift_2: f64,
    /// Third supply (drift) voltage, V. Zero disables the series.
    #[serde(default = "default_drift_3")]
    pub u_src_drift_3: f64,
    /// Supply rail current limit, mA
    #[serde(default = "default_supply_current")]
    pub i_src_max: f64,
    /// First control voltage, V
    #[serde(default)]
    pub u_vco_min: f64,
    /// Last control voltage, V (inclusive)
    #[serde(default = "default_control_max")]
    pub u_vco_max: f64,
    /// Control voltage step, V
    #[serde(default = "default_control_step")]
    pub u_vco_delta: f64,
    /// Control rail current limit, mA
    #[serde(default = "default_control_current")]
    pub i_vco_max: f64,
    /// Analyzer start frequency, GHz
    #[serde(default = "default_analyzer_ghz")]
    pub sa_min: f64,
    /// Analyzer stop frequency, GHz
    #[serde(default = "default_analyzer_ghz")]
    pub sa_max: f64,
    /// Analyzer reference level, dB
    #[serde(default = "default_ref_level")]
    pub sa_rlev: f64,
    /// Analyzer span, MHz
    #[serde(default = "default_span")]
    pub sa_span: f64,
}

impl Default for SecondaryParams {
    fn default() -> Self {
        Self {
            u_src_drift_1: default_drift_1(),
            u_src_drift_2: default_drift_2(),
            u_src_drift_3: default_drift_3(),
            i_src_max: default_supply_current(),
            u_vco_min: 0.0,
            u_vco_max: default_control_max(),
            u_vco_delta: default_control_step(),
            i_vco_max: default_control_current(),
            sa_min: default_analyzer_ghz(),
            sa_max: default_analyzer_ghz(),
            sa_rlev: default_ref_level(),
            sa_span: default_span(),
        }
    }
}

impl SecondaryParams {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No parameter file, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let params: Self = toml::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    /// Persist to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Sweep parameters saved");
        Ok(())
    }

    /// Drift voltages in entry order.
    pub fn drift_voltages(&self) -> [f64; 3] {
        [self.u_src_drift_1, self.u_src_drift_2, self.u_src_drift_3]
    }

    /// Check ranges and limits.
    pub fn validate(&self) -> AppResult<()> {
        let fields = [
            ("u_src_drift_1", self.u_src_drift_1),
            ("u_src_drift_2", self.u_src_drift_2),
            ("u_src_drift_3", self.u_src_drift_3),
            ("i_src_max", self.i_src_max),
            ("u_vco_min", self.u_vco_min),
            ("u_vco_max", self.u_vco_max),
            ("u_vco_delta", self.u_vco_delta),
            ("i_vco_max", self.i_vco_max),
            ("sa_min", self.sa_min),
            ("sa_max", self.sa_max),
            ("sa_rlev", self.sa_rlev),
            ("sa_span", self.sa_span),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(BenchError::Configuration(format!(
                "Parameter {} must be a finite number, got {}",
                name, value
            )));
        }
        if self.u_vco_delta < MIN_CONTROL_STEP_V - 1e-9 {
            return Err(BenchError::Configuration(format!(
                "Control voltage step must be at least {} V, got {}",
                MIN_CONTROL_STEP_V, self.u_vco_delta
            )));
        }
        if self.u_vco_max < self.u_vco_min {
            return Err(BenchError::Configuration(format!(
                "Control voltage range is empty: {} V to {} V",
                self.u_vco_min, self.u_vco_max
            )));
        }
        if !(self.i_src_max > 0.0) || !(self.i_vco_max > 0.0) {
            return Err(BenchError::Configuration(
                "Current limits must be positive".to_string(),
            ));
        }
        if self.sa_max < self.sa_min {
            return Err(BenchError::Configuration(format!(
                "Analyzer stop {} GHz is below start {} GHz",
                self.sa_max, self.sa_min
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bench_setup() {
        let params = SecondaryParams::default();
        assert_eq!(params.drift_voltages(), [4.7, 5.0, 5.3]);
        assert_eq!(params.i_src_max, 50.0);
        assert_eq!((params.u_vco_min, params.u_vco_max, params.u_vco_delta), (0.0, 10.0, 1.0));
        assert_eq!(params.sa_span, 50.0);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.toml");
        fs::write(&path, "u_vco_max = 4.0\nu_src_drift_3 = 0.0\n").unwrap();

        let params = SecondaryParams::load(&path).unwrap();
        assert_eq!(params.u_vco_max, 4.0);
        assert_eq!(params.u_src_drift_3, 0.0);
        assert_eq!(params.u_src_drift_1, 4.7);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("params.toml");
        let params = SecondaryParams {
            u_vco_delta: 0.25,
            sa_rlev: -5.0,
            ..Default::default()
        };
        params.save(&path).unwrap();
        assert_eq!(SecondaryParams::load(&path).unwrap(), params);
    }

    #[test]
    fn rejects_bad_ranges() {
        let zero_step = SecondaryParams {
            u_vco_delta: 0.0,
            ..Default::default()
        };
        assert!(zero_step.validate().is_err());

        let inverted = SecondaryParams {
            u_vco_min: 5.0,
            u_vco_max: 1.0,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let no_current = SecondaryParams {
            i_src_max: 0.0,
            ..Default::default()
        };
        assert!(no_current.validate().is_err());
    }

    #[test]
    fn rejects_steps_below_resolution() {
        let fine = SecondaryParams {
            u_vco_max: 0.02,
            u_vco_delta: 0.004,
            ..Default::default()
        };
        assert!(matches!(fine.validate(), Err(BenchError::Configuration(_))));

        let smallest = SecondaryParams {
            u_vco_max: 0.05,
            u_vco_delta: MIN_CONTROL_STEP_V,
            ..Default::default()
        };
        assert!(smallest.validate().is_ok());
    }

    #[test]
    fn rejects_non_finite_values() {
        for params in [
            SecondaryParams {
                u_vco_min: f64::NAN,
                ..Default::default()
            },
            SecondaryParams {
                u_vco_max: f64::INFINITY,
                ..Default::default()
            },
            SecondaryParams {
                u_vco_delta: f64::NAN,
                ..Default::default()
            },
            SecondaryParams {
                sa_rlev: f64::NEG_INFINITY,
                ..Default::default()
            },
        ] {
            assert!(params.validate().is_err(), "{:?}", params);
        }
    }

    #[test]
    fn missing_file_gives_defaults() {
        let params = SecondaryParams::load("no/such/params.toml").unwrap();
        assert_eq!(params, SecondaryParams::default());
    }
}
