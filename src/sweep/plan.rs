//! The setpoint grid of one sweep.

use super::SecondaryParams;
use crate::error::{AppResult, BenchError};
use crate::instrument::analyzer::AnalyzerWindow;
use crate::measurement::VoltageKey;
use serde::Serialize;

/// Drift voltages below this magnitude are treated as unset.
const ZERO_DRIFT_V: f64 = 1e-3;

/// Immutable description of a sweep: which setpoints, in which order, with which
/// instrument settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPlan {
    drift_voltages: Vec<f64>,
    control_voltages: Vec<f64>,
    /// Analyzer frequency window
    pub window: AnalyzerWindow,
    /// Analyzer reference level, dB
    pub ref_level_db: f64,
    /// Supply rail current limit, mA
    pub supply_current_ma: f64,
    /// Control rail current limit, mA
    pub control_current_ma: f64,
}

impl SweepPlan {
    /// Build the plan the operator configured.
    pub fn from_params(params: &SecondaryParams) -> AppResult<Self> {
        params.validate()?;
        let drift_voltages = params
            .drift_voltages()
            .into_iter()
            .filter(|v| v.abs() >= ZERO_DRIFT_V)
            .collect();
        let control_voltages = control_range(params.u_vco_min, params.u_vco_max, params.u_vco_delta);
        check_ascending(&control_voltages)?;
        Ok(Self {
            drift_voltages,
            control_voltages,
            window: AnalyzerWindow {
                span_mhz: params.sa_span,
                start_ghz: params.sa_min,
                stop_ghz: params.sa_max,
            },
            ref_level_db: params.sa_rlev,
            supply_current_ma: params.i_src_max,
            control_current_ma: params.i_vco_max,
        })
    }

    /// Plan over explicit voltage lists with the default instrument settings.
    ///
    /// Control voltages must be non-empty and strictly ascending.
    pub fn from_grid(drift_voltages: Vec<f64>, control_voltages: Vec<f64>) -> AppResult<Self> {
        if control_voltages.is_empty() {
            return Err(BenchError::Configuration(
                "A sweep needs at least one control voltage".to_string(),
            ));
        }
        check_ascending(&control_voltages)?;
        let defaults = Self::from_params(&SecondaryParams::default())?;
        Ok(Self {
            drift_voltages,
            control_voltages,
            ..defaults
        })
    }

    /// Drift voltages, one series each, in visiting order.
    pub fn drift_voltages(&self) -> &[f64] {
        &self.drift_voltages
    }

    /// Control voltages, ascending.
    pub fn control_voltages(&self) -> &[f64] {
        &self.control_voltages
    }

    /// Every (drift, control) setpoint, drift-major.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.drift_voltages
            .iter()
            .flat_map(move |&drift| self.control_voltages.iter().map(move |&control| (drift, control)))
    }

    /// Number of setpoints.
    pub fn len(&self) -> usize {
        self.drift_voltages.len() * self.control_voltages.len()
    }

    /// Whether the plan visits no setpoint.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_ascending(control_voltages: &[f64]) -> AppResult<()> {
    if control_voltages
        .windows(2)
        .any(|pair| VoltageKey::from_volts(pair[1]) <= VoltageKey::from_volts(pair[0]))
    {
        return Err(BenchError::Configuration(
            "Control voltages must be strictly ascending".to_string(),
        ));
    }
    Ok(())
}

/// `start, start + step, ...` up to and including `end`, rounded to 10 mV.
fn control_range(start: f64, end: f64, step: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut i = 0u32;
    loop {
        let value = start + f64::from(i) * step;
        if value > end + 1e-9 {
            break;
        }
        values.push((value * 100.0).round() / 100.0);
        i += 1;
    }
    values
}
