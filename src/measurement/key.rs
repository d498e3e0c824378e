use serde::{Deserialize, Serialize};
use std::fmt;

/// Exact lookup key for a voltage setpoint.
///
/// Voltages are compared at millivolt resolution. The sweep plan rounds every
/// control voltage to 10 mV, so keys built from plan values and from calibration
/// files written with the same plan always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoltageKey(i64);

impl VoltageKey {
    /// Build a key from a voltage in volts.
    pub fn from_volts(volts: f64) -> Self {
        Self((volts * 1_000.0).round() as i64)
    }

    /// The voltage this key stands for, in volts.
    pub fn volts(self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    /// Raw millivolt value.
    pub fn millivolts(self) -> i64 {
        self.0
    }
}

impl From<f64> for VoltageKey {
    fn from(volts: f64) -> Self {
        Self::from_volts(volts)
    }
}

impl fmt::Display for VoltageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} V", self.volts())
    }
}
