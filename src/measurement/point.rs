use super::{VoltageKey, KILO, MEGA};
use serde::{Deserialize, Serialize};

/// One readback per visited (drift, control) grid cell, in raw instrument units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    /// Supply-rail (drift) voltage, V
    pub drift_voltage: f64,
    /// Tuning (control) voltage, V
    pub control_voltage: f64,
    /// Marker frequency, Hz
    pub frequency_hz: f64,
    /// Marker amplitude, dBm
    pub power_dbm: f64,
    /// Supply current, A
    pub current_a: f64,
}

impl RawPoint {
    /// Key of the drift-voltage series this point belongs to.
    pub fn drift_key(&self) -> VoltageKey {
        VoltageKey::from_volts(self.drift_voltage)
    }

    /// Key of the control-voltage setpoint.
    pub fn control_key(&self) -> VoltageKey {
        VoltageKey::from_volts(self.control_voltage)
    }
}

/// A [`RawPoint`] normalized to engineering units, plus its tuning sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedPoint {
    /// Supply-rail (drift) voltage, V
    pub drift_voltage: f64,
    /// Tuning (control) voltage, V
    pub control_voltage: f64,
    /// Output frequency, MHz
    pub frequency_mhz: f64,
    /// Output power, dBm
    pub power_dbm: f64,
    /// Consumption current, mA
    pub current_ma: f64,
    /// Forward difference of frequency over control voltage within the series, MHz/V.
    ///
    /// `None` for the first point of a series.
    pub sensitivity_mhz_per_v: Option<f64>,
}

impl DerivedPoint {
    /// Normalize units without a sensitivity value.
    pub fn from_raw(raw: &RawPoint) -> Self {
        Self {
            drift_voltage: raw.drift_voltage,
            control_voltage: raw.control_voltage,
            frequency_mhz: raw.frequency_hz / MEGA,
            power_dbm: raw.power_dbm,
            current_ma: raw.current_a * KILO,
            sensitivity_mhz_per_v: None,
        }
    }

    /// Attach the sensitivity computed against the previous point of the series.
    pub fn with_sensitivity(mut self, sensitivity: Option<f64>) -> Self {
        self.sensitivity_mhz_per_v = sensitivity;
        self
    }

    /// Key of the drift-voltage series this point belongs to.
    pub fn drift_key(&self) -> VoltageKey {
        VoltageKey::from_volts(self.drift_voltage)
    }

    /// Key of the control-voltage setpoint.
    pub fn control_key(&self) -> VoltageKey {
        VoltageKey::from_volts(self.control_voltage)
    }
}
