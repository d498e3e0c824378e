//! Point-by-point derivation of the tuning metrics.
//!
//! Each raw point is normalized to engineering units and its tuning sensitivity
//! is taken against the previous point of the same drift-voltage series, in
//! insertion order. Per-series curves are kept for live plotting.

use super::{HarmonicSet, ResultTable};
use crate::calibration::CalibrationTemplate;
use crate::error::AppResult;
use crate::measurement::{DerivedPoint, RawPoint, VoltageKey};
use std::collections::HashMap;

/// Control-voltage steps smaller than this give no sensitivity value.
const MIN_CONTROL_STEP_V: f64 = 1e-9;

/// Plotted quantity of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Output frequency, MHz
    Frequency,
    /// Output power, dBm
    Power,
    /// Supply current, mA
    Current,
    /// Tuning sensitivity, MHz/V
    Sensitivity,
}

/// `(control voltage, value)` pairs of one series.
pub type Curve = Vec<(f64, f64)>;

/// Live per-series curves, keyed by drift voltage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesBuffers {
    frequency: HashMap<VoltageKey, Curve>,
    power: HashMap<VoltageKey, Curve>,
    current: HashMap<VoltageKey, Curve>,
    sensitivity: HashMap<VoltageKey, Curve>,
}

impl SeriesBuffers {
    fn push(&mut self, point: &DerivedPoint) {
        let key = point.drift_key();
        let x = point.control_voltage;
        self.frequency.entry(key).or_default().push((x, point.frequency_mhz));
        self.power.entry(key).or_default().push((x, point.power_dbm));
        self.current.entry(key).or_default().push((x, point.current_ma));
        if let Some(s) = point.sensitivity_mhz_per_v {
            self.sensitivity.entry(key).or_default().push((x, s));
        }
    }

    fn map(&self, quantity: Quantity) -> &HashMap<VoltageKey, Curve> {
        match quantity {
            Quantity::Frequency => &self.frequency,
            Quantity::Power => &self.power,
            Quantity::Current => &self.current,
            Quantity::Sensitivity => &self.sensitivity,
        }
    }

    /// Curve of `quantity` for the series at `drift` volts, empty if none.
    pub fn curve(&self, quantity: Quantity, drift: f64) -> &[(f64, f64)] {
        self.map(quantity)
            .get(&VoltageKey::from_volts(drift))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop every curve.
    pub fn clear(&mut self) {
        self.frequency.clear();
        self.power.clear();
        self.current.clear();
        self.sensitivity.clear();
    }

    /// Whether no curve holds a value.
    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
            && self.power.is_empty()
            && self.current.is_empty()
            && self.sensitivity.is_empty()
    }
}

/// Accumulates the points of one sweep.
///
/// Call [`clear`](Self::clear) before reusing an aggregator for another sweep;
/// [`SweepController::run`](crate::sweep::SweepController::run) does so itself.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    rows: Vec<DerivedPoint>,
    series_order: Vec<VoltageKey>,
    last_in_series: HashMap<VoltageKey, DerivedPoint>,
    buffers: SeriesBuffers,
}

impl ResultAggregator {
    /// Empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a raw point, derive its sensitivity and store it.
    pub fn add_point(&mut self, raw: RawPoint) -> DerivedPoint {
        let point = DerivedPoint::from_raw(&raw);
        let key = point.drift_key();

        let sensitivity = self.last_in_series.get(&key).and_then(|previous| {
            let dv = point.control_voltage - previous.control_voltage;
            (dv.abs() > MIN_CONTROL_STEP_V).then(|| (point.frequency_mhz - previous.frequency_mhz) / dv)
        });
        let point = point.with_sensitivity(sensitivity);

        if !self.last_in_series.contains_key(&key) {
            self.series_order.push(key);
        }
        self.last_in_series.insert(key, point);
        self.buffers.push(&point);
        self.rows.push(point);
        point
    }

    /// Forget everything from the previous sweep.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.series_order.clear();
        self.last_in_series.clear();
        self.buffers.clear();
    }

    /// Points in insertion order.
    pub fn rows(&self) -> &[DerivedPoint] {
        &self.rows
    }

    /// Points of the series at `drift` volts, in insertion order.
    pub fn series(&self, drift: f64) -> impl Iterator<Item = &DerivedPoint> + '_ {
        let key = VoltageKey::from_volts(drift);
        self.rows.iter().filter(move |p| p.drift_key() == key)
    }

    /// Drift voltages in the order their series first appeared.
    pub fn drift_voltages(&self) -> Vec<f64> {
        self.series_order.iter().map(|k| k.volts()).collect()
    }

    /// Live curves.
    pub fn buffers(&self) -> &SeriesBuffers {
        &self.buffers
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no point was added since the last clear.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Zero-offset template of every setpoint visited so far.
    pub fn visited_template(&self) -> CalibrationTemplate {
        let mut template = CalibrationTemplate::new();
        for row in &self.rows {
            template.record(row.drift_voltage, row.control_voltage);
        }
        template
    }

    /// Export-ready table with the harmonic side-channels merged in.
    pub fn finalize(&self, harmonics: &HarmonicSet) -> AppResult<ResultTable> {
        ResultTable::build(&self.rows, harmonics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(drift: f64, control: f64, frequency_mhz: f64) -> RawPoint {
        RawPoint {
            drift_voltage: drift,
            control_voltage: control,
            frequency_hz: frequency_mhz * 1e6,
            power_dbm: -10.0,
            current_a: 0.005,
        }
    }

    #[test]
    fn sensitivity_is_per_series_forward_difference() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add_point(raw(4.7, 0.0, 100.0));
        aggregator.add_point(raw(4.7, 1.0, 110.0));
        aggregator.add_point(raw(5.0, 0.0, 500.0));
        aggregator.add_point(raw(4.7, 2.0, 130.0));
        aggregator.add_point(raw(5.0, 0.5, 510.0));

        let s: Vec<_> = aggregator.series(4.7).map(|p| p.sensitivity_mhz_per_v).collect();
        assert_eq!(s[0], None);
        assert!((s[1].unwrap() - 10.0).abs() < 1e-9);
        assert!((s[2].unwrap() - 20.0).abs() < 1e-9);

        let other: Vec<_> = aggregator.series(5.0).map(|p| p.sensitivity_mhz_per_v).collect();
        assert_eq!(other[0], None);
        assert!((other[1].unwrap() - 20.0).abs() < 1e-9);

        assert_eq!(aggregator.drift_voltages(), vec![4.7, 5.0]);
    }

    #[test]
    fn single_point_series_has_empty_sensitivity_curve() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add_point(raw(5.3, 0.0, 100.0));
        let buffers = aggregator.buffers();
        assert!(buffers.curve(Quantity::Sensitivity, 5.3).is_empty());
        assert_eq!(buffers.curve(Quantity::Frequency, 5.3), &[(0.0, 100.0)]);
        assert!((buffers.curve(Quantity::Current, 5.3)[0].1 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn clear_removes_all_residue() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add_point(raw(4.7, 0.0, 100.0));
        aggregator.add_point(raw(4.7, 1.0, 110.0));
        aggregator.clear();

        assert!(aggregator.is_empty());
        assert!(aggregator.buffers().is_empty());
        assert!(aggregator.drift_voltages().is_empty());

        // The first point after a clear starts a fresh series.
        let first = aggregator.add_point(raw(4.7, 2.0, 200.0));
        assert_eq!(first.sensitivity_mhz_per_v, None);
    }

    #[test]
    fn repeated_control_voltage_gives_no_sensitivity() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add_point(raw(5.0, 1.0, 100.0));
        let repeat = aggregator.add_point(raw(5.0, 1.0, 101.0));
        assert_eq!(repeat.sensitivity_mhz_per_v, None);
    }

    #[test]
    fn template_lists_visited_points() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add_point(raw(4.7, 0.0, 100.0));
        aggregator.add_point(raw(4.7, 1.0, 110.0));
        assert_eq!(aggregator.visited_template().setpoints(), &[(4.7, 0.0), (4.7, 1.0)]);
    }
}
