//! Per-setpoint offset calibration.
//!
//! A calibration run produces a table of frequency and power offsets for every
//! (drift voltage, control voltage) setpoint. During a sweep the offsets are
//! applied to the analyzer display before each readback. Lookups are exact on
//! [`VoltageKey`] pairs; missing pairs fall back to zero offsets.
//!
//! File format (CSV, header required):
//!
//! ```text
//! supply-voltage,control-voltage,frequency-offset,power-offset
//! 5.0,1.0,2.0,-1.0
//! ```
//!
//! A missing or unreadable file is not an error: the sweep proceeds uncorrected.

use crate::error::AppResult;
use crate::measurement::VoltageKey;
use crate::sweep::SweepPlan;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// One line of a calibration file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Drift voltage, V
    #[serde(rename = "supply-voltage")]
    pub supply_voltage: f64,
    /// Control voltage, V
    #[serde(rename = "control-voltage")]
    pub control_voltage: f64,
    /// Frequency offset, MHz
    #[serde(rename = "frequency-offset")]
    pub frequency_offset: f64,
    /// Power offset, dB
    #[serde(rename = "power-offset")]
    pub power_offset: f64,
}

/// Correction applied to the analyzer for one setpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OffsetEntry {
    /// Frequency offset, MHz
    pub freq_offset_mhz: f64,
    /// Reference level offset, dB
    pub power_offset_db: f64,
}

impl OffsetEntry {
    /// Offset pair.
    pub fn new(freq_offset_mhz: f64, power_offset_db: f64) -> Self {
        Self {
            freq_offset_mhz,
            power_offset_db,
        }
    }
}

/// Offsets keyed by exact (drift, control) setpoint. Read-only during a sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    entries: HashMap<(VoltageKey, VoltageKey), OffsetEntry>,
}

impl CalibrationTable {
    /// Empty table; every lookup yields zero offsets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a calibration file.
    ///
    /// An absent file yields an empty table. A file that cannot be parsed is
    /// logged and also yields an empty table.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No calibration file, offsets default to zero");
            return Self::new();
        }
        match Self::read(path) {
            Ok(table) => {
                info!(path = %path.display(), entries = table.len(), "Calibration loaded");
                table
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed calibration file ignored");
                Self::new()
            }
        }
    }

    fn read(path: &Path) -> AppResult<Self> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        let mut table = Self::new();
        for record in reader.deserialize::<CalibrationRecord>() {
            let record = record?;
            table.insert(
                record.supply_voltage,
                record.control_voltage,
                OffsetEntry::new(record.frequency_offset, record.power_offset),
            );
        }
        Ok(table)
    }

    /// Register the offsets of one setpoint, replacing any previous entry.
    pub fn insert(&mut self, drift: f64, control: f64, entry: OffsetEntry) {
        self.entries
            .insert((VoltageKey::from_volts(drift), VoltageKey::from_volts(control)), entry);
    }

    /// Offsets for a setpoint, `(0, 0)` when it is not registered.
    pub fn lookup(&self, drift: f64, control: f64) -> OffsetEntry {
        self.entries
            .get(&(VoltageKey::from_volts(drift), VoltageKey::from_volts(control)))
            .copied()
            .unwrap_or_default()
    }

    /// Number of registered setpoints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no setpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Visited setpoints with zeroed offsets, the starting point of a calibration run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTemplate {
    setpoints: Vec<(f64, f64)>,
    seen: HashSet<(VoltageKey, VoltageKey)>,
}

impl CalibrationTemplate {
    /// Empty template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Template listing every setpoint of a plan.
    pub fn from_plan(plan: &SweepPlan) -> Self {
        let mut template = Self::new();
        for (drift, control) in plan.points() {
            template.record(drift, control);
        }
        template
    }

    /// Add a setpoint; repeats are ignored.
    pub fn record(&mut self, drift: f64, control: f64) {
        if self
            .seen
            .insert((VoltageKey::from_volts(drift), VoltageKey::from_volts(control)))
        {
            self.setpoints.push((drift, control));
        }
    }

    /// Setpoints in visiting order.
    pub fn setpoints(&self) -> &[(f64, f64)] {
        &self.setpoints
    }

    /// Number of setpoints.
    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    /// Write the template in calibration file format, creating parent directories.
    pub fn write(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for &(drift, control) in &self.setpoints {
            writer.serialize(CalibrationRecord {
                supply_voltage: drift,
                control_voltage: control,
                frequency_offset: 0.0,
                power_offset: 0.0,
            })?;
        }
        writer.flush()?;
        info!(path = %path.display(), setpoints = self.len(), "Calibration template written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::SecondaryParams;
    use std::io::Write;

    #[test]
    fn absent_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = CalibrationTable::load(dir.path().join("missing.csv"));
        assert!(table.is_empty());
        assert_eq!(table.lookup(5.0, 1.0), OffsetEntry::default());
    }

    #[test]
    fn registered_pair_returns_exact_offsets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "supply-voltage,control-voltage,frequency-offset,power-offset").unwrap();
        writeln!(file, "5.0,1.0,2.0,-1.0").unwrap();
        writeln!(file, "4.7, 0.0, 0.5, 0.25").unwrap();

        let table = CalibrationTable::load(file.path());
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(5.0, 1.0), OffsetEntry::new(2.0, -1.0));
        assert_eq!(table.lookup(4.7, 0.0), OffsetEntry::new(0.5, 0.25));
        assert_eq!(table.lookup(5.0, 0.0), OffsetEntry::default());
        // Earlier lookups do not disturb later ones.
        assert_eq!(table.lookup(5.0, 1.0), OffsetEntry::new(2.0, -1.0));
    }

    #[test]
    fn malformed_file_is_empty_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "supply-voltage,control-voltage,frequency-offset,power-offset").unwrap();
        writeln!(file, "5.0,1.0,two,-1.0").unwrap();

        let table = CalibrationTable::load(file.path());
        assert!(table.is_empty());
    }

    #[test]
    fn template_lists_plan_with_zero_offsets() {
        let params = SecondaryParams {
            u_src_drift_1: 4.7,
            u_src_drift_2: 5.0,
            u_src_drift_3: 0.0,
            u_vco_min: 0.0,
            u_vco_max: 1.0,
            u_vco_delta: 0.5,
            ..Default::default()
        };
        let plan = SweepPlan::from_params(&params).unwrap();
        let template = CalibrationTemplate::from_plan(&plan);
        assert_eq!(template.len(), 6);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("template.csv");
        template.write(&path).unwrap();

        let table = CalibrationTable::load(&path);
        assert_eq!(table.len(), 6);
        assert_eq!(table.lookup(5.0, 0.5), OffsetEntry::default());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("supply-voltage,control-voltage,frequency-offset,power-offset"));
    }

    #[test]
    fn template_ignores_repeats() {
        let mut template = CalibrationTemplate::new();
        template.record(4.7, 1.0);
        template.record(4.7, 1.0000001);
        template.record(4.7, 2.0);
        assert_eq!(template.setpoints(), &[(4.7, 1.0), (4.7, 2.0)]);
    }
}
