//! Harmonic side-channel tables.
//!
//! Harmonic levels are measured in separate runs and supplied as CSV files,
//! one per harmonic order:
//!
//! ```text
//! supply-voltage,control-voltage,relative-level,absolute-level
//! 4.7,0.0,-32.5,-42.5
//! ```
//!
//! They are merged into the result table by exact (drift, control) key.

use crate::error::AppResult;
use crate::measurement::VoltageKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// One line of a harmonic file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicRecord {
    /// Drift voltage, V
    #[serde(rename = "supply-voltage")]
    pub supply_voltage: f64,
    /// Control voltage, V
    #[serde(rename = "control-voltage")]
    pub control_voltage: f64,
    /// Level relative to the carrier, dBc
    #[serde(rename = "relative-level")]
    pub relative_level: f64,
    /// Absolute level, dBm
    #[serde(rename = "absolute-level")]
    pub absolute_level: f64,
}

/// Harmonic level at one setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicLevel {
    /// Level relative to the carrier, dBc
    pub relative_dbc: f64,
    /// Absolute level, dBm
    pub absolute_dbm: f64,
}

/// Harmonic levels of one order, keyed by setpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarmonicTable {
    levels: HashMap<(VoltageKey, VoltageKey), HarmonicLevel>,
}

impl HarmonicTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a harmonic CSV file.
    pub fn read(path: impl AsRef<Path>) -> AppResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;
        let mut table = Self::new();
        for record in reader.deserialize::<HarmonicRecord>() {
            let record = record?;
            table.insert(
                record.supply_voltage,
                record.control_voltage,
                HarmonicLevel {
                    relative_dbc: record.relative_level,
                    absolute_dbm: record.absolute_level,
                },
            );
        }
        Ok(table)
    }

    /// Read an optional file. Absent or unreadable files yield an empty table.
    pub fn load_optional(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::new();
        };
        if !path.exists() {
            info!(path = %path.display(), "No harmonic file");
            return Self::new();
        }
        match Self::read(path) {
            Ok(table) => {
                info!(path = %path.display(), entries = table.len(), "Harmonic levels loaded");
                table
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed harmonic file ignored");
                Self::new()
            }
        }
    }

    /// Register the level at a setpoint.
    pub fn insert(&mut self, drift: f64, control: f64, level: HarmonicLevel) {
        self.levels
            .insert((VoltageKey::from_volts(drift), VoltageKey::from_volts(control)), level);
    }

    /// Level at a setpoint, if measured.
    pub fn get(&self, drift: f64, control: f64) -> Option<HarmonicLevel> {
        self.levels
            .get(&(VoltageKey::from_volts(drift), VoltageKey::from_volts(control)))
            .copied()
    }

    /// Number of setpoints with a level.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether no level is known.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// 2nd and 3rd harmonic tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarmonicSet {
    /// 2nd harmonic
    pub second: HarmonicTable,
    /// 3rd harmonic
    pub third: HarmonicTable,
}

impl HarmonicSet {
    /// Load both orders from optional file paths.
    pub fn load(second: Option<&Path>, third: Option<&Path>) -> Self {
        Self {
            second: HarmonicTable::load_optional(second),
            third: HarmonicTable::load_optional(third),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_levels_by_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "supply-voltage,control-voltage,relative-level,absolute-level").unwrap();
        writeln!(file, "4.7,0.0,-32.5,-42.5").unwrap();
        writeln!(file, "4.7,1.0,-30.0,-40.0").unwrap();

        let set = HarmonicSet::load(Some(file.path()), None);
        assert_eq!(set.second.len(), 2);
        assert!(set.third.is_empty());
        assert_eq!(
            set.second.get(4.7, 1.0),
            Some(HarmonicLevel {
                relative_dbc: -30.0,
                absolute_dbm: -40.0
            })
        );
        assert_eq!(set.second.get(5.0, 1.0), None);
    }

    #[test]
    fn unreadable_file_is_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "just,some,other,columns").unwrap();
        writeln!(file, "a,b,c,d").unwrap();
        assert!(HarmonicTable::load_optional(Some(file.path())).is_empty());

        let dir = tempfile::tempdir().unwrap();
        assert!(HarmonicTable::load_optional(Some(&dir.path().join("x3.csv"))).is_empty());
    }
}
