//! The finished result table.
//!
//! Rows are grouped into one block per drift voltage, in the order the series
//! were measured. Blocks sit side by side in the export, so every block is
//! padded with empty rows to the length of the longest one.

use super::harmonics::{HarmonicLevel, HarmonicSet};
use crate::error::{AppResult, BenchError};
use crate::measurement::{DerivedPoint, VoltageKey};

/// A report holds at most this many drift-voltage blocks.
pub const MAX_BLOCKS: usize = 3;

/// Column names of one block, in export order.
pub const BLOCK_COLUMNS: [&str; 9] = [
    "U_ctrl, V",
    "F, MHz",
    "P, dBm",
    "I, mA",
    "S, MHz/V",
    "K2 rel, dBc",
    "P2 abs, dBm",
    "K3 rel, dBc",
    "P3 abs, dBm",
];

/// One measured row of a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableRow {
    /// Control voltage, V
    pub control_voltage: f64,
    /// Output frequency, MHz
    pub frequency_mhz: f64,
    /// Output power, dBm
    pub power_dbm: f64,
    /// Supply current, mA
    pub current_ma: f64,
    /// Tuning sensitivity, MHz/V
    pub sensitivity_mhz_per_v: Option<f64>,
    /// 2nd harmonic, if measured at this setpoint
    pub second_harmonic: Option<HarmonicLevel>,
    /// 3rd harmonic, if measured at this setpoint
    pub third_harmonic: Option<HarmonicLevel>,
}

impl TableRow {
    /// Cells in [`BLOCK_COLUMNS`] order.
    pub fn cells(&self) -> [Option<f64>; 9] {
        [
            Some(self.control_voltage),
            Some(self.frequency_mhz),
            Some(self.power_dbm),
            Some(self.current_ma),
            self.sensitivity_mhz_per_v,
            self.second_harmonic.map(|h| h.relative_dbc),
            self.second_harmonic.map(|h| h.absolute_dbm),
            self.third_harmonic.map(|h| h.relative_dbc),
            self.third_harmonic.map(|h| h.absolute_dbm),
        ]
    }
}

/// Rows of one drift-voltage series; `None` rows are padding.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBlock {
    /// Drift voltage of the series, V
    pub drift_voltage: f64,
    /// Measured rows followed by padding
    pub rows: Vec<Option<TableRow>>,
}

impl TableBlock {
    /// Rows that hold a measurement.
    pub fn measured(&self) -> impl Iterator<Item = &TableRow> + '_ {
        self.rows.iter().flatten()
    }

    /// Block title used in the export header.
    pub fn title(&self) -> String {
        format!("U_drift = {:.2} V", self.drift_voltage)
    }
}

/// Immutable snapshot of one sweep, ready for export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    blocks: Vec<TableBlock>,
}

impl ResultTable {
    /// Group points into blocks and merge the harmonic side-channels.
    ///
    /// Fails when the points span more than [`MAX_BLOCKS`] drift voltages.
    pub fn build(points: &[DerivedPoint], harmonics: &HarmonicSet) -> AppResult<Self> {
        let mut order: Vec<VoltageKey> = Vec::new();
        let mut blocks: Vec<TableBlock> = Vec::new();

        for point in points {
            let key = point.drift_key();
            let index = match order.iter().position(|k| *k == key) {
                Some(index) => index,
                None => {
                    if order.len() == MAX_BLOCKS {
                        return Err(BenchError::Processing(format!(
                            "Result table supports at most {} drift voltages",
                            MAX_BLOCKS
                        )));
                    }
                    order.push(key);
                    blocks.push(TableBlock {
                        drift_voltage: point.drift_voltage,
                        rows: Vec::new(),
                    });
                    order.len() - 1
                }
            };
            blocks[index].rows.push(Some(TableRow {
                control_voltage: point.control_voltage,
                frequency_mhz: point.frequency_mhz,
                power_dbm: point.power_dbm,
                current_ma: point.current_ma,
                sensitivity_mhz_per_v: point.sensitivity_mhz_per_v,
                second_harmonic: harmonics.second.get(point.drift_voltage, point.control_voltage),
                third_harmonic: harmonics.third.get(point.drift_voltage, point.control_voltage),
            }));
        }

        let longest = blocks.iter().map(|b| b.rows.len()).max().unwrap_or(0);
        for block in &mut blocks {
            block.rows.resize(longest, None);
        }
        Ok(Self { blocks })
    }

    /// Blocks in measurement order.
    pub fn blocks(&self) -> &[TableBlock] {
        &self.blocks
    }

    /// Rows per block after padding.
    pub fn row_count(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.rows.len())
    }

    /// Whether the table holds no measurement.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Side-by-side cells of row `index` across all blocks.
    pub fn row_cells(&self, index: usize) -> Vec<Option<f64>> {
        self.blocks
            .iter()
            .flat_map(|block| match block.rows.get(index).copied().flatten() {
                Some(row) => row.cells(),
                None => [None; 9],
            })
            .collect()
    }
}
