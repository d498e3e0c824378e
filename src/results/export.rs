//! Report export.
//!
//! A report is a directory `vco-tune-<timestamp>/` holding:
//!
//! - `table.csv`: run metadata as `#`-prefixed JSON lines, a two-row header
//!   (block titles, column names) and the side-by-side drift-voltage blocks.
//!   Absent values are empty cells.
//! - `charts.json`: six chart descriptions with one curve per drift voltage,
//!   ready for any plotting front end.

use super::table::{ResultTable, TableBlock, BLOCK_COLUMNS};
use crate::error::{AppResult, BenchError};
use crate::sweep::SecondaryParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Run information written at the top of the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Identifier of the sweep
    pub run_id: Uuid,
    /// When the report was produced
    pub timestamp: DateTime<Utc>,
    /// Software version and host name
    pub system_info: HashMap<String, String>,
    /// Parameters the sweep ran with
    pub params: SecondaryParams,
    /// Number of measured points
    pub points: usize,
}

impl ReportMetadata {
    /// Metadata stamped now, with the local host name when available.
    pub fn new(run_id: Uuid, params: SecondaryParams, points: usize) -> Self {
        let mut system_info = HashMap::new();
        system_info.insert(
            "software_version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        if let Ok(hostname) = hostname::get() {
            if let Ok(hostname) = hostname.into_string() {
                system_info.insert("hostname".to_string(), hostname);
            }
        }
        Self {
            run_id,
            timestamp: Utc::now(),
            system_info,
            params,
            points,
        }
    }
}

/// One labelled curve of a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartCurve {
    /// Legend entry
    pub label: String,
    /// `[x, y]` pairs
    pub points: Vec<[f64; 2]>,
}

/// Description of one chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// Chart title
    pub title: String,
    /// X axis title
    pub x_title: String,
    /// Y axis title
    pub y_title: String,
    /// One curve per drift voltage
    pub curves: Vec<ChartCurve>,
}

/// Charted quantities: title, y axis, block column.
const CHARTS: [(&str, &str, usize); 6] = [
    ("Tuning curve", "F, MHz", 1),
    ("Output power", "P, dBm", 2),
    ("2nd harmonic level", "K2, dBc", 5),
    ("3rd harmonic level", "K3, dBc", 7),
    ("Consumption current", "I, mA", 3),
    ("Tuning sensitivity", "S, MHz/V", 4),
];

/// Writes reports below an output directory.
#[derive(Debug, Clone)]
pub struct ReportExporter {
    output_dir: PathBuf,
}

impl ReportExporter {
    /// Exporter writing below `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write a report and return its directory.
    pub fn export(&self, table: &ResultTable, metadata: &ReportMetadata) -> AppResult<PathBuf> {
        let dir = self.output_dir.join(format!(
            "vco-tune-{}",
            metadata.timestamp.format("%Y%m%d-%H%M%S-%3f")
        ));
        fs::create_dir_all(&dir)?;

        write_table(&dir.join("table.csv"), table, metadata)?;
        let charts = charts(table);
        fs::write(dir.join("charts.json"), serde_json::to_string_pretty(&charts)?)?;

        info!(dir = %dir.display(), blocks = table.blocks().len(), "Report written");
        Ok(dir)
    }
}

/// Chart descriptions for a table, in report order.
pub fn charts(table: &ResultTable) -> Vec<ChartSpec> {
    CHARTS
        .iter()
        .map(|&(title, y_title, column)| ChartSpec {
            title: title.to_string(),
            x_title: BLOCK_COLUMNS[0].to_string(),
            y_title: y_title.to_string(),
            curves: table
                .blocks()
                .iter()
                .map(|block| curve(block, column))
                .collect(),
        })
        .collect()
}

fn curve(block: &TableBlock, column: usize) -> ChartCurve {
    ChartCurve {
        label: block.title(),
        points: block
            .measured()
            .filter_map(|row| {
                let cells = row.cells();
                cells[column].map(|y| [row.control_voltage, y])
            })
            .collect(),
    }
}

fn write_table(path: &Path, table: &ResultTable, metadata: &ReportMetadata) -> AppResult<()> {
    let mut file = File::create(path)?;
    let json = serde_json::to_string_pretty(metadata)?;
    for line in json.lines() {
        writeln!(file, "# {}", line)?;
    }

    let mut writer = csv::Writer::from_writer(file);
    if table.is_empty() {
        writer.flush()?;
        return Ok(());
    }

    let titles: Vec<String> = table
        .blocks()
        .iter()
        .flat_map(|block| {
            std::iter::once(block.title()).chain(std::iter::repeat(String::new()).take(BLOCK_COLUMNS.len() - 1))
        })
        .collect();
    writer.write_record(&titles)?;

    let columns: Vec<&str> = table
        .blocks()
        .iter()
        .flat_map(|_| BLOCK_COLUMNS.iter().copied())
        .collect();
    writer.write_record(&columns)?;

    for index in 0..table.row_count() {
        let record: Vec<String> = table
            .row_cells(index)
            .into_iter()
            .map(|cell| cell.map(|v| v.to_string()).unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Open a report directory with the system file browser.
pub fn open_report(dir: &Path) -> AppResult<()> {
    opener::open(dir).map_err(|e| BenchError::Io(std::io::Error::other(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::RawPoint;
    use crate::results::{HarmonicSet, ResultAggregator};

    fn sample_table() -> ResultTable {
        let mut aggregator = ResultAggregator::new();
        for (drift, controls) in [(4.7, vec![0.0, 1.0, 2.0]), (5.0, vec![0.0, 1.0])] {
            for control in controls {
                aggregator.add_point(RawPoint {
                    drift_voltage: drift,
                    control_voltage: control,
                    frequency_hz: (control * 10.0 + drift) * 1e6,
                    power_dbm: -10.0,
                    current_a: 0.005,
                });
            }
        }
        aggregator.finalize(&HarmonicSet::default()).unwrap()
    }

    #[test]
    fn charts_have_one_curve_per_series() {
        let charts = charts(&sample_table());
        assert_eq!(charts.len(), 6);
        assert_eq!(charts[0].title, "Tuning curve");
        assert_eq!(charts[0].curves.len(), 2);
        assert_eq!(charts[0].curves[0].points.len(), 3);
        assert_eq!(charts[0].curves[1].label, "U_drift = 5.00 V");
        // No harmonic data, no harmonic points.
        assert!(charts[2].curves.iter().all(|c| c.points.is_empty()));
        // Sensitivity starts at the second point.
        assert_eq!(charts[5].curves[0].points.len(), 2);
    }

    #[test]
    fn export_writes_table_and_charts() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table();
        let metadata = ReportMetadata::new(Uuid::new_v4(), SecondaryParams::default(), 5);

        let report = ReportExporter::new(dir.path()).export(&table, &metadata).unwrap();
        assert!(report.starts_with(dir.path()));

        let text = fs::read_to_string(report.join("table.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("# {"));
        assert!(text.contains(&metadata.run_id.to_string()));

        let data: Vec<&str> = lines.iter().copied().filter(|l| !l.starts_with('#')).collect();
        // Two header rows plus three padded data rows.
        assert_eq!(data.len(), 5);
        assert!(data[0].starts_with("U_drift = 4.70 V"));
        assert!(data[1].starts_with("\"U_ctrl, V\",\"F, MHz\""));
        // Padding row of the 5.0 V block is empty.
        assert!(data[4].ends_with(",,,,,,,,"));

        let charts: Vec<ChartSpec> =
            serde_json::from_str(&fs::read_to_string(report.join("charts.json")).unwrap()).unwrap();
        assert_eq!(charts.len(), 6);
    }
}
