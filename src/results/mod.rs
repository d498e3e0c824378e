//! From raw readings to a finished report.
//!
//! - [`ResultAggregator`] derives units and tuning sensitivity point by point
//!   and keeps per-series curves for live plots.
//! - [`HarmonicSet`] holds the optional 2nd/3rd harmonic side-channels.
//! - [`ResultTable`] is the immutable, block-grouped snapshot of a sweep.
//! - [`ReportExporter`] writes the table and its chart descriptions to disk.

pub mod aggregator;
pub mod export;
pub mod harmonics;
pub mod table;

pub use aggregator::{Quantity, ResultAggregator, SeriesBuffers};
pub use export::{ReportExporter, ReportMetadata};
pub use harmonics::{HarmonicLevel, HarmonicSet, HarmonicTable};
pub use table::{ResultTable, TableBlock, TableRow};
