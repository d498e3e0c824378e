//! Measurement data types shared by the sweep controller and the result pipeline.
//!
//! - [`VoltageKey`] turns a voltage into an exact, hashable key (millivolt resolution).
//! - [`RawPoint`] is one instrument readback per visited grid cell, in instrument units.
//! - [`DerivedPoint`] is the same point after unit normalization, plus tuning sensitivity.

pub mod key;
pub mod point;

pub use key::VoltageKey;
pub use point::{DerivedPoint, RawPoint};

/// Hz per MHz.
pub const MEGA: f64 = 1_000_000.0;

/// mA per A.
pub const KILO: f64 = 1_000.0;

/// A per mA.
pub const MILLI: f64 = 1.0 / 1_000.0;
