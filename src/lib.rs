//! # VCO Bench Library
//!
//! Bench automation for characterizing voltage-controlled oscillators. A
//! programmable power source feeds the oscillator's supply rail (the *drift*
//! voltage) and tuning input (the *control* voltage); a spectrum analyzer reads
//! the output frequency and power. A sweep walks the grid of drift × control
//! setpoints and derives the tuning curve, output power, consumption current
//! and tuning sensitivity, merged with optional harmonic measurements.
//!
//! ## Crate Structure
//!
//! - **`bench`**: `BenchController`, the application layer (connect, reset,
//!   measure, parameter persistence, one sweep at a time).
//! - **`calibration`**: per-setpoint frequency/power offsets and the template
//!   file a calibration run starts from.
//! - **`config`**: figment-based configuration (TOML file + `VCO_BENCH_` env).
//! - **`error`**: the `BenchError` enum used across the crate.
//! - **`instrument`**: the `ScpiSession` capability, typed source and analyzer
//!   drivers, the replay bench and the TCP transport.
//! - **`measurement`**: voltage keys and raw/derived point types.
//! - **`results`**: aggregation, harmonic merge, result table and report export.
//! - **`sweep`**: parameters, plan, cancellation, lifecycle and the sweep
//!   controller.
//! - **`tracing_setup`**: structured logging initialisation.

pub mod bench;
pub mod calibration;
pub mod config;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod results;
pub mod sweep;
pub mod tracing_setup;
