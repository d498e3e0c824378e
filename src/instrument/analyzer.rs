//! Spectrum analyzer driver.
//!
//! Covers what a tuning sweep needs: the frequency window, reference level,
//! per-setpoint frequency/power offsets, marker peak search and the automatic
//! calibration switch.

use super::{parse_f64_response, render_command, scpi_number, ScpiSession, SessionStatus};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Command vocabulary of the spectrum analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerCommands {
    /// Instrument reset
    pub reset: String,
    /// Frequency span (`{mhz}`)
    pub span: String,
    /// Start frequency (`{ghz}`)
    pub start: String,
    /// Stop frequency (`{ghz}`)
    pub stop: String,
    /// Reference level (`{db}`)
    pub ref_level: String,
    /// Frequency offset applied to the display (`{mhz}`)
    pub freq_offset: String,
    /// Reference level offset applied to the display (`{db}`)
    pub power_offset: String,
    /// Move marker 1 to the strongest signal
    pub peak_search: String,
    /// Query marker 1 frequency, reply in Hz
    pub marker_x: String,
    /// Query marker 1 amplitude, reply in dBm
    pub marker_y: String,
    /// Enable automatic alignment
    pub auto_cal_on: String,
    /// Disable automatic alignment
    pub auto_cal_off: String,
}

impl Default for AnalyzerCommands {
    fn default() -> Self {
        Self {
            reset: "*RST".to_string(),
            span: ":SENS:FREQ:SPAN {mhz}MHz".to_string(),
            start: ":SENS:FREQ:STAR {ghz}GHz".to_string(),
            stop: ":SENS:FREQ:STOP {ghz}GHz".to_string(),
            ref_level: ":DISP:WIND:TRAC:Y:RLEV {db}".to_string(),
            freq_offset: ":SENS:FREQ:OFFS {mhz}MHz".to_string(),
            power_offset: ":DISP:WIND:TRAC:Y:RLEV:OFFS {db}".to_string(),
            peak_search: ":CALC:MARK1:MAX".to_string(),
            marker_x: ":CALC:MARK1:X?".to_string(),
            marker_y: ":CALC:MARK1:Y?".to_string(),
            auto_cal_on: ":CAL:AUTO ON".to_string(),
            auto_cal_off: ":CAL:AUTO OFF".to_string(),
        }
    }
}

/// Analyzer frequency window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerWindow {
    /// Span, MHz
    pub span_mhz: f64,
    /// Start, GHz
    pub start_ghz: f64,
    /// Stop, GHz
    pub stop_ghz: f64,
}

/// Marker readback after a peak search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerReading {
    /// Marker frequency, Hz
    pub frequency_hz: f64,
    /// Marker amplitude, dBm
    pub power_dbm: f64,
}

/// Typed access to the spectrum analyzer over any [`ScpiSession`].
#[derive(Clone)]
pub struct SpectrumAnalyzer {
    session: Arc<dyn ScpiSession>,
    commands: AnalyzerCommands,
}

impl SpectrumAnalyzer {
    /// Wrap a session with the given vocabulary.
    pub fn new(session: Arc<dyn ScpiSession>, commands: AnalyzerCommands) -> Self {
        Self { session, commands }
    }

    /// Reset the instrument.
    pub async fn reset(&self) -> Result<()> {
        self.send(&self.commands.reset).await
    }

    /// Apply span, start and stop.
    pub async fn set_window(&self, window: &AnalyzerWindow) -> Result<()> {
        self.send_rendered(&self.commands.span, "mhz", window.span_mhz).await?;
        self.send_rendered(&self.commands.start, "ghz", window.start_ghz).await?;
        self.send_rendered(&self.commands.stop, "ghz", window.stop_ghz).await
    }

    /// Set the reference level in dB.
    pub async fn set_ref_level(&self, db: f64) -> Result<()> {
        self.send_rendered(&self.commands.ref_level, "db", db).await
    }

    /// Set the display frequency offset (MHz) and reference level offset (dB).
    pub async fn set_offsets(&self, freq_offset_mhz: f64, power_offset_db: f64) -> Result<()> {
        self.send_rendered(&self.commands.freq_offset, "mhz", freq_offset_mhz).await?;
        self.send_rendered(&self.commands.power_offset, "db", power_offset_db).await
    }

    /// Move marker 1 to the peak.
    pub async fn peak_search(&self) -> Result<()> {
        self.send(&self.commands.peak_search).await
    }

    /// Read marker 1 frequency and amplitude.
    pub async fn read_marker(&self) -> Result<MarkerReading> {
        let frequency_hz = self.query_f64(&self.commands.marker_x).await?;
        let power_dbm = self.query_f64(&self.commands.marker_y).await?;
        Ok(MarkerReading {
            frequency_hz,
            power_dbm,
        })
    }

    /// Switch automatic alignment on or off.
    pub async fn set_auto_calibration(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.send(&self.commands.auto_cal_on).await
        } else {
            self.send(&self.commands.auto_cal_off).await
        }
    }

    /// Health of the underlying session.
    pub async fn status(&self) -> SessionStatus {
        self.session.status().await
    }

    /// The vocabulary in use.
    pub fn commands(&self) -> &AnalyzerCommands {
        &self.commands
    }

    async fn send_rendered(&self, template: &str, var: &str, value: f64) -> Result<()> {
        let command = render_command(template, &[(var, scpi_number(value, 3))])?;
        self.send(&command).await
    }

    async fn send(&self, command: &str) -> Result<()> {
        self.session
            .send(command)
            .await
            .with_context(|| format!("Analyzer command '{}' failed", command))
    }

    async fn query_f64(&self, command: &str) -> Result<f64> {
        let reply = self
            .session
            .query(command)
            .await
            .with_context(|| format!("Analyzer query '{}' failed", command))?;
        parse_f64_response(&reply)
    }
}
