//! Instrument sessions and drivers.
//!
//! The sweep only ever talks to instruments through [`ScpiSession`], a plain
//! command/query channel. Which implementation sits behind it is a configuration
//! choice:
//!
//! - [`mock::MockBench`] - deterministic replay bench for offline runs and tests
//! - [`tcp::TcpScpiSession`] - raw-socket SCPI (LXI port 5025)
//!
//! On top of a session, [`source::PowerSource`] and [`analyzer::SpectrumAnalyzer`]
//! render the instrument vocabulary from overridable command templates.

pub mod analyzer;
pub mod mock;
pub mod source;
pub mod tcp;

pub use analyzer::{AnalyzerCommands, SpectrumAnalyzer};
pub use source::{PowerSource, SourceCommands};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Command/query channel to one physical (or simulated) instrument.
///
/// Commands are ASCII strings passed through unchanged. Implementations own any
/// retry policy; callers treat every error as fatal for the current operation.
#[async_trait]
pub trait ScpiSession: Send + Sync {
    /// Send a command without expecting a response.
    async fn send(&self, command: &str) -> Result<()>;

    /// Send a command and return the textual response.
    async fn query(&self, command: &str) -> Result<String>;

    /// Implementation-defined health descriptor.
    async fn status(&self) -> SessionStatus;
}

/// Health descriptor reported by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session kind ("mock", "tcp", ...)
    pub kind: String,
    /// Address or resource string
    pub address: String,
    /// Whether the session can currently carry commands
    pub connected: bool,
    /// Free-form detail (identity string, last error, ...)
    pub detail: String,
}

impl SessionStatus {
    /// Status for a session that is up.
    pub fn online(kind: impl Into<String>, address: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            address: address.into(),
            connected: true,
            detail: detail.into(),
        }
    }

    /// Status for a session that is down.
    pub fn offline(kind: impl Into<String>, address: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            address: address.into(),
            connected: false,
            detail: detail.into(),
        }
    }
}

/// Parse a floating-point response from a SCPI query.
///
/// Handles surrounding whitespace and the leading `+` many instruments emit.
/// Non-finite readings (`NaN`, `inf`) are rejected.
pub fn parse_f64_response(response: &str) -> Result<f64> {
    let trimmed = response.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let value = trimmed
        .parse::<f64>()
        .with_context(|| format!("Failed to parse SCPI response as f64: '{}'", response))?;
    if !value.is_finite() {
        return Err(anyhow!("Non-finite SCPI response: '{}'", response.trim()));
    }
    Ok(value)
}

/// Render a command template such as `"APPLY {channel},{volts}V,{amps}A"`.
pub fn render_command(template: &str, vars: &[(&str, String)]) -> Result<String> {
    let context: HashMap<String, String> = vars
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    strfmt::strfmt(template, &context)
        .map_err(|e| anyhow!("Failed to format command '{}': {}", template, e))
}

/// Format a number for the instrument: fixed decimals, no exponent.
pub(crate) fn scpi_number(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scpi_numbers() {
        assert_eq!(parse_f64_response("+1.25E+09\n").unwrap(), 1.25e9);
        assert_eq!(parse_f64_response("  -10.5 ").unwrap(), -10.5);
        assert!(parse_f64_response("ERR").is_err());
    }

    #[test]
    fn rejects_non_finite_numbers() {
        for reply in ["NaN", "nan\n", "inf", "+inf", "-infinity", "9.91E+370"] {
            let err = parse_f64_response(reply).unwrap_err();
            assert!(err.to_string().contains("SCPI response"), "{reply}: {err}");
        }
    }

    #[test]
    fn renders_templates() {
        let cmd = render_command(
            "APPLY {channel},{volts}V,{amps}A",
            &[
                ("channel", "p6v".to_string()),
                ("volts", scpi_number(4.7, 3)),
                ("amps", scpi_number(0.05, 3)),
            ],
        )
        .unwrap();
        assert_eq!(cmd, "APPLY p6v,4.700V,0.050A");
    }

    #[test]
    fn missing_template_variable_is_an_error() {
        assert!(render_command("APPLY {channel}", &[]).is_err());
    }
}
