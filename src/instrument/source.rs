//! Programmable power source driver.
//!
//! One output rail feeds the oscillator supply (the drift voltage), a second rail
//! drives its tuning input (the control voltage). Both are set with the same
//! `APPLY` template and differ only by channel name.

use super::{parse_f64_response, render_command, scpi_number, ScpiSession, SessionStatus};
use crate::measurement::MILLI;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Command vocabulary of the power source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCommands {
    /// Instrument reset
    pub reset: String,
    /// Enable all outputs
    pub output_on: String,
    /// Disable all outputs
    pub output_off: String,
    /// Set voltage and current limit on a channel (`{channel}`, `{volts}`, `{amps}`)
    pub apply: String,
    /// Query output current of a channel (`{channel}`), reply in A
    pub measure_current: String,
    /// Channel feeding the oscillator supply rail
    pub supply_channel: String,
    /// Channel feeding the tuning input
    pub control_channel: String,
}

impl Default for SourceCommands {
    fn default() -> Self {
        Self {
            reset: "*RST".to_string(),
            output_on: "OUTP ON".to_string(),
            output_off: "OUTP OFF".to_string(),
            apply: "APPLY {channel},{volts}V,{amps}A".to_string(),
            measure_current: "MEAS:CURR? {channel}".to_string(),
            supply_channel: "p6v".to_string(),
            control_channel: "p25v".to_string(),
        }
    }
}

/// Typed access to the power source over any [`ScpiSession`].
#[derive(Clone)]
pub struct PowerSource {
    session: Arc<dyn ScpiSession>,
    commands: SourceCommands,
}

impl PowerSource {
    /// Wrap a session with the given vocabulary.
    pub fn new(session: Arc<dyn ScpiSession>, commands: SourceCommands) -> Self {
        Self { session, commands }
    }

    /// Reset the instrument and make sure the outputs are off.
    pub async fn reset(&self) -> Result<()> {
        self.session
            .send(&self.commands.reset)
            .await
            .context("Source reset failed")?;
        self.set_output(false).await
    }

    /// Switch the outputs on or off.
    pub async fn set_output(&self, enabled: bool) -> Result<()> {
        let command = if enabled {
            &self.commands.output_on
        } else {
            &self.commands.output_off
        };
        debug!(enabled, "source output");
        self.session
            .send(command)
            .await
            .with_context(|| format!("Source output {} failed", if enabled { "on" } else { "off" }))
    }

    /// Set the supply rail voltage with a current limit in mA.
    pub async fn apply_supply(&self, volts: f64, max_current_ma: f64) -> Result<()> {
        let channel = self.commands.supply_channel.clone();
        self.apply(&channel, volts, max_current_ma).await
    }

    /// Set the control (tuning) voltage with a current limit in mA.
    pub async fn apply_control(&self, volts: f64, max_current_ma: f64) -> Result<()> {
        let channel = self.commands.control_channel.clone();
        self.apply(&channel, volts, max_current_ma).await
    }

    async fn apply(&self, channel: &str, volts: f64, max_current_ma: f64) -> Result<()> {
        let command = render_command(
            &self.commands.apply,
            &[
                ("channel", channel.to_string()),
                ("volts", scpi_number(volts, 3)),
                ("amps", scpi_number(max_current_ma * MILLI, 3)),
            ],
        )?;
        self.session
            .send(&command)
            .await
            .with_context(|| format!("Source command '{}' failed", command))
    }

    /// Read back the supply rail current in A.
    pub async fn measure_supply_current(&self) -> Result<f64> {
        let command = render_command(
            &self.commands.measure_current,
            &[("channel", self.commands.supply_channel.clone())],
        )?;
        let reply = self
            .session
            .query(&command)
            .await
            .with_context(|| format!("Source query '{}' failed", command))?;
        parse_f64_response(&reply)
    }

    /// Health of the underlying session.
    pub async fn status(&self) -> SessionStatus {
        self.session.status().await
    }

    /// The vocabulary in use.
    pub fn commands(&self) -> &SourceCommands {
        &self.commands
    }
}
