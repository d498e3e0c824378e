//! Mock bench for running sweeps without hardware.
//!
//! [`MockBench`] simulates the source and the analyzer behind one shared state, so
//! the analyzer's marker follows whatever voltages were last applied to the source.
//! Readings come from a [`VcoModel`] and are fully deterministic. The bench also
//! provides:
//! - a call log per instrument for test verification
//! - failure injection on the next command or on the n-th matching command
//! - optional simulated latency
//!
//! The mock understands the default command vocabulary. Commands it does not
//! recognise are logged and acknowledged without effect.

use super::{ScpiSession, SessionStatus};
use crate::measurement::{KILO, MEGA, MILLI};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Which instrument of the bench a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockRole {
    /// Power source
    Source,
    /// Spectrum analyzer
    Analyzer,
}

impl fmt::Display for MockRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockRole::Source => write!(f, "source"),
            MockRole::Analyzer => write!(f, "analyzer"),
        }
    }
}

/// Oscillator response at one operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VcoResponse {
    /// Output frequency, MHz
    pub frequency_mhz: f64,
    /// Output power, dBm
    pub power_dbm: f64,
    /// Supply current, mA
    pub current_ma: f64,
}

/// Parameters of the linear replay model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockModelConfig {
    /// Frequency at zero control and zero drift voltage, MHz
    pub center_mhz: f64,
    /// Tuning slope, MHz/V of control voltage
    pub slope_mhz_per_v: f64,
    /// Pushing, MHz/V of drift voltage
    pub drift_mhz_per_v: f64,
    /// Constant output power, dBm
    pub power_dbm: f64,
    /// Constant supply current, mA
    pub current_ma: f64,
}

impl Default for MockModelConfig {
    fn default() -> Self {
        Self {
            center_mhz: 1000.0,
            slope_mhz_per_v: 10.0,
            drift_mhz_per_v: 1.0,
            power_dbm: -10.0,
            current_ma: 5.0,
        }
    }
}

type ResponseFn = dyn Fn(f64, f64) -> VcoResponse + Send + Sync;

/// Maps (drift voltage, control voltage) to an oscillator response.
#[derive(Clone)]
pub struct VcoModel {
    response: Arc<ResponseFn>,
}

impl VcoModel {
    /// Linear tuning curve with constant power and current.
    pub fn linear(config: MockModelConfig) -> Self {
        Self::from_fn(move |drift, control| VcoResponse {
            frequency_mhz: config.center_mhz
                + config.slope_mhz_per_v * control
                + config.drift_mhz_per_v * drift,
            power_dbm: config.power_dbm,
            current_ma: config.current_ma,
        })
    }

    /// Arbitrary response function `(drift, control) -> response`.
    pub fn from_fn<F>(response: F) -> Self
    where
        F: Fn(f64, f64) -> VcoResponse + Send + Sync + 'static,
    {
        Self {
            response: Arc::new(response),
        }
    }

    /// Evaluate the model.
    pub fn respond(&self, drift: f64, control: f64) -> VcoResponse {
        (self.response)(drift, control)
    }
}

impl Default for VcoModel {
    fn default() -> Self {
        Self::linear(MockModelConfig::default())
    }
}

impl fmt::Debug for VcoModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VcoModel").finish_non_exhaustive()
    }
}

struct FailureRule {
    role: MockRole,
    prefix: String,
    remaining: usize,
}

struct BenchState {
    model: VcoModel,
    supply_channel: String,
    control_channel: String,
    output_enabled: bool,
    supply_voltage: f64,
    control_voltage: f64,
    freq_offset_mhz: f64,
    power_offset_db: f64,
    auto_calibration: bool,
    peak_searches: usize,
    log: Vec<(MockRole, String)>,
    failures: Vec<FailureRule>,
}

impl BenchState {
    fn new(model: VcoModel) -> Self {
        Self {
            model,
            supply_channel: "p6v".to_string(),
            control_channel: "p25v".to_string(),
            output_enabled: false,
            supply_voltage: 0.0,
            control_voltage: 0.0,
            freq_offset_mhz: 0.0,
            power_offset_db: 0.0,
            auto_calibration: true,
            peak_searches: 0,
            log: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn should_fail(&mut self, role: MockRole, command: &str) -> bool {
        let hit = self
            .failures
            .iter_mut()
            .position(|rule| {
                if rule.role != role || !command.starts_with(&rule.prefix) {
                    return false;
                }
                rule.remaining -= 1;
                rule.remaining == 0
            });
        match hit {
            Some(index) => {
                self.failures.remove(index);
                true
            }
            None => false,
        }
    }

    fn response(&self) -> VcoResponse {
        if self.output_enabled {
            self.model.respond(self.supply_voltage, self.control_voltage)
        } else {
            VcoResponse {
                frequency_mhz: 0.0,
                power_dbm: -120.0,
                current_ma: 0.0,
            }
        }
    }

    fn handle(&mut self, role: MockRole, command: &str) -> Result<Option<String>> {
        self.log.push((role, command.to_string()));
        if self.should_fail(role, command) {
            return Err(anyhow!("Mock {} failure on '{}'", role, command));
        }
        match role {
            MockRole::Source => self.handle_source(command),
            MockRole::Analyzer => self.handle_analyzer(command),
        }
    }

    fn handle_source(&mut self, command: &str) -> Result<Option<String>> {
        if command == "*RST" {
            self.output_enabled = false;
            self.supply_voltage = 0.0;
            self.control_voltage = 0.0;
        } else if command == "OUTP ON" {
            self.output_enabled = true;
        } else if command == "OUTP OFF" {
            self.output_enabled = false;
        } else if let Some(args) = command.strip_prefix("APPLY ") {
            let mut parts = args.split(',');
            let channel = parts.next().unwrap_or_default().trim();
            let volts = parse_quantity(parts.next().unwrap_or_default(), "V")?;
            if channel == self.supply_channel {
                self.supply_voltage = volts;
            } else if channel == self.control_channel {
                self.control_voltage = volts;
            } else {
                return Err(anyhow!("Unknown source channel '{}'", channel));
            }
        } else if command.starts_with("MEAS:CURR?") {
            let amps = self.response().current_ma * MILLI;
            return Ok(Some(format!("{}", amps)));
        }
        Ok(None)
    }

    fn handle_analyzer(&mut self, command: &str) -> Result<Option<String>> {
        if command == "*RST" {
            self.freq_offset_mhz = 0.0;
            self.power_offset_db = 0.0;
            self.auto_calibration = true;
            self.peak_searches = 0;
        } else if let Some(value) = command.strip_prefix(":SENS:FREQ:OFFS ") {
            self.freq_offset_mhz = parse_quantity(value, "MHz")?;
        } else if let Some(value) = command.strip_prefix(":DISP:WIND:TRAC:Y:RLEV:OFFS ") {
            self.power_offset_db = parse_quantity(value, "")?;
        } else if command == ":CAL:AUTO ON" {
            self.auto_calibration = true;
        } else if command == ":CAL:AUTO OFF" {
            self.auto_calibration = false;
        } else if command == ":CALC:MARK1:MAX" {
            self.peak_searches += 1;
        } else if command == ":CALC:MARK1:X?" {
            let hz = (self.response().frequency_mhz + self.freq_offset_mhz) * MEGA;
            return Ok(Some(format!("{}", hz)));
        } else if command == ":CALC:MARK1:Y?" {
            let dbm = self.response().power_dbm + self.power_offset_db;
            return Ok(Some(format!("{}", dbm)));
        }
        Ok(None)
    }
}

fn parse_quantity(text: &str, unit: &str) -> Result<f64> {
    let trimmed = text.trim();
    let number = trimmed.strip_suffix(unit).unwrap_or(trimmed);
    number
        .trim()
        .parse::<f64>()
        .map_err(|e| anyhow!("Invalid quantity '{}': {}", text, e))
}

/// Simulated source + analyzer pair sharing one state.
///
/// # Example
///
/// ```
/// use vco_bench::instrument::mock::{MockBench, MockRole};
/// use vco_bench::instrument::ScpiSession;
///
/// # tokio_test::block_on(async {
/// let bench = MockBench::new();
/// let source = bench.session(MockRole::Source);
/// source.send("OUTP ON").await.unwrap();
/// assert!(bench.output_enabled().await);
/// # })
/// ```
#[derive(Clone)]
pub struct MockBench {
    state: Arc<Mutex<BenchState>>,
    latency: Duration,
}

impl MockBench {
    /// Bench with the default linear model.
    pub fn new() -> Self {
        Self::with_model(VcoModel::default())
    }

    /// Bench driven by a custom model.
    pub fn with_model(model: VcoModel) -> Self {
        Self {
            state: Arc::new(Mutex::new(BenchState::new(model))),
            latency: Duration::ZERO,
        }
    }

    /// Delay every command by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Use other channel names than `p6v` (supply) and `p25v` (control).
    pub async fn set_channels(&self, supply: &str, control: &str) {
        let mut state = self.state.lock().await;
        state.supply_channel = supply.to_string();
        state.control_channel = control.to_string();
    }

    /// Session playing `role` on this bench.
    pub fn session(&self, role: MockRole) -> Arc<MockSession> {
        Arc::new(MockSession {
            role,
            state: Arc::clone(&self.state),
            latency: self.latency,
        })
    }

    /// Fail the next command sent to `role`.
    pub async fn fail_next(&self, role: MockRole) {
        self.fail_on(role, "", 1).await;
    }

    /// Fail the `occurrence`-th command (1-based) to `role` starting with `prefix`.
    pub async fn fail_on(&self, role: MockRole, prefix: &str, occurrence: usize) {
        self.state.lock().await.failures.push(FailureRule {
            role,
            prefix: prefix.to_string(),
            remaining: occurrence.max(1),
        });
    }

    /// Commands received by `role`, in order.
    pub async fn commands(&self, role: MockRole) -> Vec<String> {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Every command received by the bench, in order.
    pub async fn call_log(&self) -> Vec<(MockRole, String)> {
        self.state.lock().await.log.clone()
    }

    /// Clear the call log.
    pub async fn clear_call_log(&self) {
        self.state.lock().await.log.clear();
    }

    /// Whether the source output is on.
    pub async fn output_enabled(&self) -> bool {
        self.state.lock().await.output_enabled
    }

    /// Whether the analyzer's automatic alignment is on.
    pub async fn auto_calibration(&self) -> bool {
        self.state.lock().await.auto_calibration
    }

    /// Offsets currently applied on the analyzer, `(MHz, dB)`.
    pub async fn offsets(&self) -> (f64, f64) {
        let state = self.state.lock().await;
        (state.freq_offset_mhz, state.power_offset_db)
    }

    /// Number of marker peak searches since the last analyzer reset.
    pub async fn peak_searches(&self) -> usize {
        self.state.lock().await.peak_searches
    }

    /// Voltages currently applied, `(supply, control)`.
    pub async fn applied_voltages(&self) -> (f64, f64) {
        let state = self.state.lock().await;
        (state.supply_voltage, state.control_voltage)
    }
}

impl Default for MockBench {
    fn default() -> Self {
        Self::new()
    }
}

/// One instrument of a [`MockBench`].
pub struct MockSession {
    role: MockRole,
    state: Arc<Mutex<BenchState>>,
    latency: Duration,
}

impl MockSession {
    /// Which instrument this session plays.
    pub fn role(&self) -> MockRole {
        self.role
    }

    async fn exchange(&self, command: &str) -> Result<Option<String>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.state.lock().await.handle(self.role, command)
    }
}

#[async_trait]
impl ScpiSession for MockSession {
    async fn send(&self, command: &str) -> Result<()> {
        self.exchange(command).await.map(|_| ())
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.exchange(command)
            .await?
            .ok_or_else(|| anyhow!("Mock {} has no reply for '{}'", self.role, command))
    }

    async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        let detail = match self.role {
            MockRole::Source => format!(
                "output {}, supply {:.3} V, control {:.3} V",
                if state.output_enabled { "on" } else { "off" },
                state.supply_voltage,
                state.control_voltage
            ),
            MockRole::Analyzer => format!(
                "auto cal {}, {} peak search(es)",
                if state.auto_calibration { "on" } else { "off" },
                state.peak_searches
            ),
        };
        SessionStatus::online("mock", format!("mock://{}", self.role), detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marker_follows_applied_voltages() {
        let bench = MockBench::new();
        let source = bench.session(MockRole::Source);
        let analyzer = bench.session(MockRole::Analyzer);

        source.send("APPLY p6v,5.000V,0.050A").await.unwrap();
        source.send("APPLY p25v,2.000V,0.010A").await.unwrap();
        source.send("OUTP ON").await.unwrap();

        let hz: f64 = analyzer.query(":CALC:MARK1:X?").await.unwrap().parse().unwrap();
        assert!((hz / MEGA - 1025.0).abs() < 1e-6);

        let amps: f64 = source.query("MEAS:CURR? p6v").await.unwrap().parse().unwrap();
        assert!((amps * KILO - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn offsets_shift_marker_readback() {
        let bench = MockBench::new();
        let source = bench.session(MockRole::Source);
        let analyzer = bench.session(MockRole::Analyzer);
        source.send("OUTP ON").await.unwrap();
        analyzer.send(":SENS:FREQ:OFFS 2.000MHz").await.unwrap();
        analyzer.send(":DISP:WIND:TRAC:Y:RLEV:OFFS -1.000").await.unwrap();

        assert_eq!(bench.offsets().await, (2.0, -1.0));
        let dbm: f64 = analyzer.query(":CALC:MARK1:Y?").await.unwrap().parse().unwrap();
        assert!((dbm + 11.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failure_is_one_shot() {
        let bench = MockBench::new();
        let source = bench.session(MockRole::Source);

        bench.fail_next(MockRole::Source).await;
        assert!(source.send("OUTP ON").await.is_err());
        assert!(source.send("OUTP ON").await.is_ok());
        assert!(bench.output_enabled().await);
    }

    #[tokio::test]
    async fn fails_on_nth_matching_command() {
        let bench = MockBench::new();
        let analyzer = bench.session(MockRole::Analyzer);
        bench.fail_on(MockRole::Analyzer, ":CALC:MARK1:MAX", 2).await;

        assert!(analyzer.send(":CALC:MARK1:MAX").await.is_ok());
        assert!(analyzer.send(":CAL:AUTO OFF").await.is_ok());
        assert!(analyzer.send(":CALC:MARK1:MAX").await.is_err());
        assert!(analyzer.send(":CALC:MARK1:MAX").await.is_ok());
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let bench = MockBench::new();
        let analyzer = bench.session(MockRole::Analyzer);
        analyzer.send(":CAL:AUTO OFF").await.unwrap();
        analyzer.send(":CALC:MARK1:MAX").await.unwrap();
        analyzer.send("*RST").await.unwrap();

        assert!(bench.auto_calibration().await);
        assert_eq!(bench.peak_searches().await, 0);
        assert_eq!(bench.commands(MockRole::Analyzer).await.len(), 3);
        assert!(bench.commands(MockRole::Source).await.is_empty());
    }

    #[tokio::test]
    async fn query_without_reply_is_an_error() {
        let bench = MockBench::new();
        let analyzer = bench.session(MockRole::Analyzer);
        assert!(analyzer.query(":CAL:AUTO ON").await.is_err());
    }

    #[tokio::test]
    async fn unknown_channel_is_rejected() {
        let bench = MockBench::new();
        let source = bench.session(MockRole::Source);
        assert!(source.send("APPLY n25v,1.000V,0.010A").await.is_err());
    }

    #[tokio::test]
    async fn status_reports_mock_kind() {
        let bench = MockBench::new();
        let status = bench.session(MockRole::Analyzer).status().await;
        assert_eq!(status.kind, "mock");
        assert!(status.connected);
        assert_eq!(status.address, "mock://analyzer");
    }
}
