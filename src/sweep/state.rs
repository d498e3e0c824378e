//! Sweep lifecycle and progress reporting.

use super::controller::PointObserver;
use super::SweepPlan;
use crate::measurement::{DerivedPoint, RawPoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Lifecycle of one sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    /// No sweep started yet
    Idle,
    /// Loading plan and calibration, resetting instruments
    Preparing,
    /// Visiting setpoints
    Running,
    /// Returning instruments to their safe state
    ShuttingDown,
    /// All setpoints visited
    Completed,
    /// Stopped by the operator
    Cancelled,
    /// Stopped by an instrument or processing fault
    Failed,
}

impl SweepState {
    /// Whether the sweep has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether a new sweep may start from this state.
    pub fn can_begin(&self) -> bool {
        matches!(self, Self::Idle) || self.is_terminal()
    }
}

impl fmt::Display for SweepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of sweep progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepProgress {
    /// Current state
    pub state: SweepState,
    /// Points emitted so far
    pub completed: usize,
    /// Points in the plan
    pub total: usize,
    /// Drift voltage of the last point
    pub drift: Option<f64>,
    /// Control voltage of the last point
    pub control: Option<f64>,
}

impl Default for SweepProgress {
    fn default() -> Self {
        Self {
            state: SweepState::Idle,
            completed: 0,
            total: 0,
            drift: None,
            control: None,
        }
    }
}

impl SweepProgress {
    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Publishes [`SweepProgress`] on a watch channel.
pub struct ProgressObserver {
    tx: watch::Sender<SweepProgress>,
    progress: SweepProgress,
}

impl ProgressObserver {
    /// Observer plus the receiving end for UIs and the CLI.
    pub fn channel() -> (Self, watch::Receiver<SweepProgress>) {
        let (tx, rx) = watch::channel(SweepProgress::default());
        (
            Self {
                tx,
                progress: SweepProgress::default(),
            },
            rx,
        )
    }

    /// Latest published snapshot.
    pub fn progress(&self) -> &SweepProgress {
        &self.progress
    }

    fn publish(&self) {
        self.tx.send_replace(self.progress.clone());
    }
}

impl PointObserver for ProgressObserver {
    fn on_start(&mut self, plan: &SweepPlan) {
        self.progress = SweepProgress {
            total: plan.len(),
            ..SweepProgress::default()
        };
        self.publish();
    }

    fn on_point(&mut self, raw: &RawPoint, _derived: &DerivedPoint) {
        self.progress.completed += 1;
        self.progress.drift = Some(raw.drift_voltage);
        self.progress.control = Some(raw.control_voltage);
        self.publish();
    }

    fn on_state(&mut self, state: SweepState) {
        self.progress.state = state;
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_allow_restart() {
        assert!(SweepState::Idle.can_begin());
        assert!(SweepState::Cancelled.can_begin());
        assert!(!SweepState::Running.can_begin());
        assert!(!SweepState::ShuttingDown.is_terminal());
    }

    #[test]
    fn observer_publishes_snapshots() {
        let plan = SweepPlan::from_grid(vec![5.0], vec![0.0, 1.0]).unwrap();
        let (mut observer, rx) = ProgressObserver::channel();

        observer.on_start(&plan);
        observer.on_state(SweepState::Running);
        let raw = RawPoint {
            drift_voltage: 5.0,
            control_voltage: 1.0,
            frequency_hz: 1.0e9,
            power_dbm: -10.0,
            current_a: 0.005,
        };
        observer.on_point(&raw, &DerivedPoint::from_raw(&raw));

        let progress = rx.borrow().clone();
        assert_eq!(progress.state, SweepState::Running);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, 2);
        assert_eq!(progress.control, Some(1.0));
        assert!((progress.fraction() - 0.5).abs() < 1e-12);
    }
}
