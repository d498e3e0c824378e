//! Tuning sweep: parameters, plan, cancellation, lifecycle and the controller
//! that drives the instruments.
//!
//! ```text
//! SecondaryParams ──> SweepPlan ──> SweepController::run ──> ResultAggregator
//!                                         │       ▲
//!                                         │       └── CancellationToken
//!                                         └──> PointObserver (progress, live plots)
//! ```

pub mod cancel;
pub mod controller;
pub mod params;
pub mod plan;
pub mod state;

pub use cancel::CancellationToken;
pub use controller::{NoopObserver, PointObserver, SweepController, SweepTiming};
pub use params::SecondaryParams;
pub use plan::SweepPlan;
pub use state::{ProgressObserver, SweepProgress, SweepState};
