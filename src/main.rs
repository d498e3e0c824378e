//! CLI entry point for vco-bench
//!
//! # Usage
//!
//! Run a sweep on the replay bench and open the report:
//! ```bash
//! vco-bench measure --mock --open
//! ```
//!
//! Print the setpoint grid of the current parameters:
//! ```bash
//! vco-bench plan --config config/bench.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use vco_bench::bench::{try_measure, BenchController, SharedBench};
use vco_bench::config::{BenchConfig, DEFAULT_CONFIG_PATH};
use vco_bench::results::export::open_report;
use vco_bench::results::ReportExporter;
use vco_bench::sweep::{CancellationToken, ProgressObserver};
use vco_bench::tracing_setup::{self, TracingConfig};

#[derive(Parser)]
#[command(name = "vco-bench")]
#[command(about = "VCO tuning characterization bench", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep and export the report
    Measure {
        /// Use the replay bench regardless of configuration
        #[arg(long)]
        mock: bool,

        /// Open the report directory when done
        #[arg(long)]
        open: bool,
    },

    /// Print the setpoint grid
    Plan,

    /// Write the zero-offset calibration template for the current plan
    Template,

    /// Connect and print instrument status
    Status {
        /// Use the replay bench regardless of configuration
        #[arg(long)]
        mock: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BenchConfig::load_from(&cli.config)?;
    if matches!(cli.command, Commands::Measure { mock: true, .. } | Commands::Status { mock: true }) {
        config.force_mock();
    }
    config.validate()?;
    tracing_setup::init(TracingConfig::from_bench_config(&config)?)?;

    match cli.command {
        Commands::Measure { open, .. } => measure(config, open).await,
        Commands::Plan => print_plan(config),
        Commands::Template => {
            let path = BenchController::new(config)?.write_template()?;
            println!("Template written to {}", path.display());
            Ok(())
        }
        Commands::Status { .. } => {
            let mut bench = BenchController::new(config)?;
            bench.connect().await?;
            for status in bench.status().await? {
                println!(
                    "{:<6} {:<24} {:<9} {}",
                    status.kind,
                    status.address,
                    if status.connected { "online" } else { "offline" },
                    status.detail
                );
            }
            Ok(())
        }
    }
}

async fn measure(config: BenchConfig, open: bool) -> Result<()> {
    let output_dir = config.files.output_dir.clone();
    let mut bench = BenchController::new(config)?;
    bench.connect().await?;
    let shared: SharedBench = Arc::new(Mutex::new(bench));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current point");
            ctrl_c.cancel();
        }
    });

    let (mut observer, mut progress) = ProgressObserver::channel();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = progress.borrow().clone();
            if let (Some(drift), Some(control)) = (p.drift, p.control) {
                info!(
                    "{}/{} ({:.0}%) drift {:.2} V, control {:.2} V",
                    p.completed,
                    p.total,
                    p.fraction() * 100.0,
                    drift,
                    control
                );
            }
        }
    });

    let outcome = try_measure(&shared, &cancel, &mut observer).await;
    drop(observer);
    let _ = printer.await;

    match outcome {
        Ok(report) => {
            let dir = ReportExporter::new(output_dir).export(&report.table, &report.metadata())?;
            println!("Report written to {}", dir.display());
            if open {
                if let Err(e) = open_report(&dir) {
                    warn!(error = %e, "Could not open report directory");
                }
            }
            Ok(())
        }
        Err(e) if e.is_cancellation() => {
            println!("{}", e);
            Ok(())
        }
        Err(e) => {
            error!(error = %e.describe(), "Measurement failed");
            Err(e.into())
        }
    }
}

fn print_plan(config: BenchConfig) -> Result<()> {
    let bench = BenchController::new(config)?;
    let plan = bench.plan()?;
    println!(
        "{} series x {} control voltages = {} points",
        plan.drift_voltages().len(),
        plan.control_voltages().len(),
        plan.len()
    );
    for (drift, control) in plan.points() {
        println!("{:>6.2} V  {:>6.2} V", drift, control);
    }
    Ok(())
}
