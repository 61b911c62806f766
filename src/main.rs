//! Monitor runtime.
//!
//! Runs the configured HTTP monitors against a shared session registry and
//! tears everything down in order when the process is asked to stop.
//!
//! # Architecture Overview
//!
//! ```text
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                          RUNTIME                             │
//!     │                                                              │
//!     │  ┌──────────┐  acquire   ┌──────────────────┐                │
//!     │  │ monitors │──────────▶│ session registry │──▶ transports   │
//!     │  └────┬─────┘            └────────▲─────────┘                │
//!     │       │ stop/cleanup/metrics      │ close_all                │
//!     │  ┌────▼───────────────────────────┴───┐    ┌──────────────┐  │
//!     │  │        cleanup orchestrator        │───▶│  statistics  │  │
//!     │  └────────────────┬───────────────────┘    └──────────────┘  │
//!     │                   │ on failure / second signal               │
//!     │            ┌──────▼────────────┐                             │
//!     │            │ emergency shutdown│                             │
//!     │            └───────────────────┘                             │
//!     └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use monitor_runtime::lifecycle::signals::wait_for_signal;
use monitor_runtime::lifecycle::startup::{load_or_default, start_monitors};
use monitor_runtime::lifecycle::{Runtime, ShutdownOutcome, ShutdownReport};
use monitor_runtime::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "monitor-runtime")]
#[command(about = "Run HTTP monitors with coordinated shutdown", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `observability.log_level`
    #[arg(long)]
    log_level: Option<String>,

    /// Print the shutdown report as JSON on exit
    #[arg(long)]
    print_report: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_or_default(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init_logging(&config.observability);
    tracing::info!("monitor-runtime v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let runtime = Runtime::new(config);
    start_monitors(&runtime)?;

    wait_for_signal().await;

    // A second signal abandons the graceful path.
    let report = tokio::select! {
        report = runtime.terminate(true) => report,
        signal = wait_for_signal() => {
            tracing::warn!(signal = %signal, "Second signal received, forcing shutdown");
            let emergency = runtime.emergency_shutdown().await;
            ShutdownReport::forced(emergency)
        }
    };

    if cli.print_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    match report.outcome {
        ShutdownOutcome::Completed => tracing::info!("Shutdown complete"),
        ShutdownOutcome::Partial => tracing::warn!(failures = report.failures.len(), "Shutdown completed with failures"),
        ShutdownOutcome::Emergency => tracing::error!("Shutdown forced"),
    }
    Ok(())
}
