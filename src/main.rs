//! CLI Entry Point for thermo_daq
//!
//! Provides a command-line interface for:
//! - Running the acquisition loop headless, optionally logging a session
//! - Checking a configuration file
//!
//! # Usage
//!
//! Run with the simulated card for one minute, logging to CSV:
//! ```bash
//! thermo_daq run --hardware mock --session --duration 60
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! thermo_daq check-config --config config/thermo_daq.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use thermo_daq::acquisition::{AcquisitionController, AcquisitionEvent};
use thermo_daq::config::{AppConfig, HardwareDriver};
use thermo_daq::diagnostics::{self, DiagnosticSink};
use thermo_daq::hardware::{DeviceConnector, MockConnector, MockThermocouple, NoHardware};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "thermo_daq")]
#[command(about = "Eight-channel thermocouple logger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run acquisition until Ctrl+C (or for a fixed duration)
    Run {
        /// Configuration file
        #[arg(long, default_value = "config/thermo_daq.toml")]
        config: PathBuf,

        /// Log readings to the daily CSV file
        #[arg(long)]
        session: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Override the configured hardware driver
        #[arg(long, value_enum)]
        hardware: Option<DriverArg>,

        /// Print batches as JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = "config/thermo_daq.toml")]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DriverArg {
    None,
    Mock,
}

impl From<DriverArg> for HardwareDriver {
    fn from(arg: DriverArg) -> Self {
        match arg {
            DriverArg::None => HardwareDriver::None,
            DriverArg::Mock => HardwareDriver::Mock,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            session,
            duration,
            hardware,
            json,
        } => run(config, session, duration, hardware, json).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn connector_for(driver: HardwareDriver) -> Box<dyn DeviceConnector> {
    match driver {
        HardwareDriver::None => Box::new(NoHardware),
        HardwareDriver::Mock => Box::new(MockConnector::new(MockThermocouple::new())),
    }
}

async fn run(
    config_path: PathBuf,
    session: bool,
    duration: Option<u64>,
    hardware: Option<DriverArg>,
    json: bool,
) -> Result<()> {
    let mut config = AppConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(driver) = hardware {
        config.hardware.driver = driver.into();
    }

    let diag = DiagnosticSink::init(&config.diagnostics);
    diagnostics::install_tracing(diag.clone(), &config.application.log_level)
        .map_err(anyhow::Error::msg)?;
    diag.info("main", format!("{} starting", config.application.name));
    tracing::debug!(config = %config_path.display(), "configuration loaded");

    let mut controller =
        AcquisitionController::new(&config, connector_for(config.hardware.driver), diag.clone());
    let mut events = controller.subscribe();

    controller.start_acquisition().await?;
    if session {
        controller.start_session().await?;
        if let Some(path) = controller.session_path().await {
            println!("📁 Logging to {}", path.display());
        }
    }
    println!("📡 Acquiring every {}s - Press Ctrl+C to stop", controller.poll_interval().as_secs());

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(n)) => eprintln!("⚠️  Dropped {n} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("\n👋 Shutting down...");
    controller.shutdown().await?;
    diag.info("main", "Shutdown complete");
    Ok(())
}

fn print_event(event: &AcquisitionEvent, json: bool) -> Result<()> {
    match event {
        AcquisitionEvent::NewReadings(batch) if json => {
            println!("{}", serde_json::to_string(batch)?);
        }
        AcquisitionEvent::NewReadings(batch) => {
            let values: Vec<String> = batch
                .row()
                .iter()
                .map(|v| match v {
                    Some(c) if !c.is_nan() => format!("{c:>6.1}"),
                    Some(_) => "   ERR".to_string(),
                    None => "     -".to_string(),
                })
                .collect();
            println!(
                "{} #{:<5} {}",
                batch.timestamp.format("%H:%M:%S"),
                batch.cycle,
                values.join(" ")
            );
        }
        AcquisitionEvent::ConnectivityChanged { channel, state } => {
            println!("🔌 {channel} {state}");
        }
        AcquisitionEvent::ReadFailed { channel, reason } => {
            println!("⚠️  {channel} read failed: {reason}");
        }
        AcquisitionEvent::SessionStateChanged { active } => {
            println!("📁 Session {}", if *active { "started" } else { "stopped" });
        }
        AcquisitionEvent::SourceSelected(kind) => {
            println!("✅ Using {kind} source");
        }
        AcquisitionEvent::SourceFallback { reason } => {
            println!("⚠️  Hardware unavailable ({reason}), using synthetic data");
        }
    }
    Ok(())
}

fn check_config(config_path: PathBuf) -> Result<()> {
    let config = AppConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    println!("✅ {} is valid", config_path.display());
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
