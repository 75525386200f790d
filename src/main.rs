//! XL2 rig daemon - Main entry point
//!
//! Loads settings, installs tracing, finds the analyzer and GPS receiver, and keeps the
//! analyzer sampling until Ctrl+C (or SIGTERM), then disconnects both devices.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use xl2_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use xl2_daq::events::RigEvent;
use xl2_daq::{ApiError, Rig};

/// Command-line arguments for xl2_daq
#[derive(Parser, Debug)]
#[command(name = "xl2_daq")]
#[command(about = "Finds an XL2 analyzer and GPS receiver on serial ports and streams spectra")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "XL2DAQ_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Discover, connect and stream until interrupted (default)
    #[default]
    Run,
    /// Run one discovery pass and print the candidates as JSON
    Scan,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load_from(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    if let Command::Config = args.command.unwrap_or_default() {
        let rendered = toml::to_string_pretty(&settings).context("Failed to render configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    xl2_daq::logging::init(&settings.application).context("Failed to initialize logging")?;
    info!(
        app = %settings.application.name,
        config = %args.config.display(),
        "starting"
    );

    let rig = Rig::new(settings);
    match args.command.unwrap_or_default() {
        Command::Scan => scan(&rig).await,
        _ => run(rig).await,
    }
}

async fn scan(rig: &Rig) -> Result<()> {
    let report = match rig.orchestrator.rescan().await {
        Ok(report) => report,
        Err(e) => {
            let api = ApiError::from_error(&e, rig.settings.application.is_development());
            if let Ok(json) = serde_json::to_string_pretty(&api) {
                eprintln!("{json}");
            }
            return Err(e).context("Port discovery failed");
        }
    };
    let json = serde_json::to_string_pretty(&report).context("Failed to render scan report")?;
    println!("{json}");
    Ok(())
}

async fn run(rig: Rig) -> Result<()> {
    let development = rig.settings.application.is_development();
    let mut events = rig.events.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event, development),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = rig.orchestrator.run_startup().await;
    for (role, outcome) in [("xl2", &result.connections.xl2), ("gps", &result.connections.gps)] {
        if outcome.success {
            info!(role, port = ?outcome.port, "ready");
        } else {
            // Keep running; a later reconnect can still bring the device up
            warn!(role, error = ?outcome.error, "not connected");
        }
    }

    shutdown_signal().await;

    rig.orchestrator.shutdown().await;
    forwarder.abort();
    info!("shutdown complete");
    Ok(())
}

fn log_event(event: &RigEvent, development: bool) {
    match event {
        RigEvent::Spectrum { measurement } => info!(
            target_value = ?measurement.target_value,
            bins = measurement.values.len(),
            "spectrum"
        ),
        RigEvent::Error { role, code, message } => {
            error!(%role, code = %code, message = %message, "device error")
        }
        RigEvent::StartupPhase { phase, status, detail } => {
            info!(?phase, ?status, detail = ?detail, "startup phase")
        }
        RigEvent::GpsSentence { .. } | RigEvent::CommandSent { .. } if !development => {}
        other => match serde_json::to_string(other) {
            Ok(json) => info!(event = other.name(), payload = %json, "event"),
            Err(e) => warn!(event = other.name(), error = %e, "event not serializable"),
        },
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_config_path_env_fallback_is_declared() {
        let command = Args::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .unwrap();
        assert_eq!(config.get_env(), Some(std::ffi::OsStr::new("XL2DAQ_CONFIG")));
    }

    #[test]
    fn test_subcommand_parsing() {
        let args = Args::try_parse_from(["xl2_daq", "--config", "rig.toml", "scan"]).unwrap();
        assert_eq!(args.config, PathBuf::from("rig.toml"));
        assert!(matches!(args.command, Some(Command::Scan)));

        let args = Args::try_parse_from(["xl2_daq"]).unwrap();
        assert!(matches!(args.command.unwrap_or_default(), Command::Run));
    }
}
