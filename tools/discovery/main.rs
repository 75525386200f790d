// Hardware discovery check: lists every serial port, then classifies them the same way
// the daemon does and prints what was found where.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use xl2_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use xl2_daq::discovery::DeviceRole;
use xl2_daq::hardware::{PortEnumerator, SystemPortEnumerator};
use xl2_daq::Rig;

#[derive(Parser, Debug)]
#[command(name = "discovery")]
#[command(about = "Probe serial ports for the XL2 analyzer and GPS receiver")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Also list ports that were filtered out or not identified
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load_from(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    xl2_daq::logging::init(&settings.application)?;

    let ports = SystemPortEnumerator
        .list_ports()
        .await
        .context("Failed to enumerate serial ports")?;
    println!("🔍 {} serial port(s) on this host", ports.len());
    if args.verbose {
        for port in &ports {
            println!("  {port}");
        }
    }

    let rig = Rig::new(settings);
    let report = rig.classifier.classify(&ports).await;

    for role in DeviceRole::CONNECTABLE {
        let candidates = report.candidates(role);
        if candidates.is_empty() {
            println!("\n❌ {role}: not found");
            continue;
        }
        println!("\n✅ {role}:");
        for candidate in candidates {
            let baud = candidate
                .baud_rate
                .map(|b| format!(" @ {b} baud"))
                .unwrap_or_default();
            println!(
                "  {:<24} confidence {:>3} via {:?}{baud}",
                candidate.path(),
                candidate.confidence,
                candidate.method
            );
            if let Some(response) = &candidate.response {
                println!("    response: {response:?}");
            }
        }
    }

    if args.verbose && !report.unknown.is_empty() {
        println!("\n❔ unidentified:");
        for candidate in &report.unknown {
            println!(
                "  {:<24} {}",
                candidate.path(),
                candidate.error.as_deref().unwrap_or("no match")
            );
        }
    }

    let summary = &report.summary;
    println!("\n===================");
    println!(
        "{} candidate port(s): {} probed, {} hardware match, {} cached in {} ms",
        summary.candidate_ports, summary.probed, summary.fast_path, summary.cached, summary.duration_ms
    );
    Ok(())
}
