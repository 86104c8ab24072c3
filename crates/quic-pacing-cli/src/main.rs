use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use quic_pacing_abstract::{DataRate, ExperimentConfig, ExperimentOverride};
use quic_pacing_harness::{Experiment, ExperimentOutcome};
use quic_pacing_simulator::{SimulationReport, Simulator};

#[derive(Parser, Debug)]
#[command(author, version, about = "Two-node QUIC pacing experiment")]
struct Args {
    /// Partial experiment configuration in TOML; absent keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of server/client pairs.
    #[arg(long)]
    flows: Option<u32>,

    /// Enable pacing on every transport endpoint.
    #[arg(long, default_value_t = false)]
    pacing: bool,

    /// Pacing rate, e.g. `1Mbps`.
    #[arg(long)]
    pacing_rate: Option<DataRate>,

    /// Write the per-flow report as JSON.
    #[arg(long)]
    report_json: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("quic-pacing starting…");

    let config = args.experiment_config()?;
    let experiment = Experiment::new(config)?;

    let mut sim = Simulator::new();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let outcome = experiment.run(&mut sim, &mut out)?;
    out.flush().context("Failed to flush standard output")?;
    log_summary(&sim.export_report());

    if let Some(path) = &args.report_json {
        write_report(path, &outcome)?;
    }

    Ok(())
}

impl Args {
    fn experiment_config(&self) -> Result<ExperimentConfig> {
        let mut config = ExperimentConfig::default();
        if let Some(path) = &self.config {
            load_override(path)?.apply_to(&mut config);
        }
        if let Some(flows) = self.flows {
            config.flows.count = flows;
        }
        if self.pacing {
            config.transport.pacing.enabled = true;
        }
        if let Some(rate) = self.pacing_rate {
            config.transport.pacing.rate = rate;
        }
        Ok(config)
    }
}

fn init_logging() {
    // stdout carries the report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
}

fn log_summary(report: &SimulationReport) {
    info!(
        "Simulated {} | events: {} | queue drops: {} | channel losses: {} | expired: {}",
        report.duration,
        report.events_processed,
        report.queue_drops,
        report.channel_losses,
        report.expired_packets
    );
}

fn load_override(path: &Path) -> Result<ExperimentOverride> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_override(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

fn parse_override(content: &str) -> Result<ExperimentOverride> {
    Ok(toml::from_str(content)?)
}

fn write_report(path: &Path, outcome: &ExperimentOutcome) -> Result<()> {
    let data = serde_json::to_vec_pretty(outcome).context("Failed to serialize flow report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}
