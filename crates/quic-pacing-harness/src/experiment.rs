use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use tracing::info;

use quic_pacing_abstract::{ExperimentConfig, SimTime, SimulationEngine};

use crate::capture::enable_capture;
use crate::flows::{FlowSpec, generate_flows, log_server_addresses};
use crate::measurement::{FlowReport, collect_reports, install_monitor, write_reports};
use crate::schedule::apply_schedule;
use crate::topology::build_topology;

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentOutcome {
    pub config: ExperimentConfig,
    pub flows: Vec<FlowSpec>,
    pub reports: Vec<FlowReport>,
    pub finished_at: SimTime,
}

/// A single-shot pacing experiment: two endpoints, one link, N bulk flows.
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
}

impl Experiment {
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate().context("invalid experiment configuration")?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Configure `engine`, run it to the horizon and write the setup lines
    /// and per-flow report blocks to `out`.
    pub fn run<E, W>(&self, engine: &mut E, out: &mut W) -> Result<ExperimentOutcome>
    where
        E: SimulationEngine + ?Sized,
        W: Write,
    {
        let config = &self.config;
        let pacing = &config.transport.pacing;
        info!(
            "pacing {} (rate {}), {} flow(s)",
            if pacing.enabled { "enabled" } else { "disabled" },
            pacing.rate,
            config.flows.count
        );

        let topology = build_topology(engine, config)?;
        let flows = generate_flows(engine, &topology, &config.flows)?;
        log_server_addresses(out, &flows.specs).context("failed to write server addresses")?;
        apply_schedule(engine, &flows, &config.schedule)?;
        enable_capture(engine, &config.trace)?;
        install_monitor(engine)?;

        info!("Run Simulation.");
        engine.stop_at(config.schedule.horizon);
        engine.run().context("simulation run failed")?;

        let reports = collect_reports(engine, &config.report, &config.schedule)?;
        write_reports(out, &reports).context("failed to write flow report")?;
        info!("Done.");

        Ok(ExperimentOutcome {
            config: config.clone(),
            flows: flows.specs,
            reports,
            finished_at: engine.now(),
        })
    }
}
