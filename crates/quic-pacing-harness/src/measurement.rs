use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use tracing::{debug, info};

use quic_pacing_abstract::{
    FiveTuple, FlowId, FlowStats, ReportConfig, ScheduleConfig, SimTime, SimulationEngine,
};

/// One retained flow, reduced to the figures that get printed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowReport {
    pub flow_id: FlowId,
    pub tuple: FiveTuple,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub offered_mbps: f64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub throughput_mbps: f64,
    pub lost_packets: u64,
    pub mean_delay: Option<SimTime>,
    pub first_tx: Option<SimTime>,
    pub last_rx: Option<SimTime>,
}

impl FlowReport {
    pub fn new(flow_id: FlowId, tuple: FiveTuple, stats: &FlowStats, window_secs: f64) -> Self {
        Self {
            flow_id,
            tuple,
            tx_packets: stats.tx_packets,
            tx_bytes: stats.tx_bytes,
            offered_mbps: rate_mbps(stats.tx_bytes, window_secs),
            rx_packets: stats.rx_packets,
            rx_bytes: stats.rx_bytes,
            throughput_mbps: rate_mbps(stats.rx_bytes, window_secs),
            lost_packets: stats.lost_packets,
            mean_delay: stats.mean_delay(),
            first_tx: stats.time_first_tx,
            last_rx: stats.time_last_rx,
        }
    }
}

impl fmt::Display for FlowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Flow {} ({} -> {})",
            self.flow_id, self.tuple.source_address, self.tuple.destination_address
        )?;
        writeln!(f, "  Tx Packets: {}", self.tx_packets)?;
        writeln!(f, "  Tx Bytes:   {}", self.tx_bytes)?;
        writeln!(f, "  TxOffered:  {} Mbps", format_rate(self.offered_mbps))?;
        writeln!(f, "  Rx Packets: {}", self.rx_packets)?;
        writeln!(f, "  Rx Bytes:   {}", self.rx_bytes)?;
        writeln!(f, "  Throughput: {} Mbps", format_rate(self.throughput_mbps))
    }
}

/// Bytes seen over the observation window, as megabits per second.
pub fn rate_mbps(bytes: u64, window_secs: f64) -> f64 {
    bytes as f64 * 8.0 / window_secs / 1000.0 / 1000.0
}

/// Six significant digits with trailing zeros trimmed, always keeping one
/// fractional digit (`0.0`, `8.88889`, `10.0`). Very large or very small
/// values switch to exponent notation, decided after rounding.
pub fn format_rate(value: f64) -> String {
    if value == 0.0 {
        return "0.0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }

    let rounded = format!("{value:.5e}");
    let Some((mantissa, exp)) = rounded.split_once('e') else {
        return value.to_string();
    };
    let Ok(exponent) = exp.parse::<i32>() else {
        return value.to_string();
    };
    if !(-4..6).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!(
            "{}e{}{:02}",
            trim_fraction(mantissa.to_string()),
            sign,
            exponent.abs()
        );
    }

    let decimals = (5 - exponent).max(0) as usize;
    trim_fraction(format!("{value:.decimals$}"))
}

fn trim_fraction(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.push('0');
        }
    } else {
        s.push_str(".0");
    }
    s
}

/// Start counting packets on every node. Must run before the simulation.
pub fn install_monitor<E: SimulationEngine + ?Sized>(engine: &mut E) -> Result<()> {
    engine
        .install_flow_monitor()
        .context("failed to install flow monitor")
}

/// Reduce the engine's post-run counters into reports, in flow-id order.
///
/// Flows whose source is `config.exclude_source` are skipped. A flow id the
/// classifier cannot resolve aborts the whole report.
pub fn collect_reports<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    config: &ReportConfig,
    schedule: &ScheduleConfig,
) -> Result<Vec<FlowReport>> {
    let window_secs = config
        .window
        .seconds(schedule)
        .context("invalid observation window")?;

    engine.check_for_lost_packets();

    let mut reports = Vec::new();
    for (id, stats) in engine.flow_stats() {
        let tuple = engine
            .find_flow(*id)
            .with_context(|| format!("failed to classify flow {id}"))?;
        if tuple.source_address == config.exclude_source {
            debug!("skipping flow {} from {}", id, tuple.source_address);
            continue;
        }
        reports.push(FlowReport::new(*id, tuple, stats, window_secs));
    }
    info!(
        "{} of {} flows retained ({}s observation window)",
        reports.len(),
        engine.flow_stats().len(),
        window_secs
    );
    Ok(reports)
}

pub fn write_reports<W: Write>(out: &mut W, reports: &[FlowReport]) -> std::io::Result<()> {
    for report in reports {
        write!(out, "{report}")?;
    }
    Ok(())
}
