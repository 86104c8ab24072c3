use anyhow::{Context, Result};
use tracing::info;

use quic_pacing_abstract::{SimulationEngine, TraceConfig};

/// Ask the engine for an ASCII trace and per-device pcap files.
pub fn enable_capture<E: SimulationEngine + ?Sized>(engine: &mut E, trace: &TraceConfig) -> Result<()> {
    if let Some(path) = &trace.ascii_path {
        engine
            .enable_ascii_trace(path)
            .with_context(|| format!("failed to enable ASCII trace {}", path.display()))?;
        info!("ASCII trace -> {}", path.display());
    }
    if let Some(prefix) = &trace.pcap_prefix {
        engine
            .enable_pcap(prefix)
            .with_context(|| format!("failed to enable pcap capture {prefix}-*.pcap"))?;
        info!("pcap capture -> {}-*.pcap", prefix);
    }
    Ok(())
}
