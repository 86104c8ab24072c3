use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::config::{ExperimentConfig, ObservationWindow, PortPolicy};
use crate::units::{DataRate, SimTime};

/// Partial experiment configuration, typically read from a TOML file.
/// Only the fields that are present replace the defaults.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ExperimentOverride {
    pub flows: Option<u32>,
    pub server_port: Option<u16>,
    pub port_policy: Option<PortPolicy>,

    pub pacing: Option<bool>,
    pub pacing_rate: Option<DataRate>,
    pub window_packets: Option<u32>,
    pub payload_bytes: Option<usize>,

    pub data_rate: Option<DataRate>,
    pub delay: Option<SimTime>,
    pub queue_packets: Option<usize>,
    pub loss_rate: Option<f64>,
    pub seed: Option<u64>,

    pub server_start: Option<SimTime>,
    pub server_stop: Option<SimTime>,
    pub client_start: Option<SimTime>,
    pub client_stop: Option<SimTime>,
    pub horizon: Option<SimTime>,

    pub ascii_trace: Option<PathBuf>,
    pub pcap_prefix: Option<String>,
    /// `false` switches off both trace outputs.
    pub trace: Option<bool>,

    pub observation_window: Option<ObservationWindow>,
    pub exclude_source: Option<Ipv4Addr>,
}

impl ExperimentOverride {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        if let Some(v) = self.flows {
            config.flows.count = v;
        }
        if let Some(v) = self.server_port {
            config.flows.server_port = v;
        }
        if let Some(v) = self.port_policy {
            config.flows.port_policy = v;
        }
        if let Some(v) = self.pacing {
            config.transport.pacing.enabled = v;
        }
        if let Some(v) = self.pacing_rate {
            config.transport.pacing.rate = v;
        }
        if let Some(v) = self.window_packets {
            config.transport.window_packets = v;
        }
        if let Some(v) = self.payload_bytes {
            config.transport.payload_bytes = v;
        }
        if let Some(v) = self.data_rate {
            config.link.data_rate = v;
        }
        if let Some(v) = self.delay {
            config.link.delay = v;
        }
        if let Some(v) = self.queue_packets {
            config.link.queue_packets = v;
        }
        if let Some(v) = self.loss_rate {
            config.link.loss_rate = v;
        }
        if let Some(v) = self.seed {
            config.link.seed = v;
        }
        if let Some(v) = self.server_start {
            config.schedule.server_start = v;
        }
        if let Some(v) = self.server_stop {
            config.schedule.server_stop = v;
        }
        if let Some(v) = self.client_start {
            config.schedule.client_start = v;
        }
        if let Some(v) = self.client_stop {
            config.schedule.client_stop = v;
        }
        if let Some(v) = self.horizon {
            config.schedule.horizon = v;
        }
        if let Some(v) = &self.ascii_trace {
            config.trace.ascii_path = Some(v.clone());
        }
        if let Some(v) = &self.pcap_prefix {
            config.trace.pcap_prefix = Some(v.clone());
        }
        if self.trace == Some(false) {
            config.trace.ascii_path = None;
            config.trace.pcap_prefix = None;
        }
        if let Some(v) = self.observation_window {
            config.report.window = v;
        }
        if let Some(v) = self.exclude_source {
            config.report.exclude_source = v;
        }
    }
}
