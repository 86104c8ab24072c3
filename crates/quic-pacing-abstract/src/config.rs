use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::error::{SimError, SimResult};
use crate::units::{DataRate, SimTime};

/// Point-to-point link attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub data_rate: DataRate,
    pub delay: SimTime,
    /// Drop-tail limit of each device's transmit queue, in packets.
    pub queue_packets: usize,
    pub loss_rate: f64,
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            data_rate: DataRate::from_mbps(10),
            delay: SimTime::from_micros(10),
            queue_packets: 100,
            loss_rate: 0.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    pub enabled: bool,
    pub rate: DataRate,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: DataRate::from_mbps(1),
        }
    }
}

/// Settings every transport endpoint created on a node picks up when the
/// stack is installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub pacing: PacingConfig,
    /// Maximum number of unacknowledged data packets per connection.
    pub window_packets: u32,
    pub payload_bytes: usize,
    /// Unacknowledged packets older than this stop counting against the window.
    pub loss_timeout: SimTime,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pacing: PacingConfig::default(),
            window_packets: 32,
            payload_bytes: 1200,
            loss_timeout: SimTime::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            network: Ipv4Addr::new(10, 1, 1, 0),
            prefix_len: 24,
        }
    }
}

/// How servers pick their listening port when more than one flow is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortPolicy {
    /// Every server binds the same port on the same endpoint.
    #[default]
    Shared,
    /// Flow `i` binds `server_port + i`.
    Sequential,
}

impl PortPolicy {
    pub fn port_for(self, base: u16, flow_index: u32) -> SimResult<u16> {
        match self {
            PortPolicy::Shared => Ok(base),
            PortPolicy::Sequential => u16::try_from(flow_index)
                .ok()
                .and_then(|i| base.checked_add(i))
                .ok_or_else(|| {
                    SimError::config(format!(
                        "flow {flow_index} overflows the port range starting at {base}"
                    ))
                }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub count: u32,
    pub server_port: u16,
    pub port_policy: PortPolicy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            count: 1,
            server_port: 2048,
            port_policy: PortPolicy::Shared,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub server_start: SimTime,
    pub server_stop: SimTime,
    pub client_start: SimTime,
    pub client_stop: SimTime,
    /// Simulated time at which the engine stops processing events.
    pub horizon: SimTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            server_start: SimTime::from_secs(1),
            server_stop: SimTime::from_secs(10),
            client_start: SimTime::from_secs(2),
            client_stop: SimTime::from_secs(10),
            horizon: SimTime::from_secs(10),
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.server_start >= self.server_stop {
            return Err(SimError::config("server start must precede server stop"));
        }
        if self.client_start >= self.client_stop {
            return Err(SimError::config("client start must precede client stop"));
        }
        if self.server_start > self.client_start {
            return Err(SimError::config(
                "servers must start no later than clients",
            ));
        }
        if self.server_stop > self.horizon || self.client_stop > self.horizon {
            return Err(SimError::config(
                "applications cannot stop after the simulation horizon",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    pub ascii_path: Option<PathBuf>,
    pub pcap_prefix: Option<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            ascii_path: Some(PathBuf::from("quic-pacing.tr")),
            pcap_prefix: Some("quic-pacing".to_string()),
        }
    }
}

/// Length of the interval that byte counts are divided by when converting
/// them into rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObservationWindow {
    /// A constant number of seconds, regardless of the schedule.
    Fixed { seconds: f64 },
    /// Server stop minus server start.
    ServerActive,
    /// Client stop minus client start.
    ClientActive,
}

impl Default for ObservationWindow {
    fn default() -> Self {
        ObservationWindow::Fixed { seconds: 9.0 }
    }
}

impl ObservationWindow {
    pub fn seconds(&self, schedule: &ScheduleConfig) -> SimResult<f64> {
        let seconds = match *self {
            ObservationWindow::Fixed { seconds } => seconds,
            ObservationWindow::ServerActive => schedule
                .server_stop
                .saturating_sub(schedule.server_start)
                .as_secs_f64(),
            ObservationWindow::ClientActive => schedule
                .client_stop
                .saturating_sub(schedule.client_start)
                .as_secs_f64(),
        };
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(SimError::config(format!(
                "observation window must be positive, got {seconds}s"
            )));
        }
        Ok(seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub window: ObservationWindow,
    /// Flows whose source is this address are left out of the report.
    pub exclude_source: Ipv4Addr,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            window: ObservationWindow::default(),
            exclude_source: Ipv4Addr::new(10, 1, 1, 2),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub link: LinkConfig,
    pub transport: TransportConfig,
    pub topology: TopologyConfig,
    pub flows: FlowConfig,
    pub schedule: ScheduleConfig,
    pub trace: TraceConfig,
    pub report: ReportConfig,
}

impl ExperimentConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.flows.count == 0 {
            return Err(SimError::config("flow count must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.link.loss_rate) {
            return Err(SimError::config("loss rate must lie in [0, 1]"));
        }
        if self.transport.window_packets == 0 {
            return Err(SimError::config("transport window must be at least 1 packet"));
        }
        if self.transport.pacing.enabled && self.transport.pacing.rate.bps() == 0 {
            return Err(SimError::config("pacing rate must be positive"));
        }
        self.schedule.validate()?;
        self.report.window.seconds(&self.schedule)?;
        Ok(())
    }
}
