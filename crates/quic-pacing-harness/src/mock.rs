//! Engine double that records configuration calls and serves canned
//! flow counters.

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};

use quic_pacing_abstract::{
    AppId, DeviceId, FiveTuple, FlowId, FlowStats, LinkConfig, NodeId, SimError, SimResult,
    SimTime, SimulationEngine, TransportConfig,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Installed {
    Server { node: NodeId, port: u16 },
    Client { node: NodeId, remote: SocketAddrV4 },
}

#[derive(Default)]
pub struct RecordingEngine {
    nodes: usize,
    devices: usize,
    pub links: Vec<LinkConfig>,
    pub stacks: Vec<(NodeId, TransportConfig)>,
    pub installed: Vec<Installed>,
    pub starts: HashMap<AppId, SimTime>,
    pub stops: HashMap<AppId, SimTime>,
    pub ascii_trace: Option<PathBuf>,
    pub pcap_prefix: Option<String>,
    pub monitor_installed: bool,
    pub stop_time: Option<SimTime>,
    pub ran: bool,
    pub lost_packets_checked: bool,
    pub fail_ascii_trace: bool,
    now: SimTime,
    stats: BTreeMap<FlowId, FlowStats>,
    tuples: HashMap<FlowId, FiveTuple>,
}

impl RecordingEngine {
    pub fn add_flow(&mut self, tuple: FiveTuple, stats: FlowStats) -> FlowId {
        let id = self.add_unclassified_flow(stats);
        self.tuples.insert(id, tuple);
        id
    }

    pub fn add_unclassified_flow(&mut self, stats: FlowStats) -> FlowId {
        let id = FlowId(self.stats.len() as u32 + 1);
        self.stats.insert(id, stats);
        id
    }
}

impl SimulationEngine for RecordingEngine {
    fn create_nodes(&mut self, count: usize) -> SimResult<Vec<NodeId>> {
        let first = self.nodes;
        self.nodes += count;
        Ok((first..self.nodes).map(NodeId).collect())
    }

    fn install_point_to_point(
        &mut self,
        _a: NodeId,
        _b: NodeId,
        link: &LinkConfig,
    ) -> SimResult<[DeviceId; 2]> {
        self.links.push(link.clone());
        let first = self.devices;
        self.devices += 2;
        Ok([DeviceId(first), DeviceId(first + 1)])
    }

    fn install_stack(&mut self, node: NodeId, transport: &TransportConfig) -> SimResult<()> {
        self.stacks.push((node, transport.clone()));
        Ok(())
    }

    fn assign_ipv4(
        &mut self,
        devices: &[DeviceId],
        network: Ipv4Addr,
        _prefix_len: u8,
    ) -> SimResult<Vec<Ipv4Addr>> {
        let base = u32::from(network);
        Ok((1..=devices.len() as u32)
            .map(|offset| Ipv4Addr::from(base + offset))
            .collect())
    }

    fn install_server(&mut self, node: NodeId, port: u16) -> SimResult<AppId> {
        self.installed.push(Installed::Server { node, port });
        Ok(AppId(self.installed.len() - 1))
    }

    fn install_client(&mut self, node: NodeId, remote: SocketAddrV4) -> SimResult<AppId> {
        self.installed.push(Installed::Client { node, remote });
        Ok(AppId(self.installed.len() - 1))
    }

    fn set_app_start(&mut self, app: AppId, at: SimTime) -> SimResult<()> {
        self.starts.insert(app, at);
        Ok(())
    }

    fn set_app_stop(&mut self, app: AppId, at: SimTime) -> SimResult<()> {
        self.stops.insert(app, at);
        Ok(())
    }

    fn enable_ascii_trace(&mut self, path: &Path) -> SimResult<()> {
        if self.fail_ascii_trace {
            return Err(SimError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ));
        }
        self.ascii_trace = Some(path.to_path_buf());
        Ok(())
    }

    fn enable_pcap(&mut self, prefix: &str) -> SimResult<()> {
        self.pcap_prefix = Some(prefix.to_string());
        Ok(())
    }

    fn install_flow_monitor(&mut self) -> SimResult<()> {
        self.monitor_installed = true;
        Ok(())
    }

    fn stop_at(&mut self, at: SimTime) {
        self.stop_time = Some(at);
    }

    fn run(&mut self) -> SimResult<()> {
        self.ran = true;
        if let Some(stop) = self.stop_time {
            self.now = stop;
        }
        Ok(())
    }

    fn now(&self) -> SimTime {
        self.now
    }

    fn check_for_lost_packets(&mut self) {
        self.lost_packets_checked = true;
    }

    fn flow_stats(&self) -> &BTreeMap<FlowId, FlowStats> {
        &self.stats
    }

    fn find_flow(&self, id: FlowId) -> SimResult<FiveTuple> {
        self.tuples.get(&id).copied().ok_or(SimError::UnknownFlow(id))
    }
}
