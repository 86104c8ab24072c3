use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use tracing::{debug, info};

use quic_pacing_abstract::{
    AppId, DeviceId, FiveTuple, FlowId, FlowStats, LinkConfig, NodeId, Packet, SimError,
    SimResult, SimTime, SimulationEngine, TransportConfig,
};

use crate::app::{ActionBuffer, Application, ClientApp, ServerApp};
use crate::monitor::FlowMonitor;
use crate::trace::{AsciiTrace, PcapFile, SimulationReport, TraceOp, pcap_path};

const FIRST_EPHEMERAL_PORT: u16 = 49153;

#[derive(Debug)]
enum EventType {
    AppStart(AppId),
    AppStop(AppId),
    AppWake(AppId),
    TxComplete(DeviceId),
    PacketArrival { device: DeviceId, packet: Packet },
}

#[derive(Debug)]
struct Event {
    time: SimTime,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct Node {
    devices: Vec<DeviceId>,
    transport: Option<TransportConfig>,
    next_ephemeral: u16,
}

struct Device {
    node: NodeId,
    /// Position in the owning node's device list.
    index: usize,
    peer: DeviceId,
    channel: usize,
    address: Option<Ipv4Addr>,
    queue: VecDeque<Packet>,
    busy: bool,
}

struct Channel {
    config: LinkConfig,
    rng: rand::rngs::StdRng,
}

struct AppSlot {
    node: NodeId,
    start: Option<SimTime>,
    stop: Option<SimTime>,
    running: bool,
    wake_at: Option<SimTime>,
    app: Application,
}

/// Reference discrete-event engine for point-to-point experiments.
pub struct Simulator {
    time: SimTime,
    stop_time: Option<SimTime>,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,
    events_processed: u64,
    started: bool,

    nodes: Vec<Node>,
    devices: Vec<Device>,
    channels: Vec<Channel>,
    apps: Vec<AppSlot>,
    next_packet_uid: u64,

    monitor: FlowMonitor,
    ascii: Option<AsciiTrace>,
    pcaps: Vec<PcapFile>,

    queue_drops: u64,
    channel_losses: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            time: SimTime::ZERO,
            stop_time: None,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            events_processed: 0,
            started: false,
            nodes: Vec::new(),
            devices: Vec::new(),
            channels: Vec::new(),
            apps: Vec::new(),
            next_packet_uid: 0,
            monitor: FlowMonitor::default(),
            ascii: None,
            pcaps: Vec::new(),
            queue_drops: 0,
            channel_losses: 0,
        }
    }

    pub fn current_time(&self) -> SimTime {
        self.time
    }

    pub fn peek_next_event_time(&self) -> Option<SimTime> {
        self.event_queue.peek().map(|e| e.time)
    }

    /// Start and stop times of an installed application.
    pub fn app_schedule(&self, app: AppId) -> SimResult<(Option<SimTime>, Option<SimTime>)> {
        let slot = self.apps.get(app.0).ok_or(SimError::UnknownApp(app))?;
        Ok((slot.start, slot.stop))
    }

    /// Port the application is bound to.
    pub fn app_port(&self, app: AppId) -> SimResult<u16> {
        let slot = self.apps.get(app.0).ok_or(SimError::UnknownApp(app))?;
        Ok(slot.app.local_port())
    }

    pub fn app_node(&self, app: AppId) -> SimResult<NodeId> {
        let slot = self.apps.get(app.0).ok_or(SimError::UnknownApp(app))?;
        Ok(slot.node)
    }

    pub fn export_report(&self) -> SimulationReport {
        let expired_packets = self
            .apps
            .iter()
            .map(|slot| match &slot.app {
                Application::Client(client) => client.expired,
                Application::Server(_) => 0,
            })
            .sum();
        SimulationReport {
            duration: self.time,
            events_processed: self.events_processed,
            queue_drops: self.queue_drops,
            channel_losses: self.channel_losses,
            expired_packets,
        }
    }

    fn push_event(&mut self, time: SimTime, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    fn node(&self, node: NodeId) -> SimResult<&Node> {
        self.nodes.get(node.0).ok_or(SimError::UnknownNode(node))
    }

    fn device(&self, device: DeviceId) -> SimResult<&Device> {
        self.devices.get(device.0).ok_or(SimError::UnknownDevice(device))
    }

    fn node_address(&self, node: NodeId) -> SimResult<Ipv4Addr> {
        self.node(node)?
            .devices
            .iter()
            .find_map(|d| self.devices[d.0].address)
            .ok_or_else(|| SimError::config(format!("node {node} has no IPv4 address")))
    }

    fn transport_of(&self, node: NodeId) -> SimResult<TransportConfig> {
        self.node(node)?
            .transport
            .clone()
            .ok_or_else(|| SimError::config(format!("no transport stack installed on node {node}")))
    }

    fn init(&mut self) {
        for index in 0..self.apps.len() {
            let app = AppId(index);
            let (start, stop) = (self.apps[index].start, self.apps[index].stop);
            if let Some(at) = start {
                self.push_event(at, EventType::AppStart(app));
            }
            if let Some(at) = stop {
                self.push_event(at, EventType::AppStop(app));
            }
        }
        self.started = true;
    }

    /// Process the next event. Returns false once the queue is empty or the
    /// next event lies beyond the stop time.
    pub fn step(&mut self) -> SimResult<bool> {
        if let (Some(stop), Some(next)) = (self.stop_time, self.peek_next_event_time())
            && next > stop
        {
            return Ok(false);
        }
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return Ok(false),
        };

        self.time = event.time;
        self.events_processed += 1;

        match event.event_type {
            EventType::AppStart(app) => {
                let slot = &mut self.apps[app.0];
                if slot.stop.is_some_and(|stop| stop <= self.time) {
                    return Ok(true);
                }
                debug!("app {} starting on node {}", app, slot.node);
                slot.running = true;
                let mut actions = ActionBuffer::default();
                slot.app.on_start(self.time, &mut actions);
                self.process_actions(app, actions)?;
            }
            EventType::AppStop(app) => {
                debug!("app {} stopping", app);
                let slot = &mut self.apps[app.0];
                slot.running = false;
                slot.wake_at = None;
            }
            EventType::AppWake(app) => {
                let slot = &mut self.apps[app.0];
                // only the latest requested wake-up is honoured
                if !slot.running || slot.wake_at != Some(self.time) {
                    return Ok(true);
                }
                slot.wake_at = None;
                let mut actions = ActionBuffer::default();
                slot.app.on_wake(self.time, &mut actions);
                self.process_actions(app, actions)?;
            }
            EventType::TxComplete(device) => {
                self.devices[device.0].busy = false;
                self.start_transmission(device)?;
            }
            EventType::PacketArrival { device, packet } => {
                self.receive(device, packet)?;
            }
        }
        Ok(true)
    }

    fn process_actions(&mut self, app: AppId, actions: ActionBuffer) -> SimResult<()> {
        let node = self.apps[app.0].node;
        let local = SocketAddrV4::new(self.node_address(node)?, self.apps[app.0].app.local_port());

        if let Some(at) = actions.wake_at {
            let slot = &mut self.apps[app.0];
            if slot.wake_at.is_none_or(|pending| at < pending || pending < self.time) {
                slot.wake_at = Some(at);
                self.push_event(at, EventType::AppWake(app));
            }
        }

        for (destination, header, payload) in actions.outgoing {
            let packet = Packet::new(self.next_packet_uid, local, destination, header, payload);
            self.next_packet_uid += 1;
            self.send_from(node, packet)?;
        }
        Ok(())
    }

    fn send_from(&mut self, node: NodeId, packet: Packet) -> SimResult<()> {
        self.monitor.record_tx(self.time, &packet);

        let target = *packet.destination.ip();
        let route = self.node(node)?.devices.iter().copied().find(|d| {
            let peer = self.devices[d.0].peer;
            self.devices[peer.0].address == Some(target)
        });
        let Some(device) = route else {
            debug!("node {} has no route to {}", node, target);
            self.monitor.record_drop(&packet);
            return Ok(());
        };
        self.enqueue(device, packet)
    }

    fn enqueue(&mut self, device: DeviceId, packet: Packet) -> SimResult<()> {
        let limit = self.channels[self.devices[device.0].channel].config.queue_packets;
        if self.devices[device.0].queue.len() >= limit {
            debug!("device {} queue full, dropping packet {}", device, packet.uid);
            self.trace(TraceOp::Drop, device, &packet)?;
            self.monitor.record_drop(&packet);
            self.queue_drops += 1;
            return Ok(());
        }
        self.trace(TraceOp::Enqueue, device, &packet)?;
        self.devices[device.0].queue.push_back(packet);
        if !self.devices[device.0].busy {
            self.start_transmission(device)?;
        }
        Ok(())
    }

    fn start_transmission(&mut self, device: DeviceId) -> SimResult<()> {
        let Some(packet) = self.devices[device.0].queue.pop_front() else {
            return Ok(());
        };
        self.devices[device.0].busy = true;
        self.trace(TraceOp::Dequeue, device, &packet)?;
        self.capture(device, &packet)?;

        let (peer, channel) = {
            let d = &self.devices[device.0];
            (d.peer, d.channel)
        };
        let channel = &mut self.channels[channel];
        let tx_time = channel.config.data_rate.tx_time(packet.size());
        let delay = channel.config.delay;
        let lost = channel.config.loss_rate > 0.0 && channel.rng.random::<f64>() < channel.config.loss_rate;

        self.push_event(self.time + tx_time, EventType::TxComplete(device));
        if lost {
            debug!("packet {} lost on channel", packet.uid);
            self.monitor.record_drop(&packet);
            self.channel_losses += 1;
        } else {
            self.push_event(
                self.time + tx_time + delay,
                EventType::PacketArrival {
                    device: peer,
                    packet,
                },
            );
        }
        Ok(())
    }

    fn receive(&mut self, device: DeviceId, packet: Packet) -> SimResult<()> {
        self.trace(TraceOp::Receive, device, &packet)?;
        self.capture(device, &packet)?;
        let node = self.devices[device.0].node;
        if self.devices[device.0].address != Some(*packet.destination.ip()) {
            debug!("node {} discarding packet for {}", node, packet.destination);
            return Ok(());
        }
        self.monitor.record_rx(self.time, &packet);

        let Some(app) = self.demux(node, &packet) else {
            debug!("no application on node {} for {}", node, packet.destination);
            return Ok(());
        };
        let mut actions = ActionBuffer::default();
        self.apps[app.0]
            .app
            .on_packet(self.time, packet.source, packet.header, &mut actions);
        self.process_actions(app, actions)
    }

    /// Find the running application a packet is addressed to. Servers sharing
    /// a port are matched by the client they accepted; a new client goes to
    /// the first server on the port that has not accepted one yet.
    fn demux(&self, node: NodeId, packet: &Packet) -> Option<AppId> {
        let port = packet.destination.port();
        let mut unclaimed = None;
        for (index, slot) in self.apps.iter().enumerate() {
            if slot.node != node || !slot.running || slot.app.local_port() != port {
                continue;
            }
            match &slot.app {
                Application::Client(_) => return Some(AppId(index)),
                Application::Server(server) => match server.peer {
                    Some(peer) if peer == packet.source => return Some(AppId(index)),
                    None if unclaimed.is_none() => unclaimed = Some(AppId(index)),
                    _ => {}
                },
            }
        }
        unclaimed
    }

    fn trace(&mut self, op: TraceOp, device: DeviceId, packet: &Packet) -> SimResult<()> {
        if let Some(ascii) = self.ascii.as_mut() {
            let d = &self.devices[device.0];
            ascii.record(op, self.time, d.node, d.index, packet)?;
        }
        Ok(())
    }

    fn capture(&mut self, device: DeviceId, packet: &Packet) -> SimResult<()> {
        if let Some(pcap) = self.pcaps.iter_mut().find(|p| p.device == device) {
            pcap.record(self.time, packet)?;
        }
        Ok(())
    }

    fn flush_traces(&mut self) -> SimResult<()> {
        if let Some(ascii) = self.ascii.as_mut() {
            ascii.flush()?;
        }
        for pcap in &mut self.pcaps {
            pcap.flush()?;
        }
        Ok(())
    }
}

impl SimulationEngine for Simulator {
    fn create_nodes(&mut self, count: usize) -> SimResult<Vec<NodeId>> {
        let first = self.nodes.len();
        for _ in 0..count {
            self.nodes.push(Node {
                devices: Vec::new(),
                transport: None,
                next_ephemeral: FIRST_EPHEMERAL_PORT,
            });
        }
        Ok((first..first + count).map(NodeId).collect())
    }

    fn install_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        link: &LinkConfig,
    ) -> SimResult<[DeviceId; 2]> {
        self.node(a)?;
        self.node(b)?;
        if a == b {
            return Err(SimError::config("a point-to-point link needs two distinct nodes"));
        }
        if link.data_rate.bps() == 0 {
            return Err(SimError::config("link data rate must be positive"));
        }
        if link.queue_packets == 0 {
            return Err(SimError::config("device queue must hold at least one packet"));
        }

        let channel = self.channels.len();
        self.channels.push(Channel {
            config: link.clone(),
            rng: rand::rngs::StdRng::seed_from_u64(link.seed),
        });

        let da = DeviceId(self.devices.len());
        let db = DeviceId(self.devices.len() + 1);
        for (node, peer) in [(a, db), (b, da)] {
            let index = self.nodes[node.0].devices.len();
            self.devices.push(Device {
                node,
                index,
                peer,
                channel,
                address: None,
                queue: VecDeque::new(),
                busy: false,
            });
        }
        self.nodes[a.0].devices.push(da);
        self.nodes[b.0].devices.push(db);
        info!(
            "point-to-point link {} <-> {} ({}, delay {})",
            a, b, link.data_rate, link.delay
        );
        Ok([da, db])
    }

    fn install_stack(&mut self, node: NodeId, transport: &TransportConfig) -> SimResult<()> {
        self.node(node)?;
        self.nodes[node.0].transport = Some(transport.clone());
        Ok(())
    }

    fn assign_ipv4(
        &mut self,
        devices: &[DeviceId],
        network: Ipv4Addr,
        prefix_len: u8,
    ) -> SimResult<Vec<Ipv4Addr>> {
        if !(1..=30).contains(&prefix_len) {
            return Err(SimError::config(format!("unsupported prefix length /{prefix_len}")));
        }
        let base = u32::from(network);
        let mask = u32::MAX << (32 - prefix_len);
        if base & !mask != 0 {
            return Err(SimError::config(format!("{network}/{prefix_len} is not a network address")));
        }
        let hosts = (1u64 << (32 - prefix_len)) - 2;
        if devices.len() as u64 > hosts {
            return Err(SimError::config(format!("{network}/{prefix_len} has too few host addresses")));
        }

        let mut assigned = Vec::with_capacity(devices.len());
        for (offset, device) in devices.iter().enumerate() {
            self.device(*device)?;
            let address = Ipv4Addr::from(base + offset as u32 + 1);
            if self.devices.iter().any(|d| d.address == Some(address)) {
                return Err(SimError::config(format!("address {address} already assigned")));
            }
            self.devices[device.0].address = Some(address);
            assigned.push(address);
        }
        Ok(assigned)
    }

    fn install_server(&mut self, node: NodeId, port: u16) -> SimResult<AppId> {
        self.transport_of(node)?;
        let app = AppId(self.apps.len());
        self.apps.push(AppSlot {
            node,
            start: None,
            stop: None,
            running: false,
            wake_at: None,
            app: Application::Server(ServerApp::new(port)),
        });
        Ok(app)
    }

    fn install_client(&mut self, node: NodeId, remote: SocketAddrV4) -> SimResult<AppId> {
        let transport = self.transport_of(node)?;
        let address = self.node_address(node)?;
        let entry = &mut self.nodes[node.0];
        let port = entry.next_ephemeral;
        entry.next_ephemeral = port
            .checked_add(1)
            .ok_or_else(|| SimError::config(format!("node {node} ran out of ephemeral ports")))?;

        let app = AppId(self.apps.len());
        self.apps.push(AppSlot {
            node,
            start: None,
            stop: None,
            running: false,
            wake_at: None,
            app: Application::Client(ClientApp::new(
                SocketAddrV4::new(address, port),
                remote,
                transport,
            )),
        });
        Ok(app)
    }

    fn set_app_start(&mut self, app: AppId, at: SimTime) -> SimResult<()> {
        let slot = self.apps.get_mut(app.0).ok_or(SimError::UnknownApp(app))?;
        slot.start = Some(at);
        Ok(())
    }

    fn set_app_stop(&mut self, app: AppId, at: SimTime) -> SimResult<()> {
        let slot = self.apps.get_mut(app.0).ok_or(SimError::UnknownApp(app))?;
        slot.stop = Some(at);
        Ok(())
    }

    fn enable_ascii_trace(&mut self, path: &Path) -> SimResult<()> {
        self.ascii = Some(AsciiTrace::create(path)?);
        Ok(())
    }

    fn enable_pcap(&mut self, prefix: &str) -> SimResult<()> {
        for (index, device) in self.devices.iter().enumerate() {
            let path = pcap_path(prefix, device.node, device.index);
            self.pcaps.push(PcapFile::create(path, DeviceId(index))?);
        }
        Ok(())
    }

    fn install_flow_monitor(&mut self) -> SimResult<()> {
        self.monitor.enable();
        Ok(())
    }

    fn stop_at(&mut self, at: SimTime) {
        self.stop_time = Some(at);
    }

    fn run(&mut self) -> SimResult<()> {
        if !self.started {
            self.init();
        }
        while self.step()? {}
        if let Some(stop) = self.stop_time
            && self.time < stop
        {
            self.time = stop;
        }
        self.flush_traces()?;
        info!(
            "simulation halted at {} after {} events",
            self.time, self.events_processed
        );
        Ok(())
    }

    fn now(&self) -> SimTime {
        self.time
    }

    fn check_for_lost_packets(&mut self) {
        self.monitor.check_for_lost_packets(self.time);
    }

    fn flow_stats(&self) -> &BTreeMap<FlowId, FlowStats> {
        self.monitor.stats()
    }

    fn find_flow(&self, id: FlowId) -> SimResult<FiveTuple> {
        self.monitor.classifier().find_flow(id)
    }
}
