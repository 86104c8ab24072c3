use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;

use crate::config::{LinkConfig, TransportConfig};
use crate::error::SimResult;
use crate::flow::{FiveTuple, FlowId, FlowStats};
use crate::units::SimTime;

macro_rules! handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle!(NodeId);
handle!(DeviceId);
handle!(AppId);

/// What the experiment harness needs from a discrete-event network engine.
///
/// Configuration calls are made before [`run`](SimulationEngine::run); the
/// flow-monitor accessors are only meaningful after it returns.
pub trait SimulationEngine {
    fn create_nodes(&mut self, count: usize) -> SimResult<Vec<NodeId>>;

    /// Join two nodes with a point-to-point link, one device on each side.
    fn install_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        link: &LinkConfig,
    ) -> SimResult<[DeviceId; 2]>;

    /// Install the internet and transport stack on a node. Every endpoint
    /// later created on the node uses `transport`.
    fn install_stack(&mut self, node: NodeId, transport: &TransportConfig) -> SimResult<()>;

    /// Hand out consecutive host addresses from `network/prefix_len`, one per
    /// device, starting at the first host address.
    fn assign_ipv4(
        &mut self,
        devices: &[DeviceId],
        network: Ipv4Addr,
        prefix_len: u8,
    ) -> SimResult<Vec<Ipv4Addr>>;

    /// Install a listening server application.
    fn install_server(&mut self, node: NodeId, port: u16) -> SimResult<AppId>;

    /// Install a client application that connects to `remote`.
    fn install_client(&mut self, node: NodeId, remote: SocketAddrV4) -> SimResult<AppId>;

    fn set_app_start(&mut self, app: AppId, at: SimTime) -> SimResult<()>;

    fn set_app_stop(&mut self, app: AppId, at: SimTime) -> SimResult<()>;

    /// Write a text trace of every device queue and receive event.
    fn enable_ascii_trace(&mut self, path: &Path) -> SimResult<()>;

    /// Write one capture file per device, named `<prefix>-<node>-<device>.pcap`.
    fn enable_pcap(&mut self, prefix: &str) -> SimResult<()>;

    /// Start classifying and counting packets on every node.
    fn install_flow_monitor(&mut self) -> SimResult<()>;

    /// Events scheduled after `at` are never executed.
    fn stop_at(&mut self, at: SimTime);

    /// Process events until the queue drains or the stop time is reached.
    fn run(&mut self) -> SimResult<()>;

    fn now(&self) -> SimTime;

    /// Account packets that have been in flight for too long as lost.
    fn check_for_lost_packets(&mut self);

    fn flow_stats(&self) -> &BTreeMap<FlowId, FlowStats>;

    fn find_flow(&self, id: FlowId) -> SimResult<FiveTuple>;
}

/// A set of application handles that is scheduled as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationContainer {
    apps: Vec<AppId>,
}

impl ApplicationContainer {
    pub fn add(&mut self, app: AppId) {
        self.apps.push(app);
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = AppId> + '_ {
        self.apps.iter().copied()
    }

    pub fn start<E: SimulationEngine + ?Sized>(&self, engine: &mut E, at: SimTime) -> SimResult<()> {
        for app in &self.apps {
            engine.set_app_start(*app, at)?;
        }
        Ok(())
    }

    pub fn stop<E: SimulationEngine + ?Sized>(&self, engine: &mut E, at: SimTime) -> SimResult<()> {
        for app in &self.apps {
            engine.set_app_stop(*app, at)?;
        }
        Ok(())
    }
}
