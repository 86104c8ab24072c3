use anyhow::{Context, Result};
use std::net::Ipv4Addr;
use tracing::info;

use quic_pacing_abstract::{DeviceId, ExperimentConfig, NodeId, SimulationEngine};

/// Two endpoints joined by a single point-to-point link.
///
/// Endpoint A (index 0) hosts the servers, endpoint B (index 1) the clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub nodes: [NodeId; 2],
    pub devices: [DeviceId; 2],
    pub addresses: [Ipv4Addr; 2],
}

impl Topology {
    pub fn server_node(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn client_node(&self) -> NodeId {
        self.nodes[1]
    }

    pub fn server_address(&self) -> Ipv4Addr {
        self.addresses[0]
    }

    pub fn client_address(&self) -> Ipv4Addr {
        self.addresses[1]
    }
}

pub fn build_topology<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    config: &ExperimentConfig,
) -> Result<Topology> {
    info!("Create nodes.");
    let nodes = engine.create_nodes(2).context("failed to create nodes")?;
    let nodes: [NodeId; 2] = nodes
        .try_into()
        .map_err(|got: Vec<NodeId>| anyhow::anyhow!("engine created {} nodes, expected 2", got.len()))?;

    info!("Create channels.");
    let devices = engine
        .install_point_to_point(nodes[0], nodes[1], &config.link)
        .context("failed to install point-to-point link")?;

    for node in nodes {
        engine
            .install_stack(node, &config.transport)
            .with_context(|| format!("failed to install transport stack on node {node}"))?;
    }

    info!("Assign IP Addresses.");
    let addresses = engine
        .assign_ipv4(&devices, config.topology.network, config.topology.prefix_len)
        .context("failed to assign IPv4 addresses")?;
    let addresses: [Ipv4Addr; 2] = addresses
        .try_into()
        .map_err(|got: Vec<Ipv4Addr>| anyhow::anyhow!("engine assigned {} addresses, expected 2", got.len()))?;

    Ok(Topology {
        nodes,
        devices,
        addresses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingEngine;
    use quic_pacing_abstract::DataRate;

    #[test]
    fn builds_two_endpoints_on_one_link() {
        let mut engine = RecordingEngine::default();
        let topology = build_topology(&mut engine, &ExperimentConfig::default()).unwrap();

        assert_eq!(topology.server_address(), Ipv4Addr::new(10, 1, 1, 1));
        assert_eq!(topology.client_address(), Ipv4Addr::new(10, 1, 1, 2));
        assert_eq!(engine.links.len(), 1);
        assert_eq!(engine.links[0].data_rate, DataRate::from_mbps(10));
        assert_eq!(engine.links[0].delay, "0.01ms".parse().unwrap());
        assert_eq!(engine.stacks.len(), 2);
    }

    #[test]
    fn stack_receives_the_pacing_settings() {
        let mut config = ExperimentConfig::default();
        config.transport.pacing.enabled = true;
        let mut engine = RecordingEngine::default();
        build_topology(&mut engine, &config).unwrap();
        assert!(engine.stacks.iter().all(|(_, t)| t.pacing.enabled));
    }
}
