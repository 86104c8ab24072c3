use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, info};

use quic_pacing_abstract::{ApplicationContainer, FlowConfig, NodeId, SimulationEngine};

use crate::topology::Topology;

/// One server/client pair created by [`generate_flows`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSpec {
    pub index: u32,
    #[serde(skip)]
    pub server_node: NodeId,
    pub server_address: Ipv4Addr,
    pub server_port: u16,
    #[serde(skip)]
    pub client_node: NodeId,
}

impl FlowSpec {
    pub fn server_endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.server_address, self.server_port)
    }
}

/// All flows of an experiment. Servers make up the source set and clients
/// the destination set; each set is scheduled as a whole.
#[derive(Debug, Clone, Default)]
pub struct FlowSet {
    pub specs: Vec<FlowSpec>,
    pub sources: ApplicationContainer,
    pub destinations: ApplicationContainer,
}

/// Install one server on endpoint A and one client on endpoint B per flow.
///
/// Under [`PortPolicy::Shared`](quic_pacing_abstract::PortPolicy::Shared)
/// every server listens on the same port of the same endpoint; the engine
/// pairs each server with the first client that reaches it.
pub fn generate_flows<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    topology: &Topology,
    config: &FlowConfig,
) -> Result<FlowSet> {
    if config.count == 0 {
        anyhow::bail!("flow count must be at least 1");
    }

    info!("Create Applications.");
    let mut flows = FlowSet::default();
    for index in 0..config.count {
        let port = config.port_policy.port_for(config.server_port, index)?;
        let spec = FlowSpec {
            index,
            server_node: topology.server_node(),
            server_address: topology.server_address(),
            server_port: port,
            client_node: topology.client_node(),
        };

        let server = engine
            .install_server(spec.server_node, port)
            .with_context(|| format!("failed to install server for flow {index}"))?;
        flows.sources.add(server);

        let client = engine
            .install_client(spec.client_node, spec.server_endpoint())
            .with_context(|| format!("failed to install client for flow {index}"))?;
        flows.destinations.add(client);

        debug!("flow {} wired to {}", index, spec.server_endpoint());
        flows.specs.push(spec);
    }
    Ok(flows)
}

/// Print the `server address: <addr>` line for every flow.
pub fn log_server_addresses<W: Write>(out: &mut W, flows: &[FlowSpec]) -> std::io::Result<()> {
    for spec in flows {
        writeln!(out, "server address: {}", spec.server_address)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Installed, RecordingEngine};
    use crate::topology::build_topology;
    use quic_pacing_abstract::{ExperimentConfig, PortPolicy};

    fn setup(count: u32, policy: PortPolicy) -> (RecordingEngine, FlowSet) {
        let mut config = ExperimentConfig::default();
        config.flows.count = count;
        config.flows.port_policy = policy;
        let mut engine = RecordingEngine::default();
        let topology = build_topology(&mut engine, &config).unwrap();
        let flows = generate_flows(&mut engine, &topology, &config.flows).unwrap();
        (engine, flows)
    }

    #[test]
    fn single_flow_targets_the_server_endpoint() {
        let (engine, flows) = setup(1, PortPolicy::Shared);
        assert_eq!(flows.specs.len(), 1);
        assert_eq!(flows.sources.len(), 1);
        assert_eq!(flows.destinations.len(), 1);
        assert_eq!(
            engine.installed,
            vec![
                Installed::Server { node: NodeId(0), port: 2048 },
                Installed::Client {
                    node: NodeId(1),
                    remote: SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 2048),
                },
            ]
        );
    }

    #[test]
    fn three_flows_share_port_2048_on_one_endpoint() {
        let (engine, flows) = setup(3, PortPolicy::Shared);
        assert_eq!(flows.sources.len(), 3);
        assert_eq!(flows.destinations.len(), 3);
        let servers: Vec<_> = engine
            .installed
            .iter()
            .filter_map(|i| match i {
                Installed::Server { node, port } => Some((*node, *port)),
                Installed::Client { .. } => None,
            })
            .collect();
        assert_eq!(servers, vec![(NodeId(0), 2048); 3]);
    }

    #[test]
    fn sequential_policy_spreads_ports() {
        let (_, flows) = setup(3, PortPolicy::Sequential);
        let ports: Vec<_> = flows.specs.iter().map(|s| s.server_port).collect();
        assert_eq!(ports, vec![2048, 2049, 2050]);
    }

    #[test]
    fn zero_flows_is_rejected() {
        let mut engine = RecordingEngine::default();
        let config = ExperimentConfig::default();
        let topology = build_topology(&mut engine, &config).unwrap();
        let flows = FlowConfig {
            count: 0,
            ..Default::default()
        };
        assert!(generate_flows(&mut engine, &topology, &flows).is_err());
    }

    #[test]
    fn prints_one_address_line_per_flow() {
        let (_, flows) = setup(2, PortPolicy::Shared);
        let mut out = Vec::new();
        log_server_addresses(&mut out, &flows.specs).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "server address: 10.1.1.1\nserver address: 10.1.1.1\n"
        );
    }
}
