use anyhow::{Context, Result};
use tracing::info;

use quic_pacing_abstract::{ScheduleConfig, SimulationEngine};

use crate::flows::FlowSet;

/// Apply one start/stop pair to every server and another to every client.
pub fn apply_schedule<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    flows: &FlowSet,
    schedule: &ScheduleConfig,
) -> Result<()> {
    schedule.validate().context("invalid application schedule")?;

    flows.sources.start(engine, schedule.server_start)?;
    flows.sources.stop(engine, schedule.server_stop)?;
    flows.destinations.start(engine, schedule.client_start)?;
    flows.destinations.stop(engine, schedule.client_stop)?;

    info!(
        "servers active {} -> {}, clients active {} -> {}",
        schedule.server_start, schedule.server_stop, schedule.client_start, schedule.client_stop
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::generate_flows;
    use crate::mock::RecordingEngine;
    use crate::topology::build_topology;
    use quic_pacing_abstract::{ExperimentConfig, SimTime};

    #[test]
    fn receivers_listen_a_second_before_senders_start() {
        let mut config = ExperimentConfig::default();
        config.flows.count = 3;
        let mut engine = RecordingEngine::default();
        let topology = build_topology(&mut engine, &config).unwrap();
        let flows = generate_flows(&mut engine, &topology, &config.flows).unwrap();
        apply_schedule(&mut engine, &flows, &config.schedule).unwrap();

        let latest_server_start = flows
            .sources
            .iter()
            .map(|app| engine.starts[&app])
            .max()
            .unwrap();
        let earliest_client_start = flows
            .destinations
            .iter()
            .map(|app| engine.starts[&app])
            .min()
            .unwrap();
        assert_eq!(latest_server_start, SimTime::from_secs(1));
        assert_eq!(earliest_client_start, SimTime::from_secs(2));
        assert!(earliest_client_start - latest_server_start >= SimTime::from_secs(1));

        let stops: Vec<_> = flows
            .sources
            .iter()
            .chain(flows.destinations.iter())
            .map(|app| engine.stops[&app])
            .collect();
        assert_eq!(stops, vec![SimTime::from_secs(10); 6]);
    }

    #[test]
    fn inverted_schedule_is_a_configuration_error() {
        let mut engine = RecordingEngine::default();
        let schedule = ScheduleConfig {
            client_start: SimTime::from_millis(500),
            ..Default::default()
        };
        assert!(apply_schedule(&mut engine, &FlowSet::default(), &schedule).is_err());
    }
}
