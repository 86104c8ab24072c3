use std::collections::{BTreeMap, HashMap};

use quic_pacing_abstract::{FiveTuple, FlowId, FlowStats, Packet, SimError, SimResult, SimTime};

/// Maps five-tuples to flow identifiers in order of first appearance.
#[derive(Debug, Default)]
pub struct FlowClassifier {
    ids: HashMap<FiveTuple, FlowId>,
    tuples: Vec<FiveTuple>,
}

impl FlowClassifier {
    pub fn classify(&mut self, tuple: FiveTuple) -> FlowId {
        if let Some(id) = self.ids.get(&tuple) {
            return *id;
        }
        self.tuples.push(tuple);
        let id = FlowId(self.tuples.len() as u32);
        self.ids.insert(tuple, id);
        id
    }

    pub fn find_flow(&self, id: FlowId) -> SimResult<FiveTuple> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.tuples.get(index))
            .copied()
            .ok_or(SimError::UnknownFlow(id))
    }
}

/// Per-flow packet and byte counters, fed by the engine at IP send and
/// receive time.
#[derive(Debug)]
pub struct FlowMonitor {
    enabled: bool,
    classifier: FlowClassifier,
    stats: BTreeMap<FlowId, FlowStats>,
    in_flight: HashMap<u64, (FlowId, SimTime)>,
    max_delay: SimTime,
}

impl Default for FlowMonitor {
    fn default() -> Self {
        Self {
            enabled: false,
            classifier: FlowClassifier::default(),
            stats: BTreeMap::new(),
            in_flight: HashMap::new(),
            max_delay: SimTime::from_secs(10),
        }
    }
}

impl FlowMonitor {
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn record_tx(&mut self, now: SimTime, packet: &Packet) {
        if !self.enabled {
            return;
        }
        let id = self.classifier.classify(packet.five_tuple());
        let stats = self.stats.entry(id).or_default();
        stats.tx_packets += 1;
        stats.tx_bytes += packet.size() as u64;
        stats.time_first_tx.get_or_insert(now);
        self.in_flight.insert(packet.uid, (id, now));
    }

    pub fn record_rx(&mut self, now: SimTime, packet: &Packet) {
        if !self.enabled {
            return;
        }
        let Some((id, sent)) = self.in_flight.remove(&packet.uid) else {
            return;
        };
        let stats = self.stats.entry(id).or_default();
        stats.rx_packets += 1;
        stats.rx_bytes += packet.size() as u64;
        stats.delay_sum = stats.delay_sum + now.saturating_sub(sent);
        stats.time_last_rx = Some(now);
    }

    pub fn record_drop(&mut self, packet: &Packet) {
        if let Some((id, _)) = self.in_flight.remove(&packet.uid) {
            self.stats.entry(id).or_default().lost_packets += 1;
        }
    }

    pub fn check_for_lost_packets(&mut self, now: SimTime) {
        let max_delay = self.max_delay;
        let stats = &mut self.stats;
        self.in_flight.retain(|_, (id, sent)| {
            let lost = now.saturating_sub(*sent) > max_delay;
            if lost {
                stats.entry(*id).or_default().lost_packets += 1;
            }
            !lost
        });
    }

    pub fn stats(&self) -> &BTreeMap<FlowId, FlowStats> {
        &self.stats
    }

    pub fn classifier(&self) -> &FlowClassifier {
        &self.classifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use quic_pacing_abstract::{PacketKind, QuicHeader};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn packet(uid: u64, from: u8, to: u8) -> Packet {
        Packet::new(
            uid,
            SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, from), 2048),
            SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, to), 49153),
            QuicHeader {
                kind: PacketKind::Data,
                number: uid,
            },
            Bytes::from_static(&[0; 100]),
        )
    }

    #[test]
    fn flow_ids_follow_first_appearance() {
        let mut monitor = FlowMonitor::default();
        monitor.enable();
        monitor.record_tx(SimTime::ZERO, &packet(1, 2, 1));
        monitor.record_tx(SimTime::ZERO, &packet(2, 1, 2));
        monitor.record_tx(SimTime::ZERO, &packet(3, 2, 1));

        let classifier = monitor.classifier();
        assert_eq!(classifier.find_flow(FlowId(1)).unwrap().source_address, Ipv4Addr::new(10, 1, 1, 2));
        assert_eq!(classifier.find_flow(FlowId(2)).unwrap().source_address, Ipv4Addr::new(10, 1, 1, 1));
        assert!(matches!(classifier.find_flow(FlowId(3)), Err(SimError::UnknownFlow(FlowId(3)))));
        assert!(classifier.find_flow(FlowId(0)).is_err());
        assert_eq!(monitor.stats()[&FlowId(1)].tx_packets, 2);
    }

    #[test]
    fn counts_received_bytes_and_delay() {
        let mut monitor = FlowMonitor::default();
        monitor.enable();
        let p = packet(1, 1, 2);
        monitor.record_tx(SimTime::from_secs(1), &p);
        monitor.record_rx(SimTime::from_millis(1002), &p);

        let stats = &monitor.stats()[&FlowId(1)];
        assert_eq!(stats.rx_packets, 1);
        assert_eq!(stats.rx_bytes, p.size() as u64);
        assert_eq!(stats.mean_delay(), Some(SimTime::from_millis(2)));
    }

    #[test]
    fn stale_packets_are_declared_lost() {
        let mut monitor = FlowMonitor::default();
        monitor.enable();
        monitor.record_tx(SimTime::ZERO, &packet(1, 1, 2));
        monitor.record_tx(SimTime::from_secs(5), &packet(2, 1, 2));
        monitor.check_for_lost_packets(SimTime::from_secs(11));
        assert_eq!(monitor.stats()[&FlowId(1)].lost_packets, 1);
    }

    #[test]
    fn disabled_monitor_records_nothing() {
        let mut monitor = FlowMonitor::default();
        monitor.record_tx(SimTime::ZERO, &packet(1, 1, 2));
        assert!(monitor.stats().is_empty());
    }
}
