use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

use crate::units::SimTime;

/// Opaque identifier handed out by the flow classifier, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FlowId(pub u32);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IP protocol number carried in the five-tuple.
pub const PROTO_UDP: u8 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FiveTuple {
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    pub protocol: u8,
    pub source_port: u16,
    pub destination_port: u16,
}

/// Per-flow counters collected by the flow monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    /// Sum of one-way delays of every received packet.
    pub delay_sum: SimTime,
    pub time_first_tx: Option<SimTime>,
    pub time_last_rx: Option<SimTime>,
}

impl FlowStats {
    pub fn mean_delay(&self) -> Option<SimTime> {
        if self.rx_packets == 0 {
            return None;
        }
        Some(SimTime::from_nanos(
            self.delay_sum.as_nanos() / self.rx_packets,
        ))
    }
}
