//! Built-in bulk-transfer applications.
//!
//! A client opens a connection with an `Initial` packet and the server that
//! accepts it answers with a `Handshake`. From then on the client streams
//! fixed-size `Data` packets to the server until it is stopped, and the
//! server acknowledges each one. The client keeps at most `window_packets`
//! unacknowledged packets and, when pacing is enabled, spaces consecutive
//! packets by their serialization time at the pacing rate. Nothing is
//! retransmitted.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use tracing::debug;

use quic_pacing_abstract::packet::{IPV4_HEADER_LEN, QUIC_HEADER_LEN, UDP_HEADER_LEN};
use quic_pacing_abstract::{PacketKind, QuicHeader, SimTime, TransportConfig};

const INITIAL_RETRY: SimTime = SimTime::from_millis(100);
const MAX_INITIAL_RETRIES: u32 = 5;

/// Packets an application wants sent, and when it wants to be woken up.
#[derive(Default)]
pub(crate) struct ActionBuffer {
    pub outgoing: Vec<(SocketAddrV4, QuicHeader, Bytes)>,
    pub wake_at: Option<SimTime>,
}

impl ActionBuffer {
    fn send(&mut self, to: SocketAddrV4, kind: PacketKind, number: u64, payload: Bytes) {
        self.outgoing.push((to, QuicHeader { kind, number }, payload));
    }

    fn wake(&mut self, at: SimTime) {
        self.wake_at = Some(match self.wake_at {
            Some(current) => current.min(at),
            None => at,
        });
    }
}

pub(crate) enum Application {
    Server(ServerApp),
    Client(ClientApp),
}

impl Application {
    pub fn local_port(&self) -> u16 {
        match self {
            Application::Server(server) => server.port,
            Application::Client(client) => client.local.port(),
        }
    }

    pub fn on_start(&mut self, now: SimTime, actions: &mut ActionBuffer) {
        if let Application::Client(client) = self {
            client.connect(now, actions);
        }
    }

    pub fn on_packet(
        &mut self,
        now: SimTime,
        from: SocketAddrV4,
        header: QuicHeader,
        actions: &mut ActionBuffer,
    ) {
        match self {
            Application::Server(server) => server.on_packet(from, header, actions),
            Application::Client(client) => client.on_packet(now, from, header, actions),
        }
    }

    pub fn on_wake(&mut self, now: SimTime, actions: &mut ActionBuffer) {
        if let Application::Client(client) = self {
            client.on_wake(now, actions);
        }
    }
}

/// Listening side: accepts one client and acknowledges its data.
pub(crate) struct ServerApp {
    pub port: u16,
    /// The client this server accepted; a server serves exactly one client.
    pub peer: Option<SocketAddrV4>,
}

impl ServerApp {
    pub fn new(port: u16) -> Self {
        Self { port, peer: None }
    }

    fn on_packet(&mut self, from: SocketAddrV4, header: QuicHeader, actions: &mut ActionBuffer) {
        match header.kind {
            // a repeated Initial means our Handshake was lost
            PacketKind::Initial if self.peer.is_none_or(|peer| peer == from) => {
                if self.peer.is_none() {
                    debug!("server :{} accepted client {}", self.port, from);
                }
                self.peer = Some(from);
                actions.send(from, PacketKind::Handshake, 0, Bytes::new());
            }
            PacketKind::Data if self.peer == Some(from) => {
                actions.send(from, PacketKind::Ack, header.number, Bytes::new());
            }
            _ => {}
        }
    }
}

/// Sending side: connects to a server and streams data to it.
pub(crate) struct ClientApp {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    transport: TransportConfig,
    connected: bool,
    attempts: u32,
    next_number: u64,
    outstanding: BTreeMap<u64, SimTime>,
    next_send_at: SimTime,
    payload: Bytes,
    pub expired: u64,
}

impl ClientApp {
    pub fn new(local: SocketAddrV4, remote: SocketAddrV4, transport: TransportConfig) -> Self {
        let payload = Bytes::from(vec![0u8; transport.payload_bytes]);
        Self {
            local,
            remote,
            transport,
            connected: false,
            attempts: 0,
            next_number: 0,
            outstanding: BTreeMap::new(),
            next_send_at: SimTime::ZERO,
            payload,
            expired: 0,
        }
    }

    fn packet_size(&self) -> usize {
        IPV4_HEADER_LEN + UDP_HEADER_LEN + QUIC_HEADER_LEN + self.payload.len()
    }

    fn connect(&mut self, now: SimTime, actions: &mut ActionBuffer) {
        self.attempts += 1;
        actions.send(self.remote, PacketKind::Initial, 0, Bytes::new());
        actions.wake(now + INITIAL_RETRY);
    }

    fn on_packet(
        &mut self,
        now: SimTime,
        from: SocketAddrV4,
        header: QuicHeader,
        actions: &mut ActionBuffer,
    ) {
        if from != self.remote {
            return;
        }
        match header.kind {
            PacketKind::Handshake if !self.connected => {
                debug!("client {} connected to {}", self.local, self.remote);
                self.connected = true;
                self.try_send(now, actions);
            }
            PacketKind::Ack if self.connected => {
                self.outstanding.remove(&header.number);
                self.try_send(now, actions);
            }
            _ => {}
        }
    }

    fn on_wake(&mut self, now: SimTime, actions: &mut ActionBuffer) {
        if self.connected {
            self.try_send(now, actions);
        } else if self.attempts <= MAX_INITIAL_RETRIES {
            debug!("client {} retrying connection to {}", self.local, self.remote);
            self.connect(now, actions);
        }
    }

    fn try_send(&mut self, now: SimTime, actions: &mut ActionBuffer) {
        let timeout = self.transport.loss_timeout;
        let before = self.outstanding.len();
        self.outstanding
            .retain(|_, sent| now.saturating_sub(*sent) < timeout);
        self.expired += (before - self.outstanding.len()) as u64;

        let window = self.transport.window_packets as usize;
        while self.outstanding.len() < window && now >= self.next_send_at {
            let number = self.next_number;
            self.next_number += 1;
            actions.send(self.remote, PacketKind::Data, number, self.payload.clone());
            self.outstanding.insert(number, now);

            let pacing = &self.transport.pacing;
            if pacing.enabled {
                self.next_send_at = now + pacing.rate.tx_time(self.packet_size());
            }
        }

        if self.outstanding.len() >= window {
            if let Some(oldest) = self.outstanding.values().min() {
                actions.wake(*oldest + timeout);
            }
        } else if now < self.next_send_at {
            actions.wake(self.next_send_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_pacing_abstract::DataRate;
    use std::net::Ipv4Addr;

    fn addr(host: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, host), port)
    }

    fn header(kind: PacketKind, number: u64) -> QuicHeader {
        QuicHeader { kind, number }
    }

    fn connected_client(transport: TransportConfig) -> (ClientApp, ActionBuffer) {
        let mut client = ClientApp::new(addr(2, 49153), addr(1, 2048), transport);
        client.connect(SimTime::ZERO, &mut ActionBuffer::default());
        let mut actions = ActionBuffer::default();
        client.on_packet(
            SimTime::ZERO,
            addr(1, 2048),
            header(PacketKind::Handshake, 0),
            &mut actions,
        );
        (client, actions)
    }

    #[test]
    fn client_fills_its_window_once_connected() {
        let transport = TransportConfig {
            window_packets: 4,
            ..Default::default()
        };
        let (_, actions) = connected_client(transport);

        assert_eq!(actions.outgoing.len(), 4);
        assert!(actions
            .outgoing
            .iter()
            .all(|(to, h, _)| *to == addr(1, 2048) && h.kind == PacketKind::Data));
        // window full: wake when the oldest packet would expire
        assert_eq!(actions.wake_at, Some(SimTime::from_millis(200)));
    }

    #[test]
    fn paced_client_sends_one_packet_per_interval() {
        let mut transport = TransportConfig::default();
        transport.pacing.enabled = true;
        transport.pacing.rate = DataRate::from_mbps(1);
        let (client, actions) = connected_client(transport);

        assert_eq!(actions.outgoing.len(), 1);
        let gap = DataRate::from_mbps(1).tx_time(client.packet_size());
        assert_eq!(actions.wake_at, Some(gap));
    }

    #[test]
    fn unacknowledged_packets_expire_and_free_the_window() {
        let transport = TransportConfig {
            window_packets: 2,
            ..Default::default()
        };
        let (mut client, _) = connected_client(transport);

        let mut actions = ActionBuffer::default();
        client.on_wake(SimTime::from_millis(200), &mut actions);
        assert_eq!(client.expired, 2);
        assert_eq!(actions.outgoing.len(), 2);
        assert_eq!(actions.outgoing[0].1, header(PacketKind::Data, 2));
    }

    #[test]
    fn server_acknowledges_only_its_accepted_client() {
        let mut server = ServerApp::new(2048);
        let mut actions = ActionBuffer::default();
        server.on_packet(addr(2, 49153), header(PacketKind::Initial, 0), &mut actions);
        assert_eq!(actions.outgoing[0].1.kind, PacketKind::Handshake);

        let mut actions = ActionBuffer::default();
        server.on_packet(addr(2, 49154), header(PacketKind::Initial, 0), &mut actions);
        server.on_packet(addr(2, 49154), header(PacketKind::Data, 1), &mut actions);
        assert!(actions.outgoing.is_empty());
        assert_eq!(server.peer, Some(addr(2, 49153)));

        server.on_packet(addr(2, 49153), header(PacketKind::Data, 9), &mut actions);
        assert_eq!(actions.outgoing[0].1, header(PacketKind::Ack, 9));
    }

    #[test]
    fn client_stops_retrying_once_connected() {
        let (mut client, _) = connected_client(TransportConfig::default());
        let mut actions = ActionBuffer::default();
        client.on_wake(INITIAL_RETRY, &mut actions);
        assert!(actions
            .outgoing
            .iter()
            .all(|(_, h, _)| h.kind != PacketKind::Initial));
    }
}
