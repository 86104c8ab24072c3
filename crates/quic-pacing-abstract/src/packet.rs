use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddrV4;

use crate::flow::{FiveTuple, PROTO_UDP};

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
/// One type byte followed by a 64-bit packet number.
pub const QUIC_HEADER_LEN: usize = 9;

const IPV4_DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Sent by a client to open a connection.
    Initial,
    /// Server reply that completes the connection.
    Handshake,
    /// Stream data from client to server.
    Data,
    /// Acknowledges the data packet whose number is carried in the header.
    Ack,
}

impl PacketKind {
    fn type_byte(self) -> u8 {
        match self {
            PacketKind::Initial => 0xc0,
            PacketKind::Handshake => 0xe0,
            PacketKind::Data => 0x40,
            PacketKind::Ack => 0x41,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuicHeader {
    pub kind: PacketKind,
    pub number: u64,
}

#[derive(Debug, Clone)]
pub struct Packet {
    /// Unique per simulation, used by the flow monitor to match tx and rx.
    pub uid: u64,
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    pub header: QuicHeader,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(
        uid: u64,
        source: SocketAddrV4,
        destination: SocketAddrV4,
        header: QuicHeader,
        payload: Bytes,
    ) -> Self {
        Self {
            uid,
            source,
            destination,
            header,
            payload,
        }
    }

    /// Size on the wire, IP header included.
    pub fn size(&self) -> usize {
        IPV4_HEADER_LEN + UDP_HEADER_LEN + QUIC_HEADER_LEN + self.payload.len()
    }

    pub fn five_tuple(&self) -> FiveTuple {
        FiveTuple {
            source_address: *self.source.ip(),
            destination_address: *self.destination.ip(),
            protocol: PROTO_UDP,
            source_port: self.source.port(),
            destination_port: self.destination.port(),
        }
    }

    /// Encode as a raw IPv4 datagram.
    pub fn encode(&self) -> Bytes {
        let total = self.size();
        let mut buf = BytesMut::with_capacity(total);

        let mut ip = [0u8; IPV4_HEADER_LEN];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        ip[4..6].copy_from_slice(&(self.uid as u16).to_be_bytes());
        ip[8] = IPV4_DEFAULT_TTL;
        ip[9] = PROTO_UDP;
        ip[12..16].copy_from_slice(&self.source.ip().octets());
        ip[16..20].copy_from_slice(&self.destination.ip().octets());
        let checksum = internet_checksum(&ip);
        ip[10..12].copy_from_slice(&checksum.to_be_bytes());
        buf.put_slice(&ip);

        buf.put_u16(self.source.port());
        buf.put_u16(self.destination.port());
        buf.put_u16((total - IPV4_HEADER_LEN) as u16);
        // UDP checksum is optional over IPv4
        buf.put_u16(0);

        buf.put_u8(self.header.kind.type_byte());
        buf.put_u64(self.header.number);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([chunk[0], chunk[1]]) as u32);
    }
    if let Some(&byte) = chunks.remainder().first() {
        sum = sum.wrapping_add((byte as u32) << 8);
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
