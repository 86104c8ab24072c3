use bytes::{BufMut, BytesMut};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use quic_pacing_abstract::{DeviceId, NodeId, Packet, SimError, SimResult, SimTime};

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_SNAPLEN: u32 = 65_535;
/// Raw IPv4/IPv6 frames, no link-layer header.
const LINKTYPE_RAW: u32 = 101;

/// Device-level events written to the ASCII trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Enqueue,
    Dequeue,
    Receive,
    Drop,
}

impl TraceOp {
    fn symbol(self) -> char {
        match self {
            TraceOp::Enqueue => '+',
            TraceOp::Dequeue => '-',
            TraceOp::Receive => 'r',
            TraceOp::Drop => 'd',
        }
    }

    fn path(self) -> &'static str {
        match self {
            TraceOp::Enqueue => "TxQueue/Enqueue",
            TraceOp::Dequeue => "TxQueue/Dequeue",
            TraceOp::Receive => "MacRx",
            TraceOp::Drop => "TxQueue/Drop",
        }
    }
}

pub struct AsciiTrace {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl AsciiTrace {
    pub fn create(path: &Path) -> SimResult<Self> {
        let file = File::create(path).map_err(|e| SimError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn record(
        &mut self,
        op: TraceOp,
        now: SimTime,
        node: NodeId,
        device_index: usize,
        packet: &Packet,
    ) -> SimResult<()> {
        writeln!(
            self.writer,
            "{} {} /NodeList/{}/DeviceList/{}/{} {} > {} {:?} #{} length {}",
            op.symbol(),
            now.as_secs_f64(),
            node,
            device_index,
            op.path(),
            packet.source,
            packet.destination,
            packet.header.kind,
            packet.header.number,
            packet.size()
        )
        .map_err(|e| SimError::io(&self.path, e))
    }

    pub fn flush(&mut self) -> SimResult<()> {
        self.writer.flush().map_err(|e| SimError::io(&self.path, e))
    }
}

/// One libpcap capture file for a single device.
pub struct PcapFile {
    pub device: DeviceId,
    path: PathBuf,
    writer: BufWriter<File>,
}

impl PcapFile {
    pub fn create(path: PathBuf, device: DeviceId) -> SimResult<Self> {
        let file = File::create(&path).map_err(|e| SimError::io(&path, e))?;
        let mut pcap = Self {
            device,
            path,
            writer: BufWriter::new(file),
        };

        let mut header = BytesMut::with_capacity(24);
        header.put_u32_le(PCAP_MAGIC);
        header.put_u16_le(2);
        header.put_u16_le(4);
        header.put_i32_le(0);
        header.put_u32_le(0);
        header.put_u32_le(PCAP_SNAPLEN);
        header.put_u32_le(LINKTYPE_RAW);
        pcap.write_all(&header)?;
        Ok(pcap)
    }

    pub fn record(&mut self, now: SimTime, packet: &Packet) -> SimResult<()> {
        let wire = packet.encode();
        let nanos = now.as_nanos();
        let captured = wire.len().min(PCAP_SNAPLEN as usize);

        let mut record = BytesMut::with_capacity(16 + captured);
        record.put_u32_le((nanos / 1_000_000_000) as u32);
        record.put_u32_le(((nanos % 1_000_000_000) / 1_000) as u32);
        record.put_u32_le(captured as u32);
        record.put_u32_le(wire.len() as u32);
        record.put_slice(&wire[..captured]);
        self.write_all(&record)
    }

    pub fn flush(&mut self) -> SimResult<()> {
        self.writer.flush().map_err(|e| SimError::io(&self.path, e))
    }

    fn write_all(&mut self, data: &[u8]) -> SimResult<()> {
        self.writer
            .write_all(data)
            .map_err(|e| SimError::io(&self.path, e))
    }
}

pub fn pcap_path(prefix: &str, node: NodeId, device_index: usize) -> PathBuf {
    PathBuf::from(format!("{prefix}-{node}-{device_index}.pcap"))
}

/// Summary of a finished run, for logging and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub duration: SimTime,
    pub events_processed: u64,
    pub queue_drops: u64,
    pub channel_losses: u64,
    pub expired_packets: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use quic_pacing_abstract::{PacketKind, QuicHeader};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn sample() -> Packet {
        Packet::new(
            1,
            SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), 49153),
            SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 2048),
            QuicHeader {
                kind: PacketKind::Initial,
                number: 0,
            },
            Bytes::new(),
        )
    }

    #[test]
    fn pcap_file_has_global_header_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace-test.pcap");
        let mut pcap = PcapFile::create(path.clone(), DeviceId(0)).unwrap();
        pcap.record(SimTime::from_millis(1500), &sample()).unwrap();
        pcap.flush().unwrap();
        drop(pcap);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..4], &PCAP_MAGIC.to_le_bytes());
        assert_eq!(u32::from_le_bytes(data[20..24].try_into().unwrap()), LINKTYPE_RAW);
        let record = &data[24..];
        assert_eq!(u32::from_le_bytes(record[0..4].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(record[4..8].try_into().unwrap()), 500_000);
        assert_eq!(record.len(), 16 + sample().size());
    }

    #[test]
    fn ascii_trace_lines_name_node_and_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace-test.tr");
        let mut trace = AsciiTrace::create(&path).unwrap();
        trace
            .record(TraceOp::Enqueue, SimTime::from_secs(2), NodeId(1), 0, &sample())
            .unwrap();
        trace.flush().unwrap();
        drop(trace);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("+ 2 /NodeList/1/DeviceList/0/TxQueue/Enqueue 10.1.1.2:49153 > 10.1.1.1:2048 Initial"));
    }

    #[test]
    fn unwritable_path_is_an_io_error() {
        let err = AsciiTrace::create(Path::new("/nonexistent-dir/quic-pacing.tr"))
            .err()
            .unwrap();
        assert!(matches!(err, SimError::Io { .. }));
    }

    #[test]
    fn pcap_names_follow_node_and_device() {
        assert_eq!(pcap_path("quic-pacing", NodeId(1), 0), PathBuf::from("quic-pacing-1-0.pcap"));
    }
}
