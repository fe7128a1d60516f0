use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Transport protocol tag of a decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Icmp => write!(f, "icmp"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// TCP control flags carried by a segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFlagSet {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpFlagSet {
    /// Build from the raw flag bits of a TCP header
    pub fn from_bits(flags: u16) -> Self {
        Self {
            urg: flags & 0x20 != 0,
            ack: flags & 0x10 != 0,
            psh: flags & 0x8 != 0,
            rst: flags & 0x4 != 0,
            syn: flags & 0x2 != 0,
            fin: flags & 0x1 != 0,
        }
    }

    /// SYN without ACK, the first leg of a handshake (or a scan probe)
    pub fn is_syn_only(&self) -> bool {
        self.syn && !self.ack
    }
}

/// A single decoded capture frame.
///
/// Lives only while its window is being aggregated.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    /// Capture timestamp in seconds since the epoch
    pub timestamp: f64,

    /// Captured frame length in bytes
    pub length: usize,

    pub protocol: TransportProtocol,

    pub src_ip: Option<IpAddr>,

    pub dst_ip: Option<IpAddr>,

    pub src_port: Option<u16>,

    pub dst_port: Option<u16>,

    /// Present only for TCP segments
    pub flags: Option<TcpFlagSet>,

    /// IPv4 TTL or IPv6 hop limit
    pub ttl: Option<u8>,

    /// Transport payload length in bytes
    pub payload_len: usize,
}

impl PacketRecord {
    /// A record with only timing and size known
    pub fn new(timestamp: f64, length: usize) -> Self {
        Self {
            timestamp,
            length,
            protocol: TransportProtocol::Other,
            src_ip: None,
            dst_ip: None,
            src_port: None,
            dst_port: None,
            flags: None,
            ttl: None,
            payload_len: 0,
        }
    }
}
