use log::{log_enabled, trace, Level};
use pnet::packet::{
    ethernet::{EtherType, EtherTypes, EthernetPacket},
    ip::{IpNextHeaderProtocol, IpNextHeaderProtocols},
    ipv4::Ipv4Packet,
    ipv6::Ipv6Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
    vlan::VlanPacket,
    Packet as PnetPacket,
};
use std::net::IpAddr;

use crate::capture::reader::{
    DLT_RAW_BSD, DLT_RAW_OPENBSD, LINKTYPE_ETHERNET, LINKTYPE_LINUX_SLL, LINKTYPE_RAW,
};
use crate::models::packet::{PacketRecord, TcpFlagSet, TransportProtocol};
use crate::utils::error::{AppError, AppResult};

const LINUX_SLL_HEADER_LEN: usize = 16;

/// Link layer framing of the frames handed to the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    RawIp,
    LinuxSll,
}

impl LinkLayer {
    /// Map a LINKTYPE_* number; unknown types are read as Ethernet
    pub fn from_link_type(link_type: i32) -> Self {
        match link_type {
            LINKTYPE_ETHERNET => Self::Ethernet,
            LINKTYPE_RAW | DLT_RAW_BSD | DLT_RAW_OPENBSD => Self::RawIp,
            LINKTYPE_LINUX_SLL => Self::LinuxSll,
            _ => Self::Ethernet,
        }
    }
}

/// Decodes raw frames into packet records
pub struct PacketParser {
    link: LinkLayer,
}

impl PacketParser {
    /// Create a new packet parser
    pub fn new(link: LinkLayer) -> Self {
        Self { link }
    }

    /// Parse one captured frame.
    ///
    /// Only an unreadable link-layer header is an error. Anything that fails deeper
    /// in the stack yields a record tagged `other` with the fields decoded so far.
    pub fn parse_packet(&self, data: &[u8], timestamp: f64) -> AppResult<PacketRecord> {
        let mut packet = PacketRecord::new(timestamp, data.len());

        match self.link {
            LinkLayer::Ethernet => {
                let eth_packet = EthernetPacket::new(data).ok_or_else(|| {
                    AppError::Decode(format!("frame of {} bytes is not Ethernet", data.len()))
                })?;
                let mut ethertype = eth_packet.get_ethertype();
                let mut payload = eth_packet.payload();

                // Single 802.1Q tag
                if ethertype == EtherTypes::Vlan {
                    match VlanPacket::new(payload) {
                        Some(vlan) => {
                            ethertype = vlan.get_ethertype();
                            payload = &payload[payload.len() - vlan.payload().len()..];
                        }
                        None => return Ok(packet),
                    }
                }

                if log_enabled!(Level::Trace) {
                    trace!("EtherType: {:?}, frame: {} bytes", ethertype, data.len());
                }
                self.parse_network(ethertype, payload, &mut packet);
            }
            LinkLayer::LinuxSll => {
                if data.len() < LINUX_SLL_HEADER_LEN {
                    return Err(AppError::Decode(format!(
                        "frame of {} bytes is shorter than a cooked header",
                        data.len()
                    )));
                }
                let ethertype = EtherType(u16::from_be_bytes([data[14], data[15]]));
                self.parse_network(ethertype, &data[LINUX_SLL_HEADER_LEN..], &mut packet);
            }
            LinkLayer::RawIp => {
                let version = data
                    .first()
                    .map(|b| b >> 4)
                    .ok_or_else(|| AppError::Decode("empty raw IP frame".into()))?;
                let ethertype = match version {
                    4 => EtherTypes::Ipv4,
                    6 => EtherTypes::Ipv6,
                    _ => return Ok(packet),
                };
                self.parse_network(ethertype, data, &mut packet);
            }
        }

        Ok(packet)
    }

    fn parse_network(&self, ethertype: EtherType, data: &[u8], packet: &mut PacketRecord) {
        match ethertype {
            EtherTypes::Ipv4 => self.parse_ipv4(data, packet),
            EtherTypes::Ipv6 => self.parse_ipv6(data, packet),
            _ => {}
        }
    }

    /// Parse IPv4 packet
    fn parse_ipv4(&self, data: &[u8], packet: &mut PacketRecord) {
        let ipv4_packet = match Ipv4Packet::new(data) {
            Some(packet) => packet,
            None => return,
        };

        packet.src_ip = Some(IpAddr::V4(ipv4_packet.get_source()));
        packet.dst_ip = Some(IpAddr::V4(ipv4_packet.get_destination()));
        packet.ttl = Some(ipv4_packet.get_ttl());

        if log_enabled!(Level::Trace) {
            trace!(
                "IPv4 - src: {}, dst: {}, proto: {:?}",
                ipv4_packet.get_source(),
                ipv4_packet.get_destination(),
                ipv4_packet.get_next_level_protocol()
            );
        }

        // Bounds of the transport payload, guarded against lying length fields
        let header_len = ipv4_packet.get_header_length() as usize * 4;
        let total_len = (ipv4_packet.get_total_length() as usize).min(data.len());
        if header_len < 20 || total_len < header_len {
            return;
        }

        self.parse_transport_protocol(
            ipv4_packet.get_next_level_protocol(),
            &data[header_len..total_len],
            packet,
        );
    }

    /// Parse IPv6 packet
    fn parse_ipv6(&self, data: &[u8], packet: &mut PacketRecord) {
        let ipv6_packet = match Ipv6Packet::new(data) {
            Some(packet) => packet,
            None => return,
        };

        packet.src_ip = Some(IpAddr::V6(ipv6_packet.get_source()));
        packet.dst_ip = Some(IpAddr::V6(ipv6_packet.get_destination()));
        packet.ttl = Some(ipv6_packet.get_hop_limit());

        self.parse_transport_protocol(ipv6_packet.get_next_header(), ipv6_packet.payload(), packet);
    }

    /// Parse transport layer protocols
    fn parse_transport_protocol(
        &self,
        proto: IpNextHeaderProtocol,
        data: &[u8],
        packet: &mut PacketRecord,
    ) {
        if log_enabled!(Level::Trace) {
            trace!("Transport protocol: {:?}, data length: {}", proto, data.len());
        }

        match proto {
            IpNextHeaderProtocols::Tcp => self.parse_tcp(data, packet),
            IpNextHeaderProtocols::Udp => self.parse_udp(data, packet),
            IpNextHeaderProtocols::Icmp | IpNextHeaderProtocols::Icmpv6 => {
                packet.protocol = TransportProtocol::Icmp;
            }
            _ => {}
        }
    }

    /// Parse TCP packet
    fn parse_tcp(&self, data: &[u8], packet: &mut PacketRecord) {
        let tcp_packet = match TcpPacket::new(data) {
            Some(packet) => packet,
            None => return,
        };

        packet.protocol = TransportProtocol::Tcp;
        packet.src_port = Some(tcp_packet.get_source());
        packet.dst_port = Some(tcp_packet.get_destination());
        packet.flags = Some(TcpFlagSet::from_bits(tcp_packet.get_flags() as u16));

        let header_len = (tcp_packet.get_data_offset() as usize * 4).clamp(20, data.len());
        packet.payload_len = data.len() - header_len;
    }

    /// Parse UDP packet
    fn parse_udp(&self, data: &[u8], packet: &mut PacketRecord) {
        let udp_packet = match UdpPacket::new(data) {
            Some(packet) => packet,
            None => return,
        };

        packet.protocol = TransportProtocol::Udp;
        packet.src_port = Some(udp_packet.get_source());
        packet.dst_port = Some(udp_packet.get_destination());
        packet.payload_len = udp_packet.payload().len();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    /// Ethernet + IPv4 frame carrying a TCP segment with `payload` bytes of data
    pub(crate) fn tcp_frame(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        flags: u8,
        ttl: u8,
        payload: usize,
    ) -> Vec<u8> {
        let mut segment = vec![0u8; 20 + payload];
        segment[0..2].copy_from_slice(&sport.to_be_bytes());
        segment[2..4].copy_from_slice(&dport.to_be_bytes());
        segment[12] = 5 << 4;
        segment[13] = flags;
        ipv4_frame(src, dst, 6, ttl, &segment)
    }

    /// Ethernet + IPv4 frame carrying a UDP datagram with `payload` bytes of data
    pub(crate) fn udp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: usize) -> Vec<u8> {
        let mut datagram = vec![0u8; 8 + payload];
        datagram[0..2].copy_from_slice(&sport.to_be_bytes());
        datagram[2..4].copy_from_slice(&dport.to_be_bytes());
        datagram[4..6].copy_from_slice(&((8 + payload) as u16).to_be_bytes());
        ipv4_frame(src, dst, 17, 64, &datagram)
    }

    /// Ethernet + IPv4 frame carrying an ICMP echo request
    pub(crate) fn icmp_frame(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut icmp = vec![0u8; 8];
        icmp[0] = 8;
        ipv4_frame(src, dst, 1, 64, &icmp)
    }

    pub(crate) fn ipv4_frame(src: [u8; 4], dst: [u8; 4], proto: u8, ttl: u8, transport: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x00;

        let total = (20 + transport.len()) as u16;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&total.to_be_bytes());
        ip[8] = ttl;
        ip[9] = proto;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);

        frame.extend(ip);
        frame.extend_from_slice(transport);
        frame
    }

    #[test]
    fn test_parse_tcp_syn() {
        let frame = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443, 0x02, 64, 10);
        let parser = PacketParser::new(LinkLayer::Ethernet);
        let record = parser.parse_packet(&frame, 12.5).unwrap();

        assert_eq!(record.protocol, TransportProtocol::Tcp);
        assert_eq!(record.src_ip, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(record.dst_port, Some(443));
        assert_eq!(record.ttl, Some(64));
        assert_eq!(record.payload_len, 10);
        assert_eq!(record.length, frame.len());
        assert!(record.flags.unwrap().is_syn_only());
    }

    #[test]
    fn test_parse_udp_and_icmp() {
        let parser = PacketParser::new(LinkLayer::Ethernet);

        let udp = parser
            .parse_packet(&udp_frame([1, 1, 1, 1], [8, 8, 8, 8], 5353, 53, 32), 0.0)
            .unwrap();
        assert_eq!(udp.protocol, TransportProtocol::Udp);
        assert_eq!(udp.payload_len, 32);
        assert!(udp.flags.is_none());

        let icmp = parser
            .parse_packet(&icmp_frame([1, 1, 1, 1], [8, 8, 8, 8]), 0.0)
            .unwrap();
        assert_eq!(icmp.protocol, TransportProtocol::Icmp);
        assert_eq!(icmp.dst_port, None);
    }

    #[test]
    fn test_non_ip_frame_is_other() {
        let mut frame = vec![0u8; 60];
        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        let record = PacketParser::new(LinkLayer::Ethernet)
            .parse_packet(&frame, 0.0)
            .unwrap();
        assert_eq!(record.protocol, TransportProtocol::Other);
        assert!(record.src_ip.is_none());
    }

    #[test]
    fn test_short_frame_is_decode_error() {
        let parser = PacketParser::new(LinkLayer::Ethernet);
        assert!(matches!(parser.parse_packet(&[0u8; 6], 0.0), Err(AppError::Decode(_))));
    }

    #[test]
    fn test_raw_ip_link() {
        let frame = udp_frame([1, 1, 1, 1], [2, 2, 2, 2], 1000, 2000, 4);
        let record = PacketParser::new(LinkLayer::RawIp)
            .parse_packet(&frame[14..], 0.0)
            .unwrap();
        assert_eq!(record.protocol, TransportProtocol::Udp);
        assert_eq!(record.src_port, Some(1000));
    }
}
