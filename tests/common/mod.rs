#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

/// Writes a little-endian classic pcap with Ethernet link type
pub fn write_pcap(path: &Path, packets: &[(f64, Vec<u8>)]) {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());

    for (ts, frame) in packets {
        let secs = ts.floor();
        let micros = ((ts - secs) * 1e6).round() as u32;
        out.extend_from_slice(&(secs as u32).to_le_bytes());
        out.extend_from_slice(&micros.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
    }

    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&out).unwrap();
}

fn ipv4_frame(src: [u8; 4], dst: [u8; 4], proto: u8, transport: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 12];
    frame.extend_from_slice(&[0x08, 0x00]);

    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((20 + transport.len()) as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = proto;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);

    frame.extend(ip);
    frame.extend_from_slice(transport);
    frame
}

pub fn udp(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: usize) -> Vec<u8> {
    let mut datagram = vec![0u8; 8 + payload];
    datagram[0..2].copy_from_slice(&sport.to_be_bytes());
    datagram[2..4].copy_from_slice(&dport.to_be_bytes());
    datagram[4..6].copy_from_slice(&((8 + payload) as u16).to_be_bytes());
    ipv4_frame(src, dst, 17, &datagram)
}

pub fn tcp(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, flags: u8) -> Vec<u8> {
    let mut segment = vec![0u8; 20];
    segment[0..2].copy_from_slice(&sport.to_be_bytes());
    segment[2..4].copy_from_slice(&dport.to_be_bytes());
    segment[12] = 5 << 4;
    segment[13] = flags;
    ipv4_frame(src, dst, 6, &segment)
}

/// One minute of steady DNS-like traffic with a burst in second `spike`
pub fn steady_traffic(start: f64, seconds: usize, spike: Option<usize>) -> Vec<(f64, Vec<u8>)> {
    let client = [10, 0, 0, 2];
    let server = [10, 0, 0, 53];
    let mut packets = Vec::new();
    for second in 0..seconds {
        let count = if Some(second) == spike { 400 } else { 20 + second % 3 };
        for k in 0..count {
            let ts = start + second as f64 + k as f64 / (count as f64 + 1.0);
            let sport = 40000 + (k % 50) as u16;
            packets.push((ts, udp(client, server, sport, 53, 40)));
        }
    }
    packets
}
