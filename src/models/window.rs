use serde::{Deserialize, Serialize};

/// Names of the numeric per-window columns, in table order.
pub const FEATURE_COLUMNS: [&str; 46] = [
    "packet_count",
    "byte_count",
    "payload_bytes",
    "avg_packet_size",
    "std_packet_size",
    "min_packet_size",
    "max_packet_size",
    "median_packet_size",
    "iat_mean",
    "iat_std",
    "iat_min",
    "iat_max",
    "iat_median",
    "iat_cv",
    "unique_src_ips",
    "unique_dst_ips",
    "unique_src_ports",
    "unique_dst_ports",
    "unique_flows",
    "unique_ip_pairs",
    "tcp_count",
    "udp_count",
    "icmp_count",
    "other_proto_count",
    "tcp_ratio",
    "udp_ratio",
    "syn_count",
    "ack_count",
    "fin_count",
    "rst_count",
    "psh_count",
    "urg_count",
    "syn_only_count",
    "rst_ratio",
    "ttl_mean",
    "ttl_std",
    "ttl_unique",
    "well_known_port_ratio",
    "high_port_ratio",
    "entropy_src_ip",
    "entropy_dst_ip",
    "entropy_src_port",
    "entropy_dst_port",
    "entropy_length",
    "outbound_ratio",
    "inbound_ratio",
];

/// Aggregated traffic features of one capture window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowFeatures {
    /// Window start, seconds since the epoch
    pub timestamp: f64,

    pub packet_count: u64,
    pub byte_count: u64,
    pub payload_bytes: u64,

    pub avg_packet_size: f64,
    pub std_packet_size: f64,
    pub min_packet_size: u64,
    pub max_packet_size: u64,
    pub median_packet_size: f64,

    pub iat_mean: f64,
    pub iat_std: f64,
    pub iat_min: f64,
    pub iat_max: f64,
    pub iat_median: f64,
    pub iat_cv: f64,

    pub unique_src_ips: u64,
    pub unique_dst_ips: u64,
    pub unique_src_ports: u64,
    pub unique_dst_ports: u64,
    pub unique_flows: u64,
    pub unique_ip_pairs: u64,

    pub tcp_count: u64,
    pub udp_count: u64,
    pub icmp_count: u64,
    pub other_proto_count: u64,
    pub tcp_ratio: f64,
    pub udp_ratio: f64,

    pub syn_count: u64,
    pub ack_count: u64,
    pub fin_count: u64,
    pub rst_count: u64,
    pub psh_count: u64,
    pub urg_count: u64,
    pub syn_only_count: u64,
    pub rst_ratio: f64,

    pub ttl_mean: f64,
    pub ttl_std: f64,
    pub ttl_unique: u64,

    pub well_known_port_ratio: f64,
    pub high_port_ratio: f64,

    pub entropy_src_ip: f64,
    pub entropy_dst_ip: f64,
    pub entropy_src_port: f64,
    pub entropy_dst_port: f64,
    pub entropy_length: f64,

    pub outbound_ratio: f64,
    pub inbound_ratio: f64,

    pub label: String,
}

impl WindowFeatures {
    /// Numeric column values in `FEATURE_COLUMNS` order
    pub fn values(&self) -> [f64; 46] {
        [
            self.packet_count as f64,
            self.byte_count as f64,
            self.payload_bytes as f64,
            self.avg_packet_size,
            self.std_packet_size,
            self.min_packet_size as f64,
            self.max_packet_size as f64,
            self.median_packet_size,
            self.iat_mean,
            self.iat_std,
            self.iat_min,
            self.iat_max,
            self.iat_median,
            self.iat_cv,
            self.unique_src_ips as f64,
            self.unique_dst_ips as f64,
            self.unique_src_ports as f64,
            self.unique_dst_ports as f64,
            self.unique_flows as f64,
            self.unique_ip_pairs as f64,
            self.tcp_count as f64,
            self.udp_count as f64,
            self.icmp_count as f64,
            self.other_proto_count as f64,
            self.tcp_ratio,
            self.udp_ratio,
            self.syn_count as f64,
            self.ack_count as f64,
            self.fin_count as f64,
            self.rst_count as f64,
            self.psh_count as f64,
            self.urg_count as f64,
            self.syn_only_count as f64,
            self.rst_ratio,
            self.ttl_mean,
            self.ttl_std,
            self.ttl_unique as f64,
            self.well_known_port_ratio,
            self.high_port_ratio,
            self.entropy_src_ip,
            self.entropy_dst_ip,
            self.entropy_src_port,
            self.entropy_dst_port,
            self.entropy_length,
            self.outbound_ratio,
            self.inbound_ratio,
        ]
    }
}
