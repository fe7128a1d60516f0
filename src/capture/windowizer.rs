use lazy_static::lazy_static;
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::Path;

use crate::capture::parser::{LinkLayer, PacketParser};
use crate::capture::reader::{self, RawFrame};
use crate::features::postprocess;
use crate::features::table::FeatureTable;
use crate::models::packet::{PacketRecord, TcpFlagSet, TransportProtocol};
use crate::models::stats::ConversionStats;
use crate::models::window::WindowFeatures;
use crate::utils::error::{AppError, AppResult};
use crate::utils::stats;

/// Default window width in seconds
pub const DEFAULT_WINDOW_SIZE: f64 = 1.0;
/// Default label attached to every window
pub const DEFAULT_LABEL: &str = "unknown";

lazy_static! {
    static ref WELL_KNOWN_PORTS: HashSet<u16> =
        [20, 21, 22, 23, 25, 53, 80, 110, 143, 443, 993, 995]
            .into_iter()
            .collect();
}

/// Result of converting one capture file
#[derive(Debug, Clone, Default)]
pub struct Conversion {
    pub table: FeatureTable,
    pub stats: ConversionStats,
}

/// Packet records grouped by window index
#[derive(Debug, Default)]
pub struct WindowedPackets {
    pub base_time: Option<f64>,
    pub windows: BTreeMap<i64, Vec<PacketRecord>>,
    pub frames_read: usize,
    pub packets_decoded: usize,
    pub decode_errors: usize,
}

/// Splits a capture into fixed-width time windows and aggregates each one
#[derive(Debug, Clone)]
pub struct Windowizer {
    window_size: f64,
    label: String,
}

impl Default for Windowizer {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

impl Windowizer {
    pub fn new(window_size: f64, label: impl Into<String>) -> AppResult<Self> {
        if !window_size.is_finite() || window_size <= 0.0 {
            return Err(AppError::configuration(format!(
                "window size must be a positive number of seconds, got {}",
                window_size
            )));
        }
        Ok(Self {
            window_size,
            label: label.into(),
        })
    }

    pub fn window_size(&self) -> f64 {
        self.window_size
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Converts the capture at `path` into a gap-filled feature table with derived
    /// columns. An unreadable capture yields an empty table.
    pub fn convert_file(&self, path: &Path) -> Conversion {
        info!("Processing capture {}", path.display());

        let mut grouped = WindowedPackets::default();
        let mut parsers: BTreeMap<i32, PacketParser> = BTreeMap::new();
        let read = reader::for_each_frame(path, |frame| {
            let parser = parsers
                .entry(frame.link_type)
                .or_insert_with(|| PacketParser::new(LinkLayer::from_link_type(frame.link_type)));
            self.push_frame(&mut grouped, parser, frame);
        });

        let mut stats = ConversionStats::default();
        match read {
            Ok(capture) => {
                stats.format = Some(capture.format);
                stats.link_type = Some(capture.link_type);
            }
            Err(e) => {
                warn!("Failed to read capture {}: {}", path.display(), e);
                return Conversion::default();
            }
        }

        stats.frames_read = grouped.frames_read;
        stats.packets_decoded = grouped.packets_decoded;
        stats.decode_errors = grouped.decode_errors;
        stats.base_time = grouped.base_time;

        if grouped.packets_decoded == 0 {
            warn!("No packets extracted from {}", path.display());
            return Conversion {
                table: FeatureTable::default(),
                stats,
            };
        }
        info!(
            "packets: {}, decode errors: {}",
            grouped.packets_decoded, grouped.decode_errors
        );

        let windows = self.aggregate(&grouped);
        stats.windows = windows.len();

        let table = FeatureTable::from_windows(&windows);
        let table = postprocess::fill_gaps(table, self.window_size);
        let table = postprocess::add_derived_features(table);

        info!(
            "Converted {} ({}, link type {}): {} frames, {} windows before gap fill, {} rows",
            path.display(),
            stats.format.unwrap_or_default(),
            stats.link_type.unwrap_or(reader::LINKTYPE_ETHERNET),
            stats.frames_read,
            stats.windows,
            table.len()
        );

        Conversion { table, stats }
    }

    /// Window index of a timestamp relative to the first one
    pub fn window_index(&self, timestamp: f64, base_time: f64) -> i64 {
        ((timestamp - base_time) / self.window_size).floor() as i64
    }

    /// Decodes one frame into its window
    pub fn push_frame(
        &self,
        grouped: &mut WindowedPackets,
        parser: &PacketParser,
        frame: RawFrame<'_>,
    ) {
        grouped.frames_read += 1;
        let base_time = *grouped.base_time.get_or_insert(frame.timestamp);

        match parser.parse_packet(frame.data, frame.timestamp) {
            Ok(record) => {
                let index = self.window_index(frame.timestamp, base_time);
                grouped.windows.entry(index).or_default().push(record);
                grouped.packets_decoded += 1;
            }
            Err(e) => {
                trace!("Skipping frame at {}: {}", frame.timestamp, e);
                grouped.decode_errors += 1;
            }
        }
    }

    /// Per-window feature vectors in ascending window order
    pub fn aggregate(&self, grouped: &WindowedPackets) -> Vec<WindowFeatures> {
        let Some(base_time) = grouped.base_time else {
            return Vec::new();
        };

        let mut rows: Vec<WindowFeatures> = Vec::with_capacity(grouped.windows.len());
        for (index, packets) in &grouped.windows {
            let window_start = base_time + *index as f64 * self.window_size;
            let features = compute_window(packets, window_start, rows.last(), &self.label);
            rows.push(features);
        }
        debug!("Aggregated {} windows", rows.len());
        rows
    }
}

/// Feature vector of a window with no packets
pub fn empty_window(window_start: f64, label: &str) -> WindowFeatures {
    WindowFeatures {
        timestamp: window_start,
        outbound_ratio: 0.5,
        inbound_ratio: 0.5,
        label: label.to_string(),
        ..Default::default()
    }
}

/// Computes the statistics of one window.
///
/// `previous` is the last emitted window, if any.
pub fn compute_window(
    packets: &[PacketRecord],
    window_start: f64,
    previous: Option<&WindowFeatures>,
    label: &str,
) -> WindowFeatures {
    if packets.is_empty() {
        return empty_window(window_start, label);
    }
    if let Some(prev) = previous {
        trace!(
            "Window {} follows {} ({} packets)",
            window_start,
            prev.timestamp,
            prev.packet_count
        );
    }

    let n = packets.len();
    let count = n as f64;
    let mut features = WindowFeatures {
        timestamp: window_start,
        packet_count: n as u64,
        label: label.to_string(),
        ..Default::default()
    };

    // sizes
    let lengths: Vec<f64> = packets.iter().map(|p| p.length as f64).collect();
    let sizes = stats::summarize(&lengths);
    features.byte_count = packets.iter().map(|p| p.length as u64).sum();
    features.payload_bytes = packets.iter().map(|p| p.payload_len as u64).sum();
    features.avg_packet_size = sizes.mean;
    features.std_packet_size = sizes.std_dev;
    features.min_packet_size = packets.iter().map(|p| p.length as u64).min().unwrap_or(0);
    features.max_packet_size = packets.iter().map(|p| p.length as u64).max().unwrap_or(0);
    features.median_packet_size = sizes.median;

    // inter-arrival times
    if n > 1 {
        let mut timestamps: Vec<f64> = packets.iter().map(|p| p.timestamp).collect();
        timestamps.sort_by(|a, b| a.total_cmp(b));
        let iats: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        let summary = stats::summarize(&iats);
        features.iat_mean = summary.mean;
        features.iat_std = stats::population_std(&iats);
        features.iat_min = summary.min;
        features.iat_max = summary.max;
        features.iat_median = summary.median;
        features.iat_cv = if features.iat_mean > 0.0 {
            features.iat_std / features.iat_mean
        } else {
            0.0
        };
    }

    // cardinalities
    features.unique_src_ips = distinct(packets.iter().filter_map(|p| p.src_ip));
    features.unique_dst_ips = distinct(packets.iter().filter_map(|p| p.dst_ip));
    features.unique_src_ports = distinct(packets.iter().filter_map(|p| p.src_port));
    features.unique_dst_ports = distinct(packets.iter().filter_map(|p| p.dst_port));
    features.unique_flows = distinct(packets.iter().filter_map(|p| {
        Some((p.src_ip?, p.dst_ip?, p.src_port?, p.dst_port?))
    }));
    features.unique_ip_pairs = distinct(packets.iter().filter_map(|p| Some((p.src_ip?, p.dst_ip?))));

    // protocols
    let protocol_count =
        |proto: TransportProtocol| packets.iter().filter(|p| p.protocol == proto).count() as u64;
    features.tcp_count = protocol_count(TransportProtocol::Tcp);
    features.udp_count = protocol_count(TransportProtocol::Udp);
    features.icmp_count = protocol_count(TransportProtocol::Icmp);
    features.other_proto_count =
        n as u64 - features.tcp_count - features.udp_count - features.icmp_count;
    features.tcp_ratio = features.tcp_count as f64 / count;
    features.udp_ratio = features.udp_count as f64 / count;

    // TCP flags
    if features.tcp_count > 0 {
        let flags: Vec<_> = packets
            .iter()
            .filter(|p| p.protocol == TransportProtocol::Tcp)
            .map(|p| p.flags.unwrap_or_default())
            .collect();
        let flag_count = |pick: fn(&TcpFlagSet) -> bool| {
            flags.iter().filter(|f| pick(f)).count() as u64
        };
        features.syn_count = flag_count(|f| f.syn);
        features.ack_count = flag_count(|f| f.ack);
        features.fin_count = flag_count(|f| f.fin);
        features.rst_count = flag_count(|f| f.rst);
        features.psh_count = flag_count(|f| f.psh);
        features.urg_count = flag_count(|f| f.urg);
        features.syn_only_count = flag_count(|f| f.is_syn_only());
        features.rst_ratio = features.rst_count as f64 / features.tcp_count as f64;
    }

    // TTL
    let ttls: Vec<f64> = packets.iter().filter_map(|p| p.ttl).map(f64::from).collect();
    if !ttls.is_empty() {
        features.ttl_mean = stats::mean(&ttls);
        features.ttl_std = stats::sample_std(&ttls);
        features.ttl_unique = distinct(packets.iter().filter_map(|p| p.ttl));
    }

    // destination ports
    let dst_ports: Vec<u16> = packets.iter().filter_map(|p| p.dst_port).collect();
    if !dst_ports.is_empty() {
        let total = dst_ports.len() as f64;
        let well_known = dst_ports.iter().filter(|p| WELL_KNOWN_PORTS.contains(p)).count();
        let high = dst_ports.iter().filter(|p| **p > 1024).count();
        features.well_known_port_ratio = well_known as f64 / total;
        features.high_port_ratio = high as f64 / total;
    }

    // entropies
    features.entropy_src_ip = stats::shannon_entropy(packets.iter().filter_map(|p| p.src_ip));
    features.entropy_dst_ip = stats::shannon_entropy(packets.iter().filter_map(|p| p.dst_ip));
    features.entropy_src_port = stats::shannon_entropy(packets.iter().filter_map(|p| p.src_port));
    features.entropy_dst_port = stats::shannon_entropy(packets.iter().filter_map(|p| p.dst_port));
    features.entropy_length = stats::shannon_entropy(packets.iter().map(|p| p.length));

    // direction, relative to the first sender in the window
    let (outbound, inbound) = direction_ratios(packets);
    features.outbound_ratio = outbound;
    features.inbound_ratio = inbound;

    features
}

fn direction_ratios(packets: &[PacketRecord]) -> (f64, f64) {
    let Some(host) = packets.first().and_then(|p| p.src_ip) else {
        return (0.5, 0.5);
    };
    let total = packets.len() as f64;
    let share = |pick: fn(&PacketRecord) -> Option<IpAddr>| {
        packets.iter().filter(|p| pick(p) == Some(host)).count() as f64 / total
    };
    (share(|p| p.src_ip), share(|p| p.dst_ip))
}

fn distinct<T, I>(values: I) -> u64
where
    T: std::hash::Hash + Eq,
    I: IntoIterator<Item = T>,
{
    values.into_iter().collect::<HashSet<T>>().len() as u64
}
