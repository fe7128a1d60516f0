use serde::{Deserialize, Serialize};
use std::fmt;

/// On-disk container format of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    #[default]
    Pcap,
    Pcapng,
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcap => write!(f, "pcap"),
            Self::Pcapng => write!(f, "pcapng"),
        }
    }
}

/// Statistics of one capture-to-windows conversion
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversionStats {
    /// Frames read from the capture file
    pub frames_read: usize,

    /// Frames decoded into packet records
    pub packets_decoded: usize,

    /// Frames skipped because the link-layer header did not parse
    pub decode_errors: usize,

    /// Non-empty windows produced before gap filling
    pub windows: usize,

    /// Capture container format
    pub format: Option<CaptureFormat>,

    /// Link-layer type number (LINKTYPE_*)
    pub link_type: Option<i32>,

    /// Timestamp of the first frame (seconds since the epoch)
    pub base_time: Option<f64>,
}
