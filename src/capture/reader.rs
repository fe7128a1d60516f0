use log::{debug, info, warn};
use pcap::Capture;
use std::path::Path;

use crate::capture::pcapng;
use crate::models::stats::CaptureFormat;
use crate::utils::error::{AppError, AppResult};

/// LINKTYPE_ETHERNET
pub const LINKTYPE_ETHERNET: i32 = 1;
/// DLT_RAW as used by BSD-derived systems
pub const DLT_RAW_BSD: i32 = 12;
/// DLT_RAW as used by OpenBSD
pub const DLT_RAW_OPENBSD: i32 = 14;
/// LINKTYPE_RAW
pub const LINKTYPE_RAW: i32 = 101;
/// LINKTYPE_LINUX_SLL (Linux cooked capture)
pub const LINKTYPE_LINUX_SLL: i32 = 113;

/// One frame as stored in the capture file
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Seconds since the epoch
    pub timestamp: f64,
    /// LINKTYPE_* of the interface the frame was captured on
    pub link_type: i32,
    pub data: &'a [u8],
}

/// What was learned about a capture while reading it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub format: CaptureFormat,
    pub link_type: i32,
    pub frames: usize,
}

/// Reads every frame of the capture at `path`, in file order.
///
/// The classic pcap reader (libpcap) is tried first; when it cannot open the file
/// the built-in pcapng reader takes over.
pub fn for_each_frame<F>(path: &Path, mut on_frame: F) -> AppResult<CaptureInfo>
where
    F: FnMut(RawFrame<'_>),
{
    match Capture::from_file(path) {
        Ok(mut capture) => {
            let link_type = capture.get_datalink().0;
            debug!("Opened {} as pcap, link type {}", path.display(), link_type);

            let mut frames = 0usize;
            loop {
                match capture.next_packet() {
                    Ok(packet) => {
                        let ts = packet.header.ts;
                        let timestamp = ts.tv_sec as f64 + ts.tv_usec as f64 / 1_000_000.0;
                        frames += 1;
                        on_frame(RawFrame {
                            timestamp,
                            link_type,
                            data: packet.data,
                        });
                    }
                    Err(pcap::Error::NoMorePackets) => break,
                    Err(e) => {
                        warn!("Stopped reading {} after {} frames: {}", path.display(), frames, e);
                        break;
                    }
                }
            }

            Ok(CaptureInfo {
                format: CaptureFormat::Pcap,
                link_type,
                frames,
            })
        }
        Err(e) => {
            info!("pcap reader rejected {} ({}), trying pcapng", path.display(), e);
            let bytes = std::fs::read(path)?;
            if !pcapng::is_pcapng(&bytes) {
                return Err(AppError::Pcap(e));
            }
            read_pcapng(&bytes, on_frame)
        }
    }
}

/// Reads a pcapng buffer with the built-in block reader
pub fn read_pcapng<F>(bytes: &[u8], mut on_frame: F) -> AppResult<CaptureInfo>
where
    F: FnMut(RawFrame<'_>),
{
    let mut reader = pcapng::PcapngReader::new(bytes)?;
    let mut frames = 0usize;
    let mut link_type = None;

    loop {
        match reader.next_packet() {
            Ok(Some(packet)) => {
                link_type.get_or_insert(packet.link_type);
                frames += 1;
                on_frame(RawFrame {
                    timestamp: packet.timestamp,
                    link_type: packet.link_type,
                    data: packet.data,
                });
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped reading pcapng after {} frames: {}", frames, e);
                break;
            }
        }
    }

    Ok(CaptureInfo {
        format: CaptureFormat::Pcapng,
        link_type: link_type.unwrap_or(LINKTYPE_ETHERNET),
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pcapng::tests::build_pcapng;
    use std::io::Write;

    #[test]
    fn test_read_pcapng_buffer() {
        let bytes = build_pcapng(&[(10.0, vec![1u8; 60]), (10.5, vec![2u8; 70])]);
        let mut seen = Vec::new();
        let info = read_pcapng(&bytes, |frame| seen.push((frame.timestamp, frame.data.len())))
            .unwrap();

        assert_eq!(info.format, CaptureFormat::Pcapng);
        assert_eq!(info.frames, 2);
        assert_eq!(info.link_type, LINKTYPE_ETHERNET);
        assert_eq!(seen.len(), 2);
        assert!((seen[0].0 - 10.0).abs() < 1e-9);
        assert!((seen[1].0 - 10.5).abs() < 1e-9);
        assert_eq!((seen[0].1, seen[1].1), (60, 70));
    }

    #[test]
    fn test_unknown_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a capture file").unwrap();
        let result = for_each_frame(file.path(), |_| {});
        assert!(result.is_err());
    }
}
