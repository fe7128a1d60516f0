//! Minimal pcapng block reader.
//!
//! Understands the blocks needed to recover timestamped frames: Section Header,
//! Interface Description, Enhanced Packet, Simple Packet and the obsolete Packet block.
//! Everything else is skipped by its declared length.

use log::trace;

use crate::utils::error::{AppError, AppResult};

const BLOCK_SECTION_HEADER: u32 = 0x0A0D_0D0A;
const BLOCK_INTERFACE_DESCRIPTION: u32 = 0x0000_0001;
const BLOCK_PACKET: u32 = 0x0000_0002;
const BLOCK_SIMPLE_PACKET: u32 = 0x0000_0003;
const BLOCK_ENHANCED_PACKET: u32 = 0x0000_0006;

const BYTE_ORDER_MAGIC: u32 = 0x1A2B_3C4D;
const OPTION_END: u16 = 0;
const OPTION_IF_TSRESOL: u16 = 9;

/// True when `bytes` starts with a pcapng Section Header Block
pub fn is_pcapng(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && bytes[..4] == [0x0A, 0x0D, 0x0D, 0x0A]
}

/// A frame recovered from a packet block
#[derive(Debug, Clone, Copy)]
pub struct PcapngPacket<'a> {
    pub timestamp: f64,
    pub link_type: i32,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
struct Interface {
    link_type: i32,
    /// Timestamp units per second
    resolution: f64,
}

/// Iterates the packet blocks of a pcapng buffer
pub struct PcapngReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    big_endian: bool,
    interfaces: Vec<Interface>,
    last_timestamp: f64,
}

impl<'a> PcapngReader<'a> {
    /// Validates the leading Section Header Block
    pub fn new(bytes: &'a [u8]) -> AppResult<Self> {
        if !is_pcapng(bytes) {
            return Err(AppError::Decode("missing pcapng section header".into()));
        }
        let mut reader = Self {
            bytes,
            offset: 0,
            big_endian: false,
            interfaces: Vec::new(),
            last_timestamp: 0.0,
        };
        reader.detect_byte_order(0)?;
        Ok(reader)
    }

    /// Next packet in the buffer, `None` at the end
    pub fn next_packet(&mut self) -> AppResult<Option<PcapngPacket<'a>>> {
        while self.offset + 12 <= self.bytes.len() {
            let start = self.offset;
            let block_type = self.read_u32(start)?;
            if block_type == BLOCK_SECTION_HEADER {
                self.detect_byte_order(start)?;
            }
            let total_len = self.read_u32(start + 4)? as usize;
            if total_len < 12 || total_len % 4 != 0 || start + total_len > self.bytes.len() {
                return Err(AppError::Decode(format!(
                    "bad block length {} at offset {}",
                    total_len, start
                )));
            }
            let bytes = self.bytes;
            let body = &bytes[start + 8..start + total_len - 4];
            self.offset = start + total_len;

            match block_type {
                BLOCK_SECTION_HEADER => self.interfaces.clear(),
                BLOCK_INTERFACE_DESCRIPTION => {
                    let interface = self.parse_interface(body)?;
                    self.interfaces.push(interface);
                }
                BLOCK_ENHANCED_PACKET => return self.parse_enhanced(body).map(Some),
                BLOCK_SIMPLE_PACKET => return self.parse_simple(body).map(Some),
                BLOCK_PACKET => return self.parse_obsolete(body).map(Some),
                other => trace!("Skipping pcapng block type {:#x}", other),
            }
        }
        Ok(None)
    }

    fn detect_byte_order(&mut self, start: usize) -> AppResult<()> {
        let magic = self
            .bytes
            .get(start + 8..start + 12)
            .ok_or_else(|| AppError::Decode("truncated section header".into()))?;
        let magic: [u8; 4] = [magic[0], magic[1], magic[2], magic[3]];
        if u32::from_le_bytes(magic) == BYTE_ORDER_MAGIC {
            self.big_endian = false;
        } else if u32::from_be_bytes(magic) == BYTE_ORDER_MAGIC {
            self.big_endian = true;
        } else {
            return Err(AppError::Decode("unknown pcapng byte-order magic".into()));
        }
        Ok(())
    }

    fn parse_interface(&self, body: &[u8]) -> AppResult<Interface> {
        let link_type = self.u16_at(body, 0)? as i32;
        let mut resolution = 1_000_000.0;

        // Options start after linktype(2) + reserved(2) + snaplen(4).
        let mut pos = 8;
        while pos + 4 <= body.len() {
            let code = self.u16_at(body, pos)?;
            let len = self.u16_at(body, pos + 2)? as usize;
            if code == OPTION_END {
                break;
            }
            if code == OPTION_IF_TSRESOL && len >= 1 && pos + 4 < body.len() {
                let raw = body[pos + 4];
                resolution = if raw & 0x80 == 0 {
                    10f64.powi((raw & 0x7f) as i32)
                } else {
                    2f64.powi((raw & 0x7f) as i32)
                };
            }
            pos += 4 + padded(len);
        }

        Ok(Interface {
            link_type,
            resolution,
        })
    }

    fn parse_enhanced(&mut self, body: &'a [u8]) -> AppResult<PcapngPacket<'a>> {
        let interface_id = self.u32_at(body, 0)? as usize;
        let ts_high = self.u32_at(body, 4)?;
        let ts_low = self.u32_at(body, 8)?;
        let captured = self.u32_at(body, 12)? as usize;
        let data = body
            .get(20..20 + captured)
            .ok_or_else(|| AppError::Decode("enhanced packet data overruns block".into()))?;
        self.packet(interface_id, ts_high, ts_low, data)
    }

    fn parse_obsolete(&mut self, body: &'a [u8]) -> AppResult<PcapngPacket<'a>> {
        let interface_id = self.u16_at(body, 0)? as usize;
        let ts_high = self.u32_at(body, 4)?;
        let ts_low = self.u32_at(body, 8)?;
        let captured = self.u32_at(body, 12)? as usize;
        let data = body
            .get(20..20 + captured)
            .ok_or_else(|| AppError::Decode("packet data overruns block".into()))?;
        self.packet(interface_id, ts_high, ts_low, data)
    }

    fn parse_simple(&mut self, body: &'a [u8]) -> AppResult<PcapngPacket<'a>> {
        let original = self.u32_at(body, 0)? as usize;
        let available = body.len().saturating_sub(4);
        let data = &body[4..4 + original.min(available)];
        let interface = self.interface(0)?;

        // Simple packets carry no timestamp; reuse the previous one.
        Ok(PcapngPacket {
            timestamp: self.last_timestamp,
            link_type: interface.link_type,
            data,
        })
    }

    fn packet(
        &mut self,
        interface_id: usize,
        ts_high: u32,
        ts_low: u32,
        data: &'a [u8],
    ) -> AppResult<PcapngPacket<'a>> {
        let interface = self.interface(interface_id)?;
        let units = ((ts_high as u64) << 32) | ts_low as u64;
        let timestamp = units as f64 / interface.resolution;
        self.last_timestamp = timestamp;

        Ok(PcapngPacket {
            timestamp,
            link_type: interface.link_type,
            data,
        })
    }

    fn interface(&self, id: usize) -> AppResult<Interface> {
        self.interfaces
            .get(id)
            .copied()
            .ok_or_else(|| AppError::Decode(format!("packet references unknown interface {}", id)))
    }

    fn read_u32(&self, pos: usize) -> AppResult<u32> {
        self.u32_at(self.bytes, pos)
    }

    fn u32_at(&self, buf: &[u8], pos: usize) -> AppResult<u32> {
        let b = buf
            .get(pos..pos + 4)
            .ok_or_else(|| AppError::Decode(format!("truncated field at offset {}", pos)))?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    fn u16_at(&self, buf: &[u8], pos: usize) -> AppResult<u16> {
        let b = buf
            .get(pos..pos + 2)
            .ok_or_else(|| AppError::Decode(format!("truncated field at offset {}", pos)))?;
        let b = [b[0], b[1]];
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }
}

fn padded(len: usize) -> usize {
    (len + 3) & !3
}
