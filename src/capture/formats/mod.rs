//! Packet format registry: header layouts, parsers, and writers.
//!
//! Each format is a variant of [`PacketFormat`] with pure per-variant
//! functions; the capture state machine owns all mutable state. Parsers
//! take raw packet bytes and produce a [`PacketDesc`] (or `None` on bad
//! framing, which the capture counts and drops). Writers fill wire headers
//! with multi-byte fields in network order, except where a format's
//! established layout says otherwise.

mod chips;
mod lwa;
mod simple;
mod vdif;

use crate::status::{Result, Status};

/// Everything a decoder extracts from one packet.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDesc {
    /// Monotonic frame sequence number in format-defined units.
    pub seq: u64,
    /// Source identifier (antenna, beam, server, channel block, ...).
    pub src: u32,
    /// Raw time tag carried by the packet, where the format has one;
    /// otherwise the sequence number.
    pub time_tag: i64,
    /// Payload location within the packet buffer.
    pub payload_offset: usize,
    pub payload_len: usize,
    /// Sequence-identifying tags; a change starts a new sequence.
    pub tags: SequenceTags,
}

/// The per-format tuple that identifies a sequence. Any mismatch between
/// consecutive packets closes the open sequence and starts a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceTags {
    Simple,
    Tbn { tuning: u32, gain: u16 },
    Drx { tuning: u32, decimation: u16 },
    Chips { nchan: u8, chan0: u16 },
    Snap2 { nchan: u16, chan0: u32, npol: u16 },
    Ibeam { nchan: u8, nbeam: u8, chan0: u16 },
    Pbeam { nchan: u8, nbeam: u8, chan0: u16, navg: u16 },
    Cor { first_chan: u16, gain: u16, navg: u32 },
    Vdif { ref_epoch: u8, nchan_log2: u8, frame_len_words: u32, nbit: u8, station: u16 },
    Tbx { nstand: u16, nchan: u16 },
}

/// Supported packet formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFormat {
    Simple,
    Chips,
    Snap2,
    Ibeam,
    Pbeam,
    Cor,
    Vdif,
    Tbn,
    Drx,
    Drx8,
    Tbx,
}

impl std::str::FromStr for PacketFormat {
    type Err = Status;
    fn from_str(s: &str) -> Result<PacketFormat> {
        match s {
            "simple" => Ok(PacketFormat::Simple),
            "chips" => Ok(PacketFormat::Chips),
            "snap2" => Ok(PacketFormat::Snap2),
            "ibeam" => Ok(PacketFormat::Ibeam),
            "pbeam" => Ok(PacketFormat::Pbeam),
            "cor" => Ok(PacketFormat::Cor),
            "vdif" => Ok(PacketFormat::Vdif),
            "tbn" => Ok(PacketFormat::Tbn),
            "drx" => Ok(PacketFormat::Drx),
            "drx8" => Ok(PacketFormat::Drx8),
            "tbx" => Ok(PacketFormat::Tbx),
            _ => Err(Status::Unsupported),
        }
    }
}

impl std::fmt::Display for PacketFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PacketFormat::Simple => "simple",
            PacketFormat::Chips => "chips",
            PacketFormat::Snap2 => "snap2",
            PacketFormat::Ibeam => "ibeam",
            PacketFormat::Pbeam => "pbeam",
            PacketFormat::Cor => "cor",
            PacketFormat::Vdif => "vdif",
            PacketFormat::Tbn => "tbn",
            PacketFormat::Drx => "drx",
            PacketFormat::Drx8 => "drx8",
            PacketFormat::Tbx => "tbx",
        })
    }
}

impl PacketFormat {
    /// Wire header size in bytes.
    pub fn header_size(&self) -> usize {
        match self {
            PacketFormat::Simple => simple::HEADER_SIZE,
            PacketFormat::Chips => chips::CHIPS_HEADER_SIZE,
            PacketFormat::Snap2 => chips::SNAP2_HEADER_SIZE,
            PacketFormat::Ibeam => chips::IBEAM_HEADER_SIZE,
            PacketFormat::Pbeam => chips::PBEAM_HEADER_SIZE,
            PacketFormat::Cor => lwa::COR_HEADER_SIZE,
            PacketFormat::Vdif => vdif::HEADER_SIZE,
            PacketFormat::Tbn => lwa::TBN_HEADER_SIZE,
            PacketFormat::Drx | PacketFormat::Drx8 => lwa::DRX_HEADER_SIZE,
            PacketFormat::Tbx => lwa::TBX_HEADER_SIZE,
        }
    }

    /// Fixed payload size for formats whose frames never vary; `None` for
    /// formats whose payload is described by their header. Disk sources
    /// require a fixed frame size.
    pub fn fixed_payload_size(&self) -> Option<usize> {
        match self {
            PacketFormat::Tbn => Some(lwa::TBN_PAYLOAD_SIZE),
            PacketFormat::Drx => Some(lwa::DRX_PAYLOAD_SIZE),
            PacketFormat::Drx8 => Some(lwa::DRX8_PAYLOAD_SIZE),
            _ => None,
        }
    }

    /// Decode one packet. `None` means bad sync/framing; the capture
    /// counts and drops it.
    pub fn parse(&self, packet: &[u8]) -> Option<PacketDesc> {
        if packet.len() <= self.header_size() {
            return None;
        }
        match self {
            PacketFormat::Simple => simple::parse(packet),
            PacketFormat::Chips => chips::parse_chips(packet),
            PacketFormat::Snap2 => chips::parse_snap2(packet),
            PacketFormat::Ibeam => chips::parse_ibeam(packet),
            PacketFormat::Pbeam => chips::parse_pbeam(packet),
            PacketFormat::Cor => lwa::parse_cor(packet),
            PacketFormat::Vdif => vdif::parse(packet),
            PacketFormat::Tbn => lwa::parse_tbn(packet),
            PacketFormat::Drx | PacketFormat::Drx8 => lwa::parse_drx(packet),
            PacketFormat::Tbx => lwa::parse_tbx(packet),
        }
    }

    /// Byte offset of a packet's payload within its slot span. Every
    /// bundled format packs slots time-major with sources minor, so the
    /// offset is fully determined by the packet's position in the slot.
    pub fn ring_offset(
        &self,
        desc: &PacketDesc,
        slot_base_seq: u64,
        nsrc: usize,
        src0: usize,
        payload_size: usize,
    ) -> usize {
        let time = (desc.seq - slot_base_seq) as usize;
        let ringlet = desc.src as usize - src0;
        (time * nsrc + ringlet) * payload_size
    }

    /// Write the wire header for a packet described by `desc` into `out`.
    /// Returns the header size.
    pub fn fill_header(
        &self,
        desc: &PacketDesc,
        framecount: u64,
        out: &mut [u8],
    ) -> Result<usize> {
        if out.len() < self.header_size() {
            return Err(Status::InvalidArgument);
        }
        match self {
            PacketFormat::Simple => simple::fill(desc, out),
            PacketFormat::Chips => chips::fill_chips(desc, out),
            PacketFormat::Snap2 => chips::fill_snap2(desc, out),
            PacketFormat::Ibeam => chips::fill_ibeam(desc, out),
            PacketFormat::Pbeam => chips::fill_pbeam(desc, out),
            PacketFormat::Cor => lwa::fill_cor(desc, framecount, out),
            PacketFormat::Vdif => vdif::fill(desc, out),
            PacketFormat::Tbn => lwa::fill_tbn(desc, framecount, out),
            PacketFormat::Drx | PacketFormat::Drx8 => lwa::fill_drx(desc, framecount, out),
            PacketFormat::Tbx => lwa::fill_tbx(desc, framecount, out),
        }
        Ok(self.header_size())
    }
}

// Wire field helpers shared by the format modules. Slices are sized by the
// callers; the try_into cannot fail there.
pub(crate) fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes(bytes.try_into().unwrap())
}

pub(crate) fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes.try_into().unwrap())
}

pub(crate) fn be64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().unwrap())
}

pub(crate) fn le32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().unwrap())
}
