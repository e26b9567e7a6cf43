//! F-engine channel-block formats: CHIPS, SNAP2, IBEAM, and PBEAM.
//!
//! These carry no sync word; framing validity comes from non-zero channel
//! counts and 1-based source fields. All multi-byte fields are big-endian.

use super::{be16, be32, be64, PacketDesc, SequenceTags};

pub const CHIPS_HEADER_SIZE: usize = 16;
pub const SNAP2_HEADER_SIZE: usize = 28;
pub const IBEAM_HEADER_SIZE: usize = 16;
pub const PBEAM_HEADER_SIZE: usize = 18;

// ---- CHIPS --------------------------------------------------------------
//
// { roach u8, gbe u8, nchan u8, nsubband u8, subband u8, nroach u8,
//   chan0 u16, seq u64 }. roach is 1-based.

pub fn parse_chips(packet: &[u8]) -> Option<PacketDesc> {
    let roach = packet[0];
    let nchan = packet[2];
    if roach == 0 || nchan == 0 {
        return None;
    }
    let chan0 = be16(&packet[6..8]);
    let seq = be64(&packet[8..16]);
    Some(PacketDesc {
        seq,
        src: u32::from(roach - 1),
        time_tag: seq as i64,
        payload_offset: CHIPS_HEADER_SIZE,
        payload_len: packet.len() - CHIPS_HEADER_SIZE,
        tags: SequenceTags::Chips { nchan, chan0 },
    })
}

pub fn fill_chips(desc: &PacketDesc, out: &mut [u8]) {
    let (nchan, chan0) = match desc.tags {
        SequenceTags::Chips { nchan, chan0 } => (nchan, chan0),
        _ => (0, 0),
    };
    out[..CHIPS_HEADER_SIZE].fill(0);
    out[0] = desc.src as u8 + 1;
    out[2] = nchan;
    out[3] = 1; // nsubband
    out[6..8].copy_from_slice(&chan0.to_be_bytes());
    out[8..16].copy_from_slice(&desc.seq.to_be_bytes());
}

// ---- SNAP2 --------------------------------------------------------------
//
// { seq u64, npol u16, npol_tot u16, nchan u16, nchan_tot u16,
//   chan_block_id u32, chan0 u32, pol0 u32 }. Sources are channel blocks.

pub fn parse_snap2(packet: &[u8]) -> Option<PacketDesc> {
    let seq = be64(&packet[0..8]);
    let npol = be16(&packet[8..10]);
    let nchan = be16(&packet[12..14]);
    if npol == 0 || nchan == 0 {
        return None;
    }
    let chan_block_id = be32(&packet[16..20]);
    let chan0 = be32(&packet[20..24]);
    Some(PacketDesc {
        seq,
        src: chan_block_id,
        time_tag: seq as i64,
        payload_offset: SNAP2_HEADER_SIZE,
        payload_len: packet.len() - SNAP2_HEADER_SIZE,
        tags: SequenceTags::Snap2 { nchan, chan0, npol },
    })
}

pub fn fill_snap2(desc: &PacketDesc, out: &mut [u8]) {
    let (nchan, chan0, npol) = match desc.tags {
        SequenceTags::Snap2 { nchan, chan0, npol } => (nchan, chan0, npol),
        _ => (0, 0, 0),
    };
    out[..SNAP2_HEADER_SIZE].fill(0);
    out[0..8].copy_from_slice(&desc.seq.to_be_bytes());
    out[8..10].copy_from_slice(&npol.to_be_bytes());
    out[10..12].copy_from_slice(&npol.to_be_bytes());
    out[12..14].copy_from_slice(&nchan.to_be_bytes());
    out[14..16].copy_from_slice(&nchan.to_be_bytes());
    out[16..20].copy_from_slice(&desc.src.to_be_bytes());
    out[20..24].copy_from_slice(&chan0.to_be_bytes());
}

// ---- IBEAM --------------------------------------------------------------
//
// { server u8, gbe u8, nchan u8, nbeam u8, nserver u8, pad u8, chan0 u16,
//   seq u64 }. server is 1-based.

pub fn parse_ibeam(packet: &[u8]) -> Option<PacketDesc> {
    let server = packet[0];
    let nchan = packet[2];
    let nbeam = packet[3];
    if server == 0 || nchan == 0 || nbeam == 0 {
        return None;
    }
    let chan0 = be16(&packet[6..8]);
    let seq = be64(&packet[8..16]);
    Some(PacketDesc {
        seq,
        src: u32::from(server - 1),
        time_tag: seq as i64,
        payload_offset: IBEAM_HEADER_SIZE,
        payload_len: packet.len() - IBEAM_HEADER_SIZE,
        tags: SequenceTags::Ibeam { nchan, nbeam, chan0 },
    })
}

pub fn fill_ibeam(desc: &PacketDesc, out: &mut [u8]) {
    let (nchan, nbeam, chan0) = match desc.tags {
        SequenceTags::Ibeam { nchan, nbeam, chan0 } => (nchan, nbeam, chan0),
        _ => (0, 0, 0),
    };
    out[..IBEAM_HEADER_SIZE].fill(0);
    out[0] = desc.src as u8 + 1;
    out[2] = nchan;
    out[3] = nbeam;
    out[4] = 1; // nserver
    out[6..8].copy_from_slice(&chan0.to_be_bytes());
    out[8..16].copy_from_slice(&desc.seq.to_be_bytes());
}

// ---- PBEAM --------------------------------------------------------------
//
// { server u8, beam u8, gbe u8, nchan u8, nbeam u8, nserver u8, navg u16,
//   chan0 u16, seq u64 }. server is 1-based.

pub fn parse_pbeam(packet: &[u8]) -> Option<PacketDesc> {
    let server = packet[0];
    let nchan = packet[3];
    let nbeam = packet[4];
    if server == 0 || nchan == 0 || nbeam == 0 {
        return None;
    }
    let navg = be16(&packet[6..8]);
    let chan0 = be16(&packet[8..10]);
    let seq = be64(&packet[10..18]);
    Some(PacketDesc {
        seq,
        src: u32::from(server - 1),
        time_tag: seq as i64,
        payload_offset: PBEAM_HEADER_SIZE,
        payload_len: packet.len() - PBEAM_HEADER_SIZE,
        tags: SequenceTags::Pbeam { nchan, nbeam, chan0, navg },
    })
}

pub fn fill_pbeam(desc: &PacketDesc, out: &mut [u8]) {
    let (nchan, nbeam, chan0, navg) = match desc.tags {
        SequenceTags::Pbeam { nchan, nbeam, chan0, navg } => (nchan, nbeam, chan0, navg),
        _ => (0, 0, 0, 0),
    };
    out[..PBEAM_HEADER_SIZE].fill(0);
    out[0] = desc.src as u8 + 1;
    out[1] = 1; // beam
    out[3] = nchan;
    out[4] = nbeam;
    out[5] = 1; // nserver
    out[6..8].copy_from_slice(&navg.to_be_bytes());
    out[8..10].copy_from_slice(&chan0.to_be_bytes());
    out[10..18].copy_from_slice(&desc.seq.to_be_bytes());
}
