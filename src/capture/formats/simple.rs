//! The "simple" format: an 8-byte big-endian sequence number followed by
//! an opaque payload. One source, no sequence tags. Mostly useful for
//! loopback testing and synthetic streams.

use super::{be64, PacketDesc, SequenceTags};

pub const HEADER_SIZE: usize = 8;

pub fn parse(packet: &[u8]) -> Option<PacketDesc> {
    let seq = be64(&packet[0..8]);
    Some(PacketDesc {
        seq,
        src: 0,
        time_tag: seq as i64,
        payload_offset: HEADER_SIZE,
        payload_len: packet.len() - HEADER_SIZE,
        tags: SequenceTags::Simple,
    })
}

pub fn fill(desc: &PacketDesc, out: &mut [u8]) {
    out[0..8].copy_from_slice(&desc.seq.to_be_bytes());
}
