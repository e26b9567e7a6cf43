//! VDIF (VLBI Data Interchange Format) frames.
//!
//! Unlike the station formats, VDIF header words are little-endian per the
//! published standard. Only the non-legacy 32-byte header is supported.
//! The header carries no frames-per-second, so the sequence number packs
//! the epoch seconds above the 24-bit in-second frame number; it is
//! strictly increasing, which is all the capture machine needs.

use super::{le32, PacketDesc, SequenceTags};

pub const HEADER_SIZE: usize = 32;

pub fn parse(packet: &[u8]) -> Option<PacketDesc> {
    let w0 = le32(&packet[0..4]);
    let invalid = w0 >> 31 != 0;
    let legacy = (w0 >> 30) & 1 != 0;
    if invalid || legacy {
        return None;
    }
    let seconds = w0 & 0x3FFF_FFFF;

    let w1 = le32(&packet[4..8]);
    let frame_number = w1 & 0xFF_FFFF;
    let ref_epoch = ((w1 >> 24) & 0x3F) as u8;

    let w2 = le32(&packet[8..12]);
    let frame_len_words = w2 & 0xFF_FFFF;
    let nchan_log2 = ((w2 >> 24) & 0x1F) as u8;
    let version = w2 >> 29;
    if version > 1 {
        return None;
    }
    // Frame length counts the header and is in 8-byte units.
    if frame_len_words as usize * 8 != packet.len() {
        return None;
    }

    let w3 = le32(&packet[12..16]);
    let station = (w3 & 0xFFFF) as u16;
    let thread_id = (w3 >> 16) & 0x3FF;
    let nbit = ((w3 >> 26) & 0x1F) as u8 + 1;

    let seq = (u64::from(seconds) << 24) | u64::from(frame_number);
    Some(PacketDesc {
        seq,
        src: thread_id,
        time_tag: seq as i64,
        payload_offset: HEADER_SIZE,
        payload_len: packet.len() - HEADER_SIZE,
        tags: SequenceTags::Vdif {
            ref_epoch,
            nchan_log2,
            frame_len_words,
            nbit,
            station,
        },
    })
}

pub fn fill(desc: &PacketDesc, out: &mut [u8]) {
    let (ref_epoch, nchan_log2, nbit, station) = match desc.tags {
        SequenceTags::Vdif {
            ref_epoch,
            nchan_log2,
            nbit,
            station,
            ..
        } => (ref_epoch, nchan_log2, nbit, station),
        _ => (0, 0, 1, 0),
    };
    let seconds = (desc.seq >> 24) as u32 & 0x3FFF_FFFF;
    let frame_number = desc.seq as u32 & 0xFF_FFFF;
    let frame_len_words = ((HEADER_SIZE + desc.payload_len) / 8) as u32;

    out[..HEADER_SIZE].fill(0);
    out[0..4].copy_from_slice(&seconds.to_le_bytes());
    let w1 = frame_number | (u32::from(ref_epoch) << 24);
    out[4..8].copy_from_slice(&w1.to_le_bytes());
    let w2 = (frame_len_words & 0xFF_FFFF) | (u32::from(nchan_log2) << 24);
    out[8..12].copy_from_slice(&w2.to_le_bytes());
    let w3 = u32::from(station) | ((desc.src & 0x3FF) << 16) | (u32::from(nbit - 1) << 26);
    out[12..16].copy_from_slice(&w3.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let tags = SequenceTags::Vdif {
            ref_epoch: 40,
            nchan_log2: 1,
            frame_len_words: (HEADER_SIZE + 5000) as u32 / 8,
            nbit: 2,
            station: 0x4C57,
        };
        let sent = PacketDesc {
            seq: (123u64 << 24) | 456,
            src: 5,
            time_tag: 0,
            payload_offset: HEADER_SIZE,
            payload_len: 5000,
            tags,
        };
        let mut wire = vec![0u8; HEADER_SIZE + 5000];
        fill(&sent, &mut wire);
        let got = parse(&wire).unwrap();
        assert_eq!(got.seq, sent.seq);
        assert_eq!(got.src, 5);
        assert_eq!(got.tags, tags);
        assert_eq!(got.payload_len, 5000);
    }

    #[test]
    fn rejects_invalid_legacy_and_bad_length() {
        let sent = PacketDesc {
            seq: 1,
            src: 0,
            time_tag: 0,
            payload_offset: HEADER_SIZE,
            payload_len: 64,
            tags: SequenceTags::Vdif {
                ref_epoch: 0,
                nchan_log2: 0,
                frame_len_words: 12,
                nbit: 8,
                station: 0,
            },
        };
        let mut wire = vec![0u8; HEADER_SIZE + 64];
        fill(&sent, &mut wire);
        assert!(parse(&wire).is_some());

        let mut invalid = wire.clone();
        invalid[3] |= 0x80; // invalid bit, little-endian word 0
        assert!(parse(&invalid).is_none());

        let mut legacy = wire.clone();
        legacy[3] |= 0x40;
        assert!(parse(&legacy).is_none());

        let truncated = &wire[..wire.len() - 8];
        assert!(parse(truncated).is_none());
    }
}
