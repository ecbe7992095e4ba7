//! Synthetic transport-stream construction for tests.

use crc::{Crc, CRC_32_MPEG_2};

use super::packet::{PACKET_SIZE, SYNC_BYTE};
use super::pes::encode_timestamp;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Wrap `data` in one TS packet, padding with an adaptation field so
/// the payload sits flush at the end of the packet.
pub(crate) fn ts_packet(pid: u16, pusi: bool, data: &[u8]) -> Vec<u8> {
    assert!(data.len() <= PACKET_SIZE - 4, "payload too large for one packet");
    let mut p = Vec::with_capacity(PACKET_SIZE);
    p.push(SYNC_BYTE);
    p.push(if pusi { 0x40 } else { 0x00 } | ((pid >> 8) & 0x1F) as u8);
    p.push((pid & 0xFF) as u8);
    let stuffing = PACKET_SIZE - 4 - data.len();
    if stuffing > 0 {
        p.push(0x30);
        p.push((stuffing - 1) as u8);
        if stuffing > 1 {
            p.push(0x00);
            p.extend(std::iter::repeat(0xFF).take(stuffing - 2));
        }
    } else {
        p.push(0x10);
    }
    p.extend_from_slice(data);
    p
}

/// Wrap a PSI section in one TS packet (pointer field, 0xFF stuffing).
pub(crate) fn psi_packet(pid: u16, section: &[u8]) -> Vec<u8> {
    assert!(section.len() <= PACKET_SIZE - 5);
    let mut p = vec![0xFFu8; PACKET_SIZE];
    p[0] = SYNC_BYTE;
    p[1] = 0x40 | ((pid >> 8) & 0x1F) as u8;
    p[2] = (pid & 0xFF) as u8;
    p[3] = 0x10;
    p[4] = 0x00; // pointer field
    p[5..5 + section.len()].copy_from_slice(section);
    p
}

fn finish_section(mut section: Vec<u8>) -> Vec<u8> {
    let section_length = section.len() - 3 + 4; // remaining bytes + CRC
    section[1] = 0xB0 | ((section_length >> 8) & 0x0F) as u8;
    section[2] = (section_length & 0xFF) as u8;
    let crc = CRC32.checksum(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

/// One-program PAT in a single packet, CRC intact.
pub(crate) fn pat_packet(program_number: u16, pmt_pid: u16) -> Vec<u8> {
    let mut s = vec![0x00, 0x00, 0x00, 0x00, 0x01, 0xC1, 0x00, 0x00];
    s.extend_from_slice(&program_number.to_be_bytes());
    s.push(0xE0 | ((pmt_pid >> 8) & 0x1F) as u8);
    s.push((pmt_pid & 0xFF) as u8);
    psi_packet(0, &finish_section(s))
}

/// PMT with the given (stream_type, PID) entries, CRC intact.
pub(crate) fn pmt_packet(pmt_pid: u16, streams: &[(u8, u16)]) -> Vec<u8> {
    let mut s = vec![0x02, 0x00, 0x00, 0x00, 0x01, 0xC1, 0x00, 0x00];
    s.extend_from_slice(&[0xE1, 0x00, 0xF0, 0x00]); // PCR PID 0x100
    for (stream_type, pid) in streams {
        s.push(*stream_type);
        s.push(0xE0 | ((pid >> 8) & 0x1F) as u8);
        s.push((pid & 0xFF) as u8);
        s.extend_from_slice(&[0xF0, 0x00]);
    }
    psi_packet(pmt_pid, &finish_section(s))
}

/// A bounded, single-packet PES unit with an optional PTS.
pub(crate) fn pes_packet(pid: u16, pts: Option<u64>, payload: &[u8]) -> Vec<u8> {
    let mut pes = vec![0x00, 0x00, 0x01, 0xC0];
    let header_len = if pts.is_some() { 5 } else { 0 };
    let pes_length = 3 + header_len + payload.len();
    pes.extend_from_slice(&(pes_length as u16).to_be_bytes());
    pes.push(0x80);
    pes.push(if pts.is_some() { 0x80 } else { 0x00 });
    pes.push(header_len as u8);
    if let Some(ts) = pts {
        pes.extend_from_slice(&encode_timestamp(0b0010, ts));
    }
    pes.extend_from_slice(payload);
    ts_packet(pid, true, &pes)
}
