//! PES packet reassembly.
//!
//! Each PES unit carries one elementary-stream access unit. Video PES
//! headers routinely declare a length of zero (unbounded), so those
//! units only complete when the next payload-unit-start arrives.
//! Bounded units (audio) complete as soon as the declared length is
//! buffered.

use bytes::Bytes;

use super::packet;

/// A fully reassembled elementary-stream frame.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// Presentation timestamp in 90 kHz ticks, when the PES header
    /// carried one.
    pub pts: Option<u64>,
    /// Decode timestamp in 90 kHz ticks.
    pub dts: Option<u64>,
    /// Raw elementary-stream payload (Annex-B for H.264/H.265, ADTS
    /// for AAC).
    pub data: Bytes,
}

/// Per-PID PES reassembler.
#[derive(Debug, Default)]
pub struct PesAssembler {
    buffer: Vec<u8>,
    started: bool,
}

impl PesAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one TS packet for this PID; returns any access units that
    /// completed inside it, in arrival order.
    pub fn push(&mut self, ts_packet: &[u8]) -> Vec<AccessUnit> {
        let mut completed = Vec::new();
        let Some(payload) = packet::payload(ts_packet) else {
            return completed;
        };

        if packet::payload_unit_start(ts_packet) {
            if self.started && !self.buffer.is_empty() {
                if let Some(unit) = parse_pes(&self.buffer) {
                    completed.push(unit);
                }
            }
            self.buffer.clear();
            self.buffer.extend_from_slice(payload);
            self.started = true;
        } else if self.started {
            self.buffer.extend_from_slice(payload);
        } else {
            return completed;
        }

        // Bounded PES: emit once the declared length is buffered.
        if let Some(total) = declared_total(&self.buffer) {
            if self.buffer.len() >= total {
                if let Some(unit) = parse_pes(&self.buffer[..total]) {
                    completed.push(unit);
                }
                self.buffer.clear();
                self.started = false;
            }
        }

        completed
    }
}

fn declared_total(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < 6 {
        return None;
    }
    let pes_length = u16::from_be_bytes([buffer[4], buffer[5]]) as usize;
    (pes_length > 0).then_some(6 + pes_length)
}

/// Parse a complete PES packet into an access unit.
fn parse_pes(data: &[u8]) -> Option<AccessUnit> {
    if data.len() < 9 || data[0] != 0x00 || data[1] != 0x00 || data[2] != 0x01 {
        tracing::debug!(len = data.len(), "dropping malformed PES packet");
        return None;
    }
    let stream_id = data[3];

    // Audio (0xC0..=0xDF) and video (0xE0..=0xEF) streams carry the
    // optional header with PTS/DTS flags.
    if !(0xC0..=0xEF).contains(&stream_id) {
        return None;
    }

    let pts_dts_flags = (data[7] >> 6) & 0x03;
    let header_data_length = data[8] as usize;
    let payload_start = 9 + header_data_length;
    if payload_start > data.len() {
        tracing::debug!("PES header overruns packet");
        return None;
    }

    let mut pts = None;
    let mut dts = None;
    if pts_dts_flags >= 2 && data.len() >= 14 {
        pts = Some(parse_timestamp(&data[9..14]));
    }
    if pts_dts_flags == 3 && data.len() >= 19 {
        dts = Some(parse_timestamp(&data[14..19]));
    }

    Some(AccessUnit {
        pts,
        dts,
        data: Bytes::copy_from_slice(&data[payload_start..]),
    })
}

/// 33-bit timestamp packed into 5 bytes, 90 kHz units.
fn parse_timestamp(b: &[u8]) -> u64 {
    (((b[0] as u64 >> 1) & 0x07) << 30)
        | ((b[1] as u64) << 22)
        | (((b[2] as u64) >> 1) << 15)
        | ((b[3] as u64) << 7)
        | ((b[4] as u64) >> 1)
}

/// Encode a 90 kHz timestamp into the 5-byte PES form.
/// The `marker` nibble is 0b0010 for PTS-only and 0b0011/0b0001 for
/// PTS+DTS pairs.
pub fn encode_timestamp(marker: u8, ts: u64) -> [u8; 5] {
    [
        (marker << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01,
        (ts >> 22) as u8,
        (((ts >> 15) as u8) << 1) | 0x01,
        (ts >> 7) as u8,
        ((ts as u8) << 1) | 0x01,
    ]
}
