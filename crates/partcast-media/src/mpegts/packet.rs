//! Transport-stream packet accessors.
//!
//! All accessors operate on a full 188-byte packet slice whose first
//! byte is the sync byte. Field layout per ISO/IEC 13818-1.

/// TS packet size in bytes.
pub const PACKET_SIZE: usize = 188;

/// Sync byte value at the start of every packet.
pub const SYNC_BYTE: u8 = 0x47;

/// PID carrying the Program Association Table.
pub const PAT_PID: u16 = 0x0000;

/// Stream type codes assigned by PMT entries.
pub const STREAM_TYPE_AAC: u8 = 0x0F;
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_H265: u8 = 0x24;

/// 13-bit packet identifier.
pub fn pid(packet: &[u8]) -> u16 {
    ((packet[1] as u16 & 0x1F) << 8) | packet[2] as u16
}

/// Payload-unit-start indicator: a PES packet or PSI section begins in
/// this packet.
pub fn payload_unit_start(packet: &[u8]) -> bool {
    packet[1] & 0x40 != 0
}

pub fn has_adaptation_field(packet: &[u8]) -> bool {
    packet[3] & 0x20 != 0
}

pub fn has_payload(packet: &[u8]) -> bool {
    packet[3] & 0x10 != 0
}

/// Whether the adaptation field carries a Program Clock Reference.
/// The field must be at least 7 bytes to hold the flags plus the
/// 6-byte PCR; shorter fields cannot contain one.
pub fn has_pcr(packet: &[u8]) -> bool {
    has_adaptation_field(packet) && packet[4] >= 7 && packet.len() > 5 && packet[5] & 0x10 != 0
}

/// PCR value in 27 MHz ticks (33-bit base * 300 + 9-bit extension).
pub fn pcr(packet: &[u8]) -> Option<u64> {
    if !has_pcr(packet) || packet.len() < 12 {
        return None;
    }
    let b = &packet[6..12];
    let base = ((b[0] as u64) << 25)
        | ((b[1] as u64) << 17)
        | ((b[2] as u64) << 9)
        | ((b[3] as u64) << 1)
        | ((b[4] as u64) >> 7);
    let ext = (((b[4] as u64) & 0x01) << 8) | b[5] as u64;
    Some(base * 300 + ext)
}

/// Byte offset of the packet payload, past any adaptation field.
/// Returns `None` when the packet carries no payload.
pub fn payload_offset(packet: &[u8]) -> Option<usize> {
    if !has_payload(packet) {
        return None;
    }
    let offset = if has_adaptation_field(packet) {
        4 + 1 + packet[4] as usize
    } else {
        4
    };
    (offset < PACKET_SIZE).then_some(offset)
}

/// The packet payload slice, if any.
pub fn payload(packet: &[u8]) -> Option<&[u8]> {
    payload_offset(packet).map(|o| &packet[o..])
}
