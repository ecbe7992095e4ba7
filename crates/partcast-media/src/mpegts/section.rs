//! PSI section reassembly and validation.
//!
//! PAT/PMT sections may span packets; the assembler buffers payload
//! bytes per table until the declared section length is satisfied, then
//! validates the trailing CRC-32/MPEG-2. Sections that fail the check
//! are dropped without touching any PID state; retransmitted sections
//! arrive constantly on live feeds and a bad one is never fatal.

use crc::{Crc, CRC_32_MPEG_2};

use super::packet;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Running checksum over a full section (including its stored CRC)
/// leaves a zero residue when the section is intact.
pub fn crc_valid(section: &[u8]) -> bool {
    CRC32.checksum(section) == 0
}

/// Reassembles one PSI table's sections from packet payloads.
#[derive(Debug, Default)]
pub struct SectionAssembler {
    buffer: Vec<u8>,
    started: bool,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one TS packet; returns a complete, CRC-valid section when
    /// one finishes inside this packet.
    pub fn push(&mut self, ts_packet: &[u8]) -> Option<Vec<u8>> {
        let payload = packet::payload(ts_packet)?;

        if packet::payload_unit_start(ts_packet) {
            // Pointer field gives the offset of the section start
            // within this payload; anything buffered before it is an
            // abandoned partial section.
            let pointer = *payload.first()? as usize;
            if 1 + pointer >= payload.len() {
                return None;
            }
            self.buffer.clear();
            self.buffer.extend_from_slice(&payload[1 + pointer..]);
            self.started = true;
        } else if self.started {
            self.buffer.extend_from_slice(payload);
        } else {
            return None;
        }

        let total = self.declared_total()?;
        if self.buffer.len() < total {
            return None;
        }

        let section: Vec<u8> = self.buffer.drain(..total).collect();
        self.started = false;
        self.buffer.clear();

        if crc_valid(&section) {
            Some(section)
        } else {
            tracing::debug!(len = section.len(), "dropping section with bad CRC");
            None
        }
    }

    fn declared_total(&self) -> Option<usize> {
        if self.buffer.len() < 3 {
            return None;
        }
        let section_length = ((self.buffer[1] as usize & 0x0F) << 8) | self.buffer[2] as usize;
        Some(3 + section_length)
    }
}

/// Common fixed header shared by PAT and PMT sections.
#[derive(Debug)]
pub struct SectionHeader<'a> {
    pub table_id: u8,
    pub table_id_extension: u16,
    pub version: u8,
    pub current_next: bool,
    /// Section body between the fixed header and the CRC.
    pub body: &'a [u8],
}

impl<'a> SectionHeader<'a> {
    pub fn parse(section: &'a [u8]) -> Option<Self> {
        if section.len() < 12 {
            return None;
        }
        let section_length = ((section[1] as usize & 0x0F) << 8) | section[2] as usize;
        let total = 3 + section_length;
        if section.len() < total || section_length < 9 {
            return None;
        }
        Some(Self {
            table_id: section[0],
            table_id_extension: u16::from_be_bytes([section[3], section[4]]),
            version: (section[5] >> 1) & 0x1F,
            current_next: section[5] & 0x01 != 0,
            body: &section[8..total - 4],
        })
    }
}
