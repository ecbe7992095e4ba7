//! Program Map Table parsing.

use crate::error::{Error, Result};

use super::section::SectionHeader;

/// One elementary-stream entry from the PMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub elementary_pid: u16,
}

/// Parsed PMT section.
#[derive(Debug, Clone)]
pub struct PmtSection {
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

/// Parse a CRC-valid PMT section.
pub fn parse_pmt(section: &[u8]) -> Result<PmtSection> {
    let header = SectionHeader::parse(section)
        .ok_or_else(|| Error::invalid_stream("truncated PMT section"))?;
    if header.table_id != 0x02 {
        return Err(Error::invalid_stream(format!(
            "expected PMT table_id 0x02, got {:#04x}",
            header.table_id
        )));
    }

    let b = header.body;
    if b.len() < 4 {
        return Err(Error::invalid_stream("PMT body too short"));
    }
    let pcr_pid = ((b[0] as u16 & 0x1F) << 8) | b[1] as u16;
    let program_info_length = ((b[2] as usize & 0x0F) << 8) | b[3] as usize;
    let mut idx = 4 + program_info_length;

    let mut streams = Vec::new();
    while idx + 5 <= b.len() {
        let stream_type = b[idx];
        let elementary_pid = ((b[idx + 1] as u16 & 0x1F) << 8) | b[idx + 2] as u16;
        let es_info_length = ((b[idx + 3] as usize & 0x0F) << 8) | b[idx + 4] as usize;
        streams.push(PmtStream {
            stream_type,
            elementary_pid,
        });
        idx += 5 + es_info_length;
    }

    Ok(PmtSection { pcr_pid, streams })
}
