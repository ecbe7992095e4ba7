//! Program Association Table parsing.

use crate::error::{Error, Result};

use super::section::SectionHeader;

/// One program entry from the PAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Parse a CRC-valid PAT section into its program entries.
/// Program number 0 (network PID) entries are skipped.
pub fn parse_pat(section: &[u8]) -> Result<Vec<PatEntry>> {
    let header = SectionHeader::parse(section)
        .ok_or_else(|| Error::invalid_stream("truncated PAT section"))?;
    if header.table_id != 0x00 {
        return Err(Error::invalid_stream(format!(
            "expected PAT table_id 0x00, got {:#04x}",
            header.table_id
        )));
    }

    let mut programs = Vec::new();
    let body = header.body;
    let mut idx = 0;
    while idx + 4 <= body.len() {
        let program_number = u16::from_be_bytes([body[idx], body[idx + 1]]);
        let pmt_pid = ((body[idx + 2] as u16 & 0x1F) << 8) | body[idx + 3] as u16;
        if program_number != 0 {
            programs.push(PatEntry {
                program_number,
                pmt_pid,
            });
        }
        idx += 4;
    }
    Ok(programs)
}
