//! ISO-BMFF top-level box scanning.
//!
//! The packager writes `ftyp`+`moov` at the head of the first CMAF
//! fragment; this module splits those boxes back out as the stream's
//! initialization segment.

use crate::error::{Error, Result};

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of scanning a fragment for init boxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitExtraction {
    /// Both `ftyp` and `moov` were found; bytes are a complete init
    /// segment.
    Complete(Vec<u8>),
    /// Only one of the two boxes was found. Usable, but players may
    /// reject it.
    Partial(Vec<u8>),
}

impl InitExtraction {
    /// The extracted bytes, complete or not.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Complete(b) | Self::Partial(b) => b,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Scan top-level boxes and accumulate the raw `ftyp` and `moov` bytes.
///
/// Each box starts with a 4-byte big-endian size and a 4-byte type tag.
/// A size of 0 means the box runs to the end of the buffer and ends the
/// scan; a size below 8 is malformed and also ends the scan. The scan
/// stops early once both init boxes have been seen.
pub fn extract_init_segment(data: &[u8]) -> Result<InitExtraction> {
    let mut init = Vec::new();
    let mut offset = 0usize;
    let mut found_ftyp = false;
    let mut found_moov = false;

    while offset + 8 <= data.len() {
        let size = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let box_type = BoxType([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]);

        if size == 0 {
            // Box extends to end of buffer.
            break;
        }
        if size < 8 {
            tracing::debug!(offset, size, "malformed box size, stopping scan");
            break;
        }

        let end = offset.saturating_add(size).min(data.len());
        match box_type {
            BoxType::FTYP => {
                init.extend_from_slice(&data[offset..end]);
                found_ftyp = true;
            }
            BoxType::MOOV => {
                init.extend_from_slice(&data[offset..end]);
                found_moov = true;
            }
            _ => {}
        }

        offset += size;
        if found_ftyp && found_moov {
            break;
        }
    }

    match (found_ftyp, found_moov) {
        (true, true) => Ok(InitExtraction::Complete(init)),
        (false, false) => Err(Error::MissingInitBoxes),
        (ftyp, _) => {
            tracing::warn!(
                found = if ftyp { "ftyp" } else { "moov" },
                "only one init box found, init segment may be incomplete"
            );
            Ok(InitExtraction::Partial(init))
        }
    }
}
