//! Error types for partcast-media.

use std::io;
use thiserror::Error;

/// Result type for partcast-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for partcast-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Neither `ftyp` nor `moov` was found in the first fragment.
    #[error("missing init boxes (no ftyp/moov in fragment)")]
    MissingInitBoxes,

    /// Malformed PSI section or PES header.
    #[error("invalid transport stream data: {0}")]
    InvalidStream(String),

    /// The playlist has not been rendered yet (no init segment or no
    /// segments).
    #[error("playlist not yet available")]
    NotReady,

    /// Requested part/segment is unknown or already evicted from the
    /// live window.
    #[error("no such media resource: {0}")]
    NotFound(String),
}

impl Error {
    /// Create an invalid-stream error.
    pub fn invalid_stream(msg: impl Into<String>) -> Self {
        Self::InvalidStream(msg.into())
    }
}
