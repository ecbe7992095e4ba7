//! CMAF fragment serialization and packaging.
//!
//! - Init segment (ftyp + moov with track configuration)
//! - Movie fragments (moof + mdat per run of samples)
//! - The packager that turns access units into parts and segments

pub mod adts;
pub mod avc;
pub mod init;
pub mod moof;
pub mod packager;

pub use init::{InitSegmentBuilder, VideoTrack, TIMESCALE};
pub use moof::{write_fragment, FragmentSample};
pub use packager::{FragmentPackager, PackagerConfig};
