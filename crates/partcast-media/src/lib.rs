//! Media pipeline for low-latency HLS repackaging.
//!
//! Takes an MPEG-TS byte stream from a live encoder, demultiplexes it
//! into access units, repackages them as CMAF parts and segments, and
//! maintains the blocking-reload playlist an HTTP layer serves from.

pub mod error;
pub mod fmp4;
pub mod hls;
pub mod mp4;
pub mod mpegts;
pub mod timing;

pub use error::{Error, Result};
pub use fmp4::{FragmentPackager, PackagerConfig};
pub use hls::{LivePlaylist, PlaylistConfig, PlaylistSnapshot};
pub use mpegts::{FrameSink, TsDemuxer, VideoCodec};
pub use timing::{TimestampLedger, TimestampSnapshot};
