//! MPEG-TS demultiplexing: packet framing, PSI tables, PES
//! reassembly, and the demux driver.

pub mod demux;
pub mod packet;
pub mod pat;
pub mod pes;
pub mod pmt;
pub mod section;

#[cfg(test)]
pub(crate) mod testutil;

pub use demux::{FrameSink, TsDemuxer, VideoCodec};
pub use pes::AccessUnit;
