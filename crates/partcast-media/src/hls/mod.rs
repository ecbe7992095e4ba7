//! Low-latency HLS playlist engine.

mod live;

pub use live::{LivePlaylist, PartEntry, PlaylistConfig, PlaylistSnapshot};
