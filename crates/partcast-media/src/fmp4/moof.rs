//! Movie fragment (moof + mdat) serialization.

use bytes::{BufMut, BytesMut};

use super::init::write_box;

/// One sample going into a fragment run.
#[derive(Debug, Clone)]
pub struct FragmentSample {
    pub data: Vec<u8>,
    /// Duration in 90 kHz ticks.
    pub duration: u32,
    /// Composition offset (PTS - DTS) in 90 kHz ticks.
    pub cts_offset: i32,
    pub keyframe: bool,
}

/// Serialize one moof + mdat pair for a single track run.
///
/// Uses default-base-is-moof addressing, so the fragment is
/// self-contained and byte ranges can be served independently.
pub fn write_fragment(
    sequence_number: u32,
    track_id: u32,
    base_decode_time: u64,
    samples: &[FragmentSample],
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(256 + samples.iter().map(|s| s.data.len()).sum::<usize>());

    let mut data_offset_pos = 0;
    write_box(&mut buf, b"moof", |b| {
        write_box(b, b"mfhd", |b| {
            b.put_u32(0); // version/flags
            b.put_u32(sequence_number);
        });
        write_box(b, b"traf", |b| {
            write_box(b, b"tfhd", |b| {
                b.put_u32(0x020000); // default-base-is-moof
                b.put_u32(track_id);
            });
            write_box(b, b"tfdt", |b| {
                b.put_u32(0x01000000); // version 1, 64-bit time
                b.put_u64(base_decode_time);
            });
            write_box(b, b"trun", |b| {
                // data-offset, duration, size, flags, composition offset
                b.put_u32(0x000001 | 0x000100 | 0x000200 | 0x000400 | 0x000800);
                b.put_u32(samples.len() as u32);
                data_offset_pos = b.len();
                b.put_i32(0); // patched below
                for sample in samples {
                    b.put_u32(sample.duration);
                    b.put_u32(sample.data.len() as u32);
                    b.put_u32(if sample.keyframe { 0x02000000 } else { 0x01010000 });
                    b.put_i32(sample.cts_offset);
                }
            });
        });
    });

    // Sample data starts right after the 8-byte mdat header.
    let data_offset = (buf.len() + 8) as i32;
    buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

    write_box(&mut buf, b"mdat", |b| {
        for sample in samples {
            b.put_slice(&sample.data);
        }
    });

    buf.to_vec()
}
