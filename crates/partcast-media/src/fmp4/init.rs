//! CMAF initialization segment (ftyp + moov).

use bytes::{BufMut, BytesMut};

use super::adts::AudioConfig;

/// Write a size-prefixed box, fixing up the length after the body.
pub(super) fn write_box(buf: &mut BytesMut, tag: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(tag);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Video track description for the init segment.
#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub width: u16,
    pub height: u16,
    /// `avcC` payload; absent for codecs serialized without a
    /// decoder configuration record.
    pub avcc: Option<Vec<u8>>,
    /// Sample entry tag, `avc1` or `hev1`.
    pub sample_entry: [u8; 4],
}

/// Builder for the stream's init segment. Tracks are numbered in the
/// order they are added; sample timestamps use the 90 kHz timescale
/// throughout so fragment decode times carry over unscaled.
#[derive(Debug, Default)]
pub struct InitSegmentBuilder {
    video: Option<VideoTrack>,
    audio: Option<AudioConfig>,
}

pub const TIMESCALE: u32 = 90_000;

impl InitSegmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video(mut self, track: VideoTrack) -> Self {
        self.video = Some(track);
        self
    }

    pub fn audio(mut self, config: AudioConfig) -> Self {
        self.audio = Some(config);
        self
    }

    /// Track ID the video track will get, if any.
    pub fn video_track_id(&self) -> Option<u32> {
        self.video.as_ref().map(|_| 1)
    }

    /// Track ID the audio track will get, if any.
    pub fn audio_track_id(&self) -> Option<u32> {
        self.audio
            .as_ref()
            .map(|_| if self.video.is_some() { 2 } else { 1 })
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1024);
        self.write_ftyp(&mut buf);
        self.write_moov(&mut buf);
        buf.to_vec()
    }

    fn write_ftyp(&self, buf: &mut BytesMut) {
        write_box(buf, b"ftyp", |b| {
            b.put_slice(b"isom"); // major brand
            b.put_u32(0x200);
            for brand in [b"isom", b"iso5", b"cmfc", b"mp42"] {
                b.put_slice(brand);
            }
        });
    }

    fn write_moov(&self, buf: &mut BytesMut) {
        let track_count = self.video.is_some() as u32 + self.audio.is_some() as u32;
        write_box(buf, b"moov", |b| {
            self.write_mvhd(b, track_count + 1);
            let mut track_id = 1;
            if let Some(video) = &self.video {
                self.write_video_trak(b, track_id, video);
                track_id += 1;
            }
            if let Some(audio) = &self.audio {
                self.write_audio_trak(b, track_id, audio);
            }
            write_box(b, b"mvex", |b| {
                for id in 1..=track_count {
                    self.write_trex(b, id);
                }
            });
        });
    }

    fn write_mvhd(&self, buf: &mut BytesMut, next_track_id: u32) {
        write_box(buf, b"mvhd", |b| {
            b.put_u8(1); // version 1
            b.put_slice(&[0, 0, 0]);
            b.put_u64(0); // creation time
            b.put_u64(0); // modification time
            b.put_u32(TIMESCALE);
            b.put_u64(0); // duration unknown while live
            b.put_u32(0x00010000); // rate 1.0
            b.put_u16(0x0100); // volume 1.0
            b.put_u16(0);
            b.put_u64(0);
            Self::write_matrix(b);
            for _ in 0..6 {
                b.put_u32(0); // pre_defined
            }
            b.put_u32(next_track_id);
        });
    }

    fn write_matrix(buf: &mut BytesMut) {
        // Identity.
        for v in [0x00010000u32, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000] {
            buf.put_u32(v);
        }
    }

    fn write_tkhd(&self, buf: &mut BytesMut, track_id: u32, video: Option<&VideoTrack>) {
        write_box(buf, b"tkhd", |b| {
            b.put_u8(1); // version 1
            b.put_slice(&[0, 0, 7]); // enabled, in_movie, in_preview
            b.put_u64(0);
            b.put_u64(0);
            b.put_u32(track_id);
            b.put_u32(0);
            b.put_u64(0); // duration
            b.put_u64(0);
            b.put_u16(0); // layer
            b.put_u16(0); // alternate group
            b.put_u16(if video.is_some() { 0 } else { 0x0100 }); // volume
            b.put_u16(0);
            Self::write_matrix(b);
            match video {
                Some(v) => {
                    b.put_u32((v.width as u32) << 16);
                    b.put_u32((v.height as u32) << 16);
                }
                None => {
                    b.put_u32(0);
                    b.put_u32(0);
                }
            }
        });
    }

    fn write_video_trak(&self, buf: &mut BytesMut, track_id: u32, video: &VideoTrack) {
        write_box(buf, b"trak", |b| {
            self.write_tkhd(b, track_id, Some(video));
            write_box(b, b"mdia", |b| {
                self.write_mdhd(b);
                self.write_hdlr(b, b"vide", b"VideoHandler");
                write_box(b, b"minf", |b| {
                    write_box(b, b"vmhd", |b| {
                        b.put_u32(1); // version/flags
                        b.put_u64(0); // graphics mode + opcolor
                    });
                    self.write_dinf(b);
                    write_box(b, b"stbl", |b| {
                        self.write_video_stsd(b, video);
                        Self::write_empty_sample_tables(b);
                    });
                });
            });
        });
    }

    fn write_audio_trak(&self, buf: &mut BytesMut, track_id: u32, audio: &AudioConfig) {
        write_box(buf, b"trak", |b| {
            self.write_tkhd(b, track_id, None);
            write_box(b, b"mdia", |b| {
                self.write_mdhd(b);
                self.write_hdlr(b, b"soun", b"SoundHandler");
                write_box(b, b"minf", |b| {
                    write_box(b, b"smhd", |b| {
                        b.put_u32(0); // version/flags
                        b.put_u16(0); // balance
                        b.put_u16(0);
                    });
                    self.write_dinf(b);
                    write_box(b, b"stbl", |b| {
                        self.write_audio_stsd(b, audio);
                        Self::write_empty_sample_tables(b);
                    });
                });
            });
        });
    }

    fn write_mdhd(&self, buf: &mut BytesMut) {
        write_box(buf, b"mdhd", |b| {
            b.put_u8(1);
            b.put_slice(&[0, 0, 0]);
            b.put_u64(0);
            b.put_u64(0);
            b.put_u32(TIMESCALE);
            b.put_u64(0);
            b.put_u16(0x55C4); // language: und
            b.put_u16(0);
        });
    }

    fn write_hdlr(&self, buf: &mut BytesMut, handler: &[u8; 4], name: &[u8]) {
        write_box(buf, b"hdlr", |b| {
            b.put_u32(0); // version/flags
            b.put_u32(0); // pre_defined
            b.put_slice(handler);
            b.put_slice(&[0; 12]);
            b.put_slice(name);
            b.put_u8(0);
        });
    }

    fn write_dinf(&self, buf: &mut BytesMut) {
        write_box(buf, b"dinf", |b| {
            write_box(b, b"dref", |b| {
                b.put_u32(0); // version/flags
                b.put_u32(1); // entry count
                write_box(b, b"url ", |b| {
                    b.put_u32(1); // self-contained
                });
            });
        });
    }

    fn write_video_stsd(&self, buf: &mut BytesMut, video: &VideoTrack) {
        write_box(buf, b"stsd", |b| {
            b.put_u32(0); // version/flags
            b.put_u32(1); // entry count
            write_box(b, &video.sample_entry, |b| {
                b.put_slice(&[0; 6]);
                b.put_u16(1); // data reference index
                b.put_u16(0);
                b.put_u16(0);
                b.put_slice(&[0; 12]);
                b.put_u16(video.width);
                b.put_u16(video.height);
                b.put_u32(0x00480000); // 72 dpi
                b.put_u32(0x00480000);
                b.put_u32(0);
                b.put_u16(1); // frame count
                b.put_slice(&[0; 32]); // compressor name
                b.put_u16(0x0018); // depth
                b.put_i16(-1);
                if let Some(avcc) = &video.avcc {
                    write_box(b, b"avcC", |b| b.put_slice(avcc));
                }
            });
        });
    }

    fn write_audio_stsd(&self, buf: &mut BytesMut, audio: &AudioConfig) {
        write_box(buf, b"stsd", |b| {
            b.put_u32(0);
            b.put_u32(1);
            write_box(b, b"mp4a", |b| {
                b.put_slice(&[0; 6]);
                b.put_u16(1); // data reference index
                b.put_u64(0);
                b.put_u16(audio.channels());
                b.put_u16(16); // sample size
                b.put_u32(0);
                b.put_u32(audio.sample_rate() << 16);
                write_box(b, b"esds", |b| b.put_slice(&audio.esds()));
            });
        });
    }

    fn write_empty_sample_tables(buf: &mut BytesMut) {
        // Mandatory stbl children, always empty in fragmented files.
        for tag in [b"stts", b"stsc", b"stco"] {
            write_box(buf, tag, |b| {
                b.put_u32(0); // version/flags
                b.put_u32(0); // entry count
            });
        }
        write_box(buf, b"stsz", |b| {
            b.put_u32(0);
            b.put_u32(0); // sample size
            b.put_u32(0); // sample count
        });
    }

    fn write_trex(&self, buf: &mut BytesMut, track_id: u32) {
        write_box(buf, b"trex", |b| {
            b.put_u32(0); // version/flags
            b.put_u32(track_id);
            b.put_u32(1); // default sample description index
            b.put_u32(0);
            b.put_u32(0);
            b.put_u32(0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_tags(data: &[u8]) -> Vec<[u8; 4]> {
        let mut tags = Vec::new();
        let mut i = 0;
        while i + 8 <= data.len() {
            let size = u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
            tags.push([data[i + 4], data[i + 5], data[i + 6], data[i + 7]]);
            i += size as usize;
        }
        tags
    }

    fn video_track() -> VideoTrack {
        VideoTrack {
            width: 1280,
            height: 720,
            avcc: Some(vec![1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0, 0, 1, 0, 0]),
            sample_entry: *b"avc1",
        }
    }

    #[test]
    fn top_level_boxes_are_ftyp_then_moov() {
        let data = InitSegmentBuilder::new().video(video_track()).build();
        assert_eq!(box_tags(&data), vec![*b"ftyp", *b"moov"]);
    }

    #[test]
    fn track_ids_follow_declaration_order() {
        let audio = AudioConfig {
            object_type: 2,
            sampling_frequency_index: 3,
            channel_configuration: 2,
        };
        let both = InitSegmentBuilder::new().video(video_track()).audio(audio);
        assert_eq!(both.video_track_id(), Some(1));
        assert_eq!(both.audio_track_id(), Some(2));

        let audio_only = InitSegmentBuilder::new().audio(audio);
        assert_eq!(audio_only.video_track_id(), None);
        assert_eq!(audio_only.audio_track_id(), Some(1));
    }

    #[test]
    fn contains_sample_entries_and_mvex() {
        let audio = AudioConfig {
            object_type: 2,
            sampling_frequency_index: 3,
            channel_configuration: 2,
        };
        let data = InitSegmentBuilder::new()
            .video(video_track())
            .audio(audio)
            .build();
        let needle = |tag: &[u8]| data.windows(4).any(|w| w == tag);
        assert!(needle(b"avc1"));
        assert!(needle(b"avcC"));
        assert!(needle(b"mp4a"));
        assert!(needle(b"esds"));
        assert!(needle(b"mvex"));
        assert!(needle(b"trex"));
    }
}
