//! Access-unit to CMAF part/segment packaging.
//!
//! Consumes the demuxer's output and groups fragments into parts and
//! parts into segments, submitting each to the playlist engine as it
//! closes. Parts close when the part target elapses at an access-unit
//! boundary; segments close only when the next video sample is a
//! keyframe, so every segment starts on an independent frame.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;

use crate::error::Result;
use crate::hls::{LivePlaylist, PartEntry};
use crate::mp4::extract_init_segment;
use crate::mpegts::{AccessUnit, FrameSink, VideoCodec};
use crate::timing::{part_file_name, segment_file_name, TimestampLedger};

use super::adts::{self, AudioConfig};
use super::avc::{build_video_sample, ParameterSets, VideoSample};
use super::init::{InitSegmentBuilder, VideoTrack, TIMESCALE};
use super::moof::{write_fragment, FragmentSample};

/// Fallback video sample duration (30 fps) until a measured
/// DTS delta is available.
const DEFAULT_VIDEO_DURATION: u64 = 3000;

#[derive(Debug, Clone)]
pub struct PackagerConfig {
    /// Part target duration in seconds.
    pub part_target: f64,
    /// Segment target duration in seconds.
    pub segment_target: f64,
    pub width: u16,
    pub height: u16,
    /// Whether the ingest is expected to carry an AAC track.
    pub has_audio: bool,
}

struct PendingVideo {
    sample: VideoSample,
    dts: u64,
    cts_offset: i32,
}

/// Packages demuxed access units into CMAF parts and segments.
pub struct FragmentPackager {
    config: PackagerConfig,
    playlist: Arc<LivePlaylist>,
    ledger: Arc<TimestampLedger>,

    codec: Option<VideoCodec>,
    params: ParameterSets,
    audio_config: Option<AudioConfig>,
    last_pcr_90k: Option<u64>,

    // One-sample lookahead so video durations come from DTS deltas.
    pending_video: Option<PendingVideo>,
    video_duration: u64,
    video_origin: Option<u64>,
    audio_origin: Option<u64>,
    audio_dts: u64,

    fragment_seq: u32,
    part_buf: BytesMut,
    part_ticks: u64,
    part_independent: bool,
    next_part_index: u64,
    segment_buf: BytesMut,
    segment_ticks: u64,

    init_published: bool,
    hevc_warned: bool,
}

impl FragmentPackager {
    pub fn new(
        config: PackagerConfig,
        playlist: Arc<LivePlaylist>,
        ledger: Arc<TimestampLedger>,
    ) -> Self {
        Self {
            config,
            playlist,
            ledger,
            codec: None,
            params: ParameterSets::default(),
            audio_config: None,
            last_pcr_90k: None,
            pending_video: None,
            video_duration: DEFAULT_VIDEO_DURATION,
            video_origin: None,
            audio_origin: None,
            audio_dts: 0,
            fragment_seq: 0,
            part_buf: BytesMut::new(),
            part_ticks: 0,
            part_independent: false,
            next_part_index: 1,
            segment_buf: BytesMut::new(),
            segment_ticks: 0,
            init_published: false,
            hevc_warned: false,
        }
    }

    fn part_target_ticks(&self) -> u64 {
        (self.config.part_target * TIMESCALE as f64) as u64
    }

    fn segment_target_ticks(&self) -> u64 {
        (self.config.segment_target * TIMESCALE as f64) as u64
    }

    /// Best available 90 kHz timestamp for a unit: PES DTS, then PES
    /// PTS, then the latest PCR.
    fn unit_timestamp(&self, unit: &AccessUnit) -> Option<u64> {
        unit.dts.or(unit.pts).or(self.last_pcr_90k)
    }

    fn video_track_id(&self) -> u32 {
        1
    }

    fn audio_track_id(&self) -> u32 {
        if self.codec.is_some() { 2 } else { 1 }
    }

    /// Only video fragments may mark a part independent: audio samples
    /// are all sync samples, so an audio fragment opening a part says
    /// nothing about whether the part's video starts on a keyframe.
    fn append_fragment(
        &mut self,
        track_id: u32,
        base_decode_time: u64,
        samples: &[FragmentSample],
        marks_independent: bool,
    ) {
        if marks_independent && self.part_buf.is_empty() && samples.iter().any(|s| s.keyframe) {
            self.part_independent = true;
        }
        self.fragment_seq += 1;
        let fragment = write_fragment(self.fragment_seq, track_id, base_decode_time, samples);
        self.part_buf.put_slice(&fragment);
    }

    fn flush_pending_video(&mut self, duration: u64) {
        let Some(pending) = self.pending_video.take() else {
            return;
        };
        let origin = *self.video_origin.get_or_insert(pending.dts);
        let base = pending.dts.saturating_sub(origin);
        let sample = FragmentSample {
            data: pending.sample.data,
            duration: duration as u32,
            cts_offset: pending.cts_offset,
            keyframe: pending.sample.keyframe,
        };
        self.append_fragment(self.video_track_id(), base, &[sample], true);
        self.part_ticks += duration;
    }

    /// Build ftyp + moov from everything learned about the stream,
    /// then run the box scan over it joined with the first part so
    /// the published init segment is exactly what the scan recovers.
    fn publish_init(&mut self) -> Result<()> {
        let mut builder = InitSegmentBuilder::new();
        if let Some(codec) = self.codec {
            let (sample_entry, avcc) = match codec {
                VideoCodec::H264 => (*b"avc1", self.params.avc_decoder_configuration()),
                VideoCodec::H265 => {
                    if !self.hevc_warned {
                        tracing::warn!(
                            "H.265 stream has no decoder configuration record, \
                             players may reject the init segment"
                        );
                        self.hevc_warned = true;
                    }
                    (*b"hev1", None)
                }
            };
            builder = builder.video(VideoTrack {
                width: self.config.width,
                height: self.config.height,
                avcc,
                sample_entry,
            });
        }
        if let Some(audio) = self.audio_config {
            builder = builder.audio(audio);
        }
        let header = builder.build();

        let mut combined = BytesMut::with_capacity(header.len() + self.part_buf.len());
        combined.put_slice(&header);
        combined.put_slice(&self.part_buf);

        let init = match extract_init_segment(&combined) {
            Ok(extraction) => {
                if !extraction.is_complete() {
                    tracing::warn!("recovered a partial init segment");
                }
                extraction.into_bytes()
            }
            Err(e) => {
                tracing::warn!(error = %e, "falling back to the whole first fragment as init");
                combined.to_vec()
            }
        };
        if let Err(e) = self.playlist.set_init_segment(Bytes::from(init)) {
            tracing::warn!(error = %e, "init segment persistence failed");
        }
        self.init_published = true;
        Ok(())
    }

    fn close_part(&mut self) -> Result<()> {
        if self.part_buf.is_empty() {
            return Ok(());
        }
        if !self.init_published {
            self.publish_init()?;
        }
        let data = self.part_buf.split().freeze();
        let entry = PartEntry {
            name: part_file_name(self.next_part_index),
            duration: self.part_ticks as f64 / TIMESCALE as f64,
            independent: self.part_independent,
        };
        self.next_part_index += 1;
        self.segment_buf.put_slice(&data);
        self.segment_ticks += self.part_ticks;
        self.part_ticks = 0;
        self.part_independent = false;
        let hint = Some(part_file_name(self.next_part_index));
        if let Err(e) = self.playlist.add_part(entry, data, hint) {
            tracing::warn!(error = %e, "part persistence failed");
        }
        self.ledger.observe_parts(self.next_part_index - 1);
        Ok(())
    }

    fn close_segment(&mut self) -> Result<()> {
        self.close_part()?;
        if self.segment_buf.is_empty() {
            return Ok(());
        }
        let name = segment_file_name(self.playlist.total_segments() + 1);
        let duration = self.segment_ticks as f64 / TIMESCALE as f64;
        let data = self.segment_buf.split().freeze();
        self.segment_ticks = 0;
        if let Err(e) = self.playlist.add_segment(
            &name,
            duration,
            Utc::now(),
            Some(part_file_name(self.next_part_index)),
            data,
        ) {
            tracing::warn!(error = %e, "segment persistence failed");
        }
        self.ledger.observe(self.playlist.total_segments());
        Ok(())
    }

    /// Close boundaries reached at this access-unit boundary. The
    /// segment check runs only when the incoming video sample is a
    /// keyframe; the part check is duration-only.
    fn check_boundaries(&mut self, incoming_keyframe: bool) -> Result<()> {
        if incoming_keyframe && self.segment_ticks + self.part_ticks >= self.segment_target_ticks()
        {
            self.close_segment()
        } else if self.part_ticks >= self.part_target_ticks() {
            self.close_part()
        } else {
            Ok(())
        }
    }
}

impl FrameSink for FragmentPackager {
    fn on_pcr(&mut self, pcr: u64) -> Result<()> {
        self.last_pcr_90k = Some(pcr / 300);
        Ok(())
    }

    fn on_video_codec(&mut self, codec: VideoCodec) -> Result<()> {
        self.codec = Some(codec);
        Ok(())
    }

    fn on_video_access_unit(&mut self, unit: AccessUnit) -> Result<()> {
        let codec = self.codec.unwrap_or(VideoCodec::H264);
        let Some(dts) = self.unit_timestamp(&unit) else {
            tracing::debug!("dropping video unit with no usable timestamp");
            return Ok(());
        };
        let sample = build_video_sample(codec, &unit.data, &mut self.params);
        if sample.data.is_empty() {
            return Ok(());
        }
        let cts_offset = match (unit.pts, unit.dts) {
            (Some(pts), Some(d)) => pts.wrapping_sub(d) as i32,
            _ => 0,
        };

        if let Some(pending) = &self.pending_video {
            let delta = dts.saturating_sub(pending.dts);
            if delta > 0 && delta < TIMESCALE as u64 {
                self.video_duration = delta;
            }
            let duration = self.video_duration;
            self.flush_pending_video(duration);
            self.check_boundaries(sample.keyframe)?;
        }
        self.pending_video = Some(PendingVideo {
            sample,
            dts,
            cts_offset,
        });
        Ok(())
    }

    fn on_audio_access_unit(&mut self, unit: AccessUnit) -> Result<()> {
        if !self.config.has_audio {
            return Ok(());
        }
        let frames = adts::split_frames(&unit.data);
        let Some(first) = frames.first() else {
            return Ok(());
        };
        let config = first.config;
        if self.audio_config.is_none() {
            tracing::info!(
                sample_rate = config.sample_rate(),
                channels = config.channels(),
                "audio configuration locked"
            );
            self.audio_config = Some(config);
        }
        let duration = config.frame_duration();

        if let Some(ts) = self.unit_timestamp(&unit) {
            self.audio_dts = ts;
        }
        let origin = *self.audio_origin.get_or_insert(self.audio_dts);
        let base = self.audio_dts.saturating_sub(origin);

        let samples: Vec<FragmentSample> = frames
            .iter()
            .map(|frame| FragmentSample {
                data: frame.payload.to_vec(),
                duration: duration as u32,
                cts_offset: 0,
                keyframe: true,
            })
            .collect();
        self.audio_dts += duration * samples.len() as u64;
        let audio_alone = self.codec.is_none();
        self.append_fragment(self.audio_track_id(), base, &samples, audio_alone);

        // Audio drives the boundaries only when there is no video.
        if self.codec.is_none() {
            self.part_ticks += duration * samples.len() as u64;
            self.check_boundaries(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::PlaylistConfig;
    use std::time::Duration;

    const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xAA];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

    fn annexb_frame(keyframe: bool, filler: usize) -> Bytes {
        let mut data = Vec::new();
        if keyframe {
            for unit in [SPS, PPS] {
                data.extend_from_slice(&[0, 0, 0, 1]);
                data.extend_from_slice(unit);
            }
        }
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.push(if keyframe { 0x65 } else { 0x41 });
        data.extend(std::iter::repeat(0x5A).take(filler));
        Bytes::from(data)
    }

    fn packager(dir: &std::path::Path) -> (FragmentPackager, Arc<LivePlaylist>) {
        let playlist = Arc::new(LivePlaylist::new(PlaylistConfig {
            window_size: 5,
            target_duration: 1.0,
            part_target: 0.1,
            hold_back: 3.0,
            part_hold_back: 0.3,
            output_dir: dir.to_path_buf(),
        }));
        let packager = FragmentPackager::new(
            PackagerConfig {
                part_target: 0.1,
                segment_target: 1.0,
                width: 1280,
                height: 720,
                has_audio: false,
            },
            playlist.clone(),
            Arc::new(TimestampLedger::new()),
        );
        (packager, playlist)
    }

    fn feed_video(packager: &mut FragmentPackager, frames: usize, gop: usize) {
        packager.on_video_codec(VideoCodec::H264).unwrap();
        for i in 0..frames {
            let unit = AccessUnit {
                pts: Some(i as u64 * 3000),
                dts: Some(i as u64 * 3000),
                data: annexb_frame(i % gop == 0, 32),
            };
            packager.on_video_access_unit(unit).unwrap();
        }
    }

    #[tokio::test]
    async fn one_second_gops_become_segments() {
        let dir = tempfile::tempdir().unwrap();
        let (mut packager, playlist) = packager(dir.path());

        // 30 fps, keyframe every 30 frames: 3 GOPs and a bit.
        feed_video(&mut packager, 95, 30);

        assert_eq!(playlist.total_segments(), 3);
        let body = String::from_utf8(
            playlist
                .playlist(None, Duration::ZERO)
                .await
                .unwrap()
                .body
                .to_vec(),
        )
        .unwrap();
        assert!(body.contains("segment00001.m4s"));
        assert!(body.contains("segment00003.m4s"));
        assert!(body.contains("#EXT-X-PRELOAD-HINT:TYPE=PART"));
        assert!(body.contains("INDEPENDENT=YES"));
    }

    #[tokio::test]
    async fn init_segment_is_ftyp_and_moov_only() {
        let dir = tempfile::tempdir().unwrap();
        let (mut packager, playlist) = packager(dir.path());
        feed_video(&mut packager, 40, 30);

        let init = playlist.init_segment().unwrap();
        assert_eq!(&init[4..8], b"ftyp");
        assert!(init.windows(4).any(|w| w == b"moov"));
        assert!(init.windows(4).any(|w| w == b"avcC"));
        assert!(!init.windows(4).any(|w| w == b"moof"));
    }

    #[tokio::test]
    async fn parts_close_on_part_target() {
        let dir = tempfile::tempdir().unwrap();
        let (mut packager, playlist) = packager(dir.path());
        // 0.1s part target at 30 fps: a part every 3 frames.
        feed_video(&mut packager, 10, 30);

        assert!(playlist.media("part00001.m4s").is_some());
        assert!(playlist.media("part00002.m4s").is_some());
        let part = playlist.media("part00001.m4s").unwrap();
        assert_eq!(&part[4..8], b"moof");
    }

    #[tokio::test]
    async fn segments_wait_for_a_keyframe() {
        let dir = tempfile::tempdir().unwrap();
        let (mut packager, playlist) = packager(dir.path());
        // Keyframe only every 60 frames: segments close at 2 s, not 1 s.
        feed_video(&mut packager, 125, 60);

        assert_eq!(playlist.total_segments(), 2);
        let body = String::from_utf8(
            playlist
                .playlist(None, Duration::ZERO)
                .await
                .unwrap()
                .body
                .to_vec(),
        )
        .unwrap();
        assert!(body.contains("#EXTINF:2.000,"));
    }

    fn adts_unit(pts: u64) -> AccessUnit {
        // 48 kHz stereo, one 16-byte raw frame.
        let frame_len: usize = 7 + 16;
        let mut data = vec![
            0xFFu8,
            0xF1,
            (0x01 << 6) | (0x03 << 2),
            (0x02 << 6) | ((frame_len >> 11) & 0x03) as u8,
            ((frame_len >> 3) & 0xFF) as u8,
            (((frame_len & 0x07) << 5) | 0x1F) as u8,
            0xFC,
        ];
        data.extend_from_slice(&[0x33; 16]);
        AccessUnit {
            pts: Some(pts),
            dts: None,
            data: Bytes::from(data),
        }
    }

    #[tokio::test]
    async fn audio_opening_a_part_does_not_mark_it_independent() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = Arc::new(LivePlaylist::new(PlaylistConfig {
            window_size: 5,
            target_duration: 1.0,
            part_target: 0.1,
            hold_back: 3.0,
            part_hold_back: 0.3,
            output_dir: dir.path().to_path_buf(),
        }));
        let mut packager = FragmentPackager::new(
            PackagerConfig {
                part_target: 0.1,
                segment_target: 1.0,
                width: 1280,
                height: 720,
                has_audio: true,
            },
            playlist.clone(),
            Arc::new(TimestampLedger::new()),
        );

        packager.on_video_codec(VideoCodec::H264).unwrap();
        let frame = |i: usize| AccessUnit {
            pts: Some(i as u64 * 3000),
            dts: Some(i as u64 * 3000),
            data: annexb_frame(i % 30 == 0, 32),
        };
        // Part 1 closes with frames 0..2 when frame 3 arrives.
        for i in 0..4 {
            packager.on_video_access_unit(frame(i)).unwrap();
        }
        // Part 2 opens with an audio fragment, then mid-GOP video only.
        packager.on_audio_access_unit(adts_unit(9000)).unwrap();
        for i in 4..32 {
            packager.on_video_access_unit(frame(i)).unwrap();
        }

        assert_eq!(playlist.total_segments(), 1);
        let body = String::from_utf8(
            playlist
                .playlist(None, Duration::ZERO)
                .await
                .unwrap()
                .body
                .to_vec(),
        )
        .unwrap();
        assert!(body.contains("URI=\"part00001.m4s\",INDEPENDENT=YES"));
        assert!(body.contains("URI=\"part00002.m4s\""));
        assert!(!body.contains("URI=\"part00002.m4s\",INDEPENDENT"));
    }

    #[tokio::test]
    async fn audio_only_stream_packages_from_adts() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = Arc::new(LivePlaylist::new(PlaylistConfig {
            window_size: 5,
            target_duration: 1.0,
            part_target: 0.2,
            hold_back: 3.0,
            part_hold_back: 0.6,
            output_dir: dir.path().to_path_buf(),
        }));
        let mut packager = FragmentPackager::new(
            PackagerConfig {
                part_target: 0.2,
                segment_target: 1.0,
                width: 0,
                height: 0,
                has_audio: true,
            },
            playlist.clone(),
            Arc::new(TimestampLedger::new()),
        );

        // 48 kHz AAC: one frame is 1024 samples = 1920 ticks, so 50
        // frames are ~1.06 s of audio.
        for i in 0..50u64 {
            packager.on_audio_access_unit(adts_unit(i * 1920)).unwrap();
        }

        assert_eq!(playlist.total_segments(), 1);
        let init = playlist.init_segment().unwrap();
        assert!(init.windows(4).any(|w| w == b"mp4a"));
        assert!(!init.windows(4).any(|w| w == b"avc1"));
    }
}
