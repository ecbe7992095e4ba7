//! End-to-end pipeline test: a synthetic MPEG-TS stream goes through
//! demux, packaging, and the playlist engine, and the results are read
//! back the way an HTTP layer would.

use std::sync::Arc;
use std::time::Duration;

use crc::{Crc, CRC_32_MPEG_2};
use partcast_media::hls::PlaylistConfig;
use partcast_media::{FragmentPackager, LivePlaylist, PackagerConfig, TimestampLedger, TsDemuxer};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);
const VIDEO_PID: u16 = 256;
const PMT_PID: u16 = 0x1000;

fn ts_packet(pid: u16, pusi: bool, data: &[u8]) -> Vec<u8> {
    assert!(data.len() <= 184);
    let mut p = Vec::with_capacity(188);
    p.push(0x47);
    p.push(if pusi { 0x40 } else { 0x00 } | ((pid >> 8) & 0x1F) as u8);
    p.push((pid & 0xFF) as u8);
    let stuffing = 184 - data.len();
    if stuffing > 0 {
        p.push(0x30);
        p.push((stuffing - 1) as u8);
        if stuffing > 1 {
            p.push(0x00);
            p.extend(std::iter::repeat(0xFF).take(stuffing - 2));
        }
    } else {
        p.push(0x10);
    }
    p.extend_from_slice(data);
    p
}

fn finish_section(mut section: Vec<u8>) -> Vec<u8> {
    let section_length = section.len() - 3 + 4;
    section[1] = 0xB0 | ((section_length >> 8) & 0x0F) as u8;
    section[2] = (section_length & 0xFF) as u8;
    let crc = CRC32.checksum(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

fn psi_packet(pid: u16, section: &[u8]) -> Vec<u8> {
    let mut p = vec![0xFFu8; 188];
    p[0] = 0x47;
    p[1] = 0x40 | ((pid >> 8) & 0x1F) as u8;
    p[2] = (pid & 0xFF) as u8;
    p[3] = 0x10;
    p[4] = 0x00;
    p[5..5 + section.len()].copy_from_slice(section);
    p
}

fn pat_packet() -> Vec<u8> {
    let mut s = vec![0x00, 0x00, 0x00, 0x00, 0x01, 0xC1, 0x00, 0x00];
    s.extend_from_slice(&1u16.to_be_bytes());
    s.push(0xE0 | ((PMT_PID >> 8) & 0x1F) as u8);
    s.push((PMT_PID & 0xFF) as u8);
    psi_packet(0, &finish_section(s))
}

fn pmt_packet() -> Vec<u8> {
    let mut s = vec![0x02, 0x00, 0x00, 0x00, 0x01, 0xC1, 0x00, 0x00];
    s.extend_from_slice(&[0xE1, 0x00, 0xF0, 0x00]);
    // H.264 on the video PID.
    s.push(0x1B);
    s.push(0xE0 | ((VIDEO_PID >> 8) & 0x1F) as u8);
    s.push((VIDEO_PID & 0xFF) as u8);
    s.extend_from_slice(&[0xF0, 0x00]);
    psi_packet(PMT_PID, &finish_section(s))
}

fn encode_pts(ts: u64) -> [u8; 5] {
    [
        0b0010_0001 | (((ts >> 30) & 0x07) as u8) << 1,
        ((ts >> 22) & 0xFF) as u8,
        0x01 | (((ts >> 15) & 0x7F) as u8) << 1,
        ((ts >> 7) & 0xFF) as u8,
        0x01 | ((ts & 0x7F) as u8) << 1,
    ]
}

fn video_pes_packet(pts: u64, payload: &[u8]) -> Vec<u8> {
    let mut pes = vec![0x00, 0x00, 0x01, 0xE0];
    let pes_length = 3 + 5 + payload.len();
    pes.extend_from_slice(&(pes_length as u16).to_be_bytes());
    pes.push(0x80);
    pes.push(0x80); // PTS only
    pes.push(5);
    pes.extend_from_slice(&encode_pts(pts));
    pes.extend_from_slice(payload);
    ts_packet(VIDEO_PID, true, &pes)
}

fn annexb_frame(keyframe: bool) -> Vec<u8> {
    let mut data = Vec::new();
    if keyframe {
        for unit in [&[0x67u8, 0x42, 0xC0, 0x1E, 0xAA][..], &[0x68, 0xCE, 0x3C, 0x80]] {
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(unit);
        }
    }
    data.extend_from_slice(&[0, 0, 0, 1]);
    data.push(if keyframe { 0x65 } else { 0x41 });
    data.extend_from_slice(&[0x5A; 24]);
    data
}

/// 30 fps H.264 with a keyframe every 15 frames.
fn synthetic_stream(frames: usize) -> Vec<u8> {
    let mut stream = Vec::new();
    stream.extend_from_slice(&pat_packet());
    stream.extend_from_slice(&pmt_packet());
    for i in 0..frames {
        let frame = annexb_frame(i % 15 == 0);
        stream.extend_from_slice(&video_pes_packet(i as u64 * 3000, &frame));
    }
    stream
}

fn pipeline(dir: &std::path::Path) -> (Arc<LivePlaylist>, Arc<TimestampLedger>, FragmentPackager) {
    let playlist = Arc::new(LivePlaylist::new(PlaylistConfig {
        window_size: 5,
        target_duration: 0.5,
        part_target: 0.1,
        hold_back: 1.5,
        part_hold_back: 0.3,
        output_dir: dir.to_path_buf(),
    }));
    let ledger = Arc::new(TimestampLedger::new());
    let packager = FragmentPackager::new(
        PackagerConfig {
            part_target: 0.1,
            segment_target: 0.5,
            width: 1280,
            height: 720,
            has_audio: false,
        },
        playlist.clone(),
        ledger.clone(),
    );
    (playlist, ledger, packager)
}

#[tokio::test]
async fn ts_stream_becomes_a_servable_ll_hls_window() {
    let dir = tempfile::tempdir().unwrap();
    let (playlist, ledger, mut packager) = pipeline(dir.path());

    let stream = synthetic_stream(50);
    let mut demux = TsDemuxer::new();
    demux.run(&stream[..], &mut packager).await.unwrap();

    // Keyframes at 0, 15, 30, 45: segments close at 15, 30, 45.
    assert_eq!(playlist.total_segments(), 3);

    let init = playlist.init_segment().unwrap();
    assert_eq!(&init[4..8], b"ftyp");
    assert!(init.windows(4).any(|w| w == b"avcC"));

    let snapshot = playlist.playlist(None, Duration::ZERO).await.unwrap();
    let body = String::from_utf8(snapshot.body.to_vec()).unwrap();
    assert!(body.starts_with("#EXTM3U"));
    assert!(body.contains("#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES"));
    assert!(body.contains("#EXT-X-MAP:URI=\"init.mp4\""));
    assert!(body.contains("#EXTINF:0.500,\nsegment00001.m4s"));
    assert!(body.contains("segment00003.m4s"));
    assert!(body.contains("#EXT-X-PART:DURATION=0.100"));
    assert!(body.contains("#EXT-X-PRELOAD-HINT:TYPE=PART"));

    // The hint names the part still in flight, never one already
    // published in the window.
    let hint_uri = body
        .lines()
        .find(|l| l.starts_with("#EXT-X-PRELOAD-HINT"))
        .and_then(|l| l.split("URI=\"").nth(1))
        .map(|l| l.trim_end_matches('"'))
        .unwrap();
    assert_eq!(body.matches(hint_uri).count(), 1);

    // Segment bytes are fragments, start on a moof, and are on disk too.
    let segment = playlist.media("segment00001.m4s").unwrap();
    assert_eq!(&segment[4..8], b"moof");
    assert_eq!(
        std::fs::read(dir.path().join("segment00001.m4s")).unwrap(),
        segment
    );
    assert!(dir.path().join("playlist.m3u8").exists());

    // Production times were stamped for every closed segment and for
    // the parts inside them.
    let stamps = ledger.snapshot();
    assert_eq!(stamps.segments.len(), 3);
    assert!(stamps.segments.contains_key("segment00003.m4s"));
    assert!(stamps.parts.len() >= stamps.segments.len());
    assert!(stamps.parts.contains_key("part00001.m4s"));
}

#[tokio::test]
async fn blocking_reload_wakes_when_the_next_segment_lands() {
    let dir = tempfile::tempdir().unwrap();
    let (playlist, _ledger, mut packager) = pipeline(dir.path());

    // First burst publishes one segment.
    let mut demux = TsDemuxer::new();
    demux
        .run(&synthetic_stream(20)[..], &mut packager)
        .await
        .unwrap();
    assert_eq!(playlist.total_segments(), 1);
    let seen = playlist.playlist(None, Duration::ZERO).await.unwrap().version;

    // A reader blocks on the version it has; more input wakes it.
    let reader = playlist.clone();
    let waiter = tokio::spawn(async move {
        reader
            .playlist(Some(seen), Duration::from_secs(5))
            .await
            .unwrap()
    });

    // Continue the same timeline past the next two keyframes.
    let mut tail = Vec::new();
    for i in 20..50usize {
        let frame = annexb_frame(i % 15 == 0);
        tail.extend_from_slice(&video_pes_packet(i as u64 * 3000, &frame));
    }
    demux.run(&tail[..], &mut packager).await.unwrap();

    let snapshot = waiter.await.unwrap();
    assert!(snapshot.version > seen);
    assert!(String::from_utf8(snapshot.body.to_vec())
        .unwrap()
        .contains("segment00002.m4s"));
}

#[tokio::test]
async fn garbage_between_packets_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (playlist, _ledger, mut packager) = pipeline(dir.path());

    let mut stream = vec![0xDE, 0xAD, 0xBE, 0xEF];
    stream.extend_from_slice(&synthetic_stream(20));
    stream.extend_from_slice(&[0x12, 0x34]);

    let mut demux = TsDemuxer::new();
    demux.run(&stream[..], &mut packager).await.unwrap();
    assert_eq!(playlist.total_segments(), 1);
}
