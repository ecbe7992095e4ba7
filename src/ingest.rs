//! Encoder ingest: spawn FFmpeg (or read stdin) and drive the
//! demux/packaging pipeline off the MPEG-TS byte stream.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use partcast_media::{FragmentPackager, PackagerConfig, LivePlaylist, TimestampLedger, TsDemuxer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::Config;

/// FFmpeg argv for the capture-and-encode front end. Output is an
/// MPEG-TS stream on stdout: H.264 baseline with a fixed GOP so
/// segment boundaries land on keyframes, plus 48 kHz stereo AAC.
pub fn ffmpeg_args(config: &Config) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "info".into()];

    if config.test_src {
        args.extend([
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!(
                "testsrc=size={}x{}:rate={}",
                config.width, config.height, config.framerate
            ),
        ]);
        if config.has_audio {
            args.extend([
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                "sine=frequency=1000:sample_rate=48000".into(),
            ]);
        }
    } else {
        args.extend([
            "-f".into(),
            "v4l2".into(),
            "-video_size".into(),
            format!("{}x{}", config.width, config.height),
            "-framerate".into(),
            config.framerate.to_string(),
            "-i".into(),
            config.device.clone(),
        ]);
        if config.has_audio {
            // Capture devices rarely carry audio; pad with silence so
            // the manifest still declares an audio track.
            args.extend([
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                "anullsrc=r=48000:cl=stereo".into(),
            ]);
        }
    }

    args.extend([
        "-vf".into(),
        "format=yuv420p".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-profile:v".into(),
        "baseline".into(),
        "-b:v".into(),
        format!("{}k", config.bitrate),
        "-g".into(),
        config.gop.to_string(),
        "-keyint_min".into(),
        config.gop.to_string(),
        "-sc_threshold".into(),
        "0".into(),
        "-bf".into(),
        "0".into(),
    ]);
    if config.has_audio {
        args.extend([
            "-shortest".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "128k".into(),
            "-ar".into(),
            "48000".into(),
            "-ac".into(),
            "2".into(),
        ]);
    } else {
        args.push("-an".into());
    }
    args.extend(["-f".into(), "mpegts".into(), "-".into()]);
    args
}

fn packager(
    config: &Config,
    playlist: Arc<LivePlaylist>,
    ledger: Arc<TimestampLedger>,
) -> FragmentPackager {
    FragmentPackager::new(
        PackagerConfig {
            part_target: config.part_duration,
            segment_target: config.target_duration,
            width: config.width,
            height: config.height,
            has_audio: config.has_audio,
        },
        playlist,
        ledger,
    )
}

/// Run the pipeline until the encoder stream ends.
pub async fn run(
    config: Config,
    playlist: Arc<LivePlaylist>,
    ledger: Arc<TimestampLedger>,
) -> Result<()> {
    let mut demux = TsDemuxer::new();
    let mut sink = packager(&config, playlist, ledger);

    if config.stdin {
        tracing::info!("reading MPEG-TS from stdin");
        demux.run(tokio::io::stdin(), &mut sink).await?;
        return Ok(());
    }

    let args = ffmpeg_args(&config);
    tracing::info!(command = %format!("ffmpeg {}", args.join(" ")), "starting encoder");
    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to spawn ffmpeg (is it installed?)")?;

    let stdout = child
        .stdout
        .take()
        .context("ffmpeg stdout was not captured")?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "ffmpeg", "{line}");
            }
        });
    }

    demux.run(stdout, &mut sink).await?;

    let status = child.wait().await.context("Failed to reap ffmpeg")?;
    if status.success() {
        tracing::info!("encoder exited cleanly");
    } else {
        tracing::warn!(%status, "encoder exited with failure");
    }
    Ok(())
}
