//! Runtime configuration: optional TOML file plus CLI flags.
//!
//! The file supplies base values; a CLI flag set to something other
//! than its built-in default wins over the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cli::Cli;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub test_src: Option<bool>,
    pub device: Option<String>,
    pub resolution: Option<String>,
    pub framerate: Option<u32>,
    pub bitrate: Option<u32>,
    pub gop: Option<u32>,
    pub has_audio: Option<bool>,
    pub target_duration: Option<f64>,
    pub part_duration: Option<f64>,
    pub window_size: Option<usize>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub test_src: bool,
    pub stdin: bool,
    pub device: String,
    pub width: u16,
    pub height: u16,
    pub framerate: u32,
    pub bitrate: u32,
    pub gop: u32,
    pub has_audio: bool,
    pub target_duration: f64,
    pub part_duration: f64,
    pub window_size: usize,
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        let resolution = pick(
            cli.resolution.clone(),
            "1280x720".to_string(),
            file.resolution,
        );
        let (width, height) = parse_resolution(&resolution)?;

        let config = Self {
            test_src: if cli.test_src {
                true
            } else {
                file.test_src.unwrap_or(false)
            },
            stdin: cli.stdin,
            device: pick(cli.device.clone(), "/dev/video0".to_string(), file.device),
            width,
            height,
            framerate: pick(cli.framerate, 30, file.framerate),
            bitrate: pick(cli.bitrate, 2500, file.bitrate),
            gop: pick(cli.gop, 30, file.gop),
            has_audio: file.has_audio.unwrap_or(true),
            target_duration: pick(cli.target_duration, 1.0, file.target_duration),
            part_duration: pick(cli.part_duration, 0.1, file.part_duration),
            window_size: pick(cli.window_size, 5, file.window_size),
            host: pick(cli.host.clone(), "0.0.0.0".to_string(), file.host),
            port: pick(cli.port, 8080, file.port),
            output_dir: pick(
                cli.output_dir.clone(),
                PathBuf::from("./stream"),
                file.output_dir,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.part_duration <= 0.0 || self.target_duration <= 0.0 {
            bail!("durations must be positive");
        }
        if self.part_duration > self.target_duration {
            bail!(
                "part duration {}s exceeds segment target {}s",
                self.part_duration,
                self.target_duration
            );
        }
        if self.window_size == 0 {
            bail!("window size must be at least 1");
        }
        Ok(())
    }

    /// HOLD-BACK advertised in the playlist: three segment targets.
    pub fn hold_back(&self) -> f64 {
        3.0 * self.target_duration
    }

    /// PART-HOLD-BACK advertised in the playlist: three part targets.
    pub fn part_hold_back(&self) -> f64 {
        3.0 * self.part_duration
    }
}

fn load_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// CLI wins when it differs from its built-in default.
fn pick<T: PartialEq>(cli: T, default: T, file: Option<T>) -> T {
    if cli != default {
        cli
    } else {
        file.unwrap_or(default)
    }
}

fn parse_resolution(s: &str) -> Result<(u16, u16)> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .with_context(|| format!("Invalid resolution {s:?}, expected WIDTHxHEIGHT"))?;
    Ok((
        w.parse().with_context(|| format!("Invalid width {w:?}"))?,
        h.parse().with_context(|| format!("Invalid height {h:?}"))?,
    ))
}
