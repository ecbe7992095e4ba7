use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "partcast")]
#[command(author, version, about = "Low-Latency HLS repackager for live MPEG-TS feeds")]
pub struct Cli {
    /// Path to config file (TOML); CLI flags override file values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Use the FFmpeg synthetic test source instead of a capture device
    #[arg(long)]
    pub test_src: bool,

    /// Read the MPEG-TS stream from stdin instead of spawning FFmpeg
    #[arg(long)]
    pub stdin: bool,

    /// Video4Linux device to capture from
    #[arg(long, default_value = "/dev/video0")]
    pub device: String,

    /// Frame size as WIDTHxHEIGHT
    #[arg(long, default_value = "1280x720")]
    pub resolution: String,

    /// Capture frame rate
    #[arg(long, default_value_t = 30)]
    pub framerate: u32,

    /// Target video bitrate in kbit/s
    #[arg(long, default_value_t = 2500)]
    pub bitrate: u32,

    /// Keyframe interval (GOP size) in frames
    #[arg(long, default_value_t = 30)]
    pub gop: u32,

    /// Target segment duration in seconds
    #[arg(long, default_value_t = 1.0)]
    pub target_duration: f64,

    /// LL-HLS part duration in seconds
    #[arg(long, default_value_t = 0.1)]
    pub part_duration: f64,

    /// Number of segments in the live window
    #[arg(long, default_value_t = 5)]
    pub window_size: usize,

    /// HTTP bind address
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Directory for playlist and media files
    #[arg(long, default_value = "./stream")]
    pub output_dir: PathBuf,
}
