use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stamscan", about = "Stamina bar empty-event detector for gameplay videos")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Analyze a recorded video file and print a timestamp per empty event.
    Analyze {
        /// Path to the input video file (MP4, etc.).
        #[arg(short, long)]
        input: PathBuf,

        /// Path to write the length-delimited protobuf report.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// TOML file overriding analyzer tuning.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Frames used to locate the bar (default: 10% of the video, 100 to 1500).
        #[arg(short, long)]
        training_frames: Option<u32>,

        /// Frames to skip before training, e.g. intros and loading screens.
        #[arg(short, long, default_value_t = 0)]
        skip_frames: u32,

        /// Directory to save debug frames with candidate and bar overlays.
        #[arg(long)]
        debug_frames: Option<PathBuf>,

        /// Font used to label debug frames.
        #[arg(long, requires = "debug_frames")]
        debug_font: Option<PathBuf>,
    },

    /// Process one chunk request from stdin (spawned by `analyze`).
    #[command(hide = true)]
    Worker,
}
