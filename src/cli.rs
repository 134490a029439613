use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediabatch")]
#[command(author, version, about = "Batch media conversion through an external transcoder")]
pub struct Cli {
    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a batch of media files
    Convert {
        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output format for audio inputs (video inputs are always extracted to mp3)
        #[arg(short, long)]
        format: Option<String>,

        /// Directory results are written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Write one zip bundle instead of individual files, optionally naming it
        #[arg(long)]
        bundle: Option<Option<String>>,

        /// Maximum concurrent conversions
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Use the in-memory passthrough engine instead of ffmpeg
        #[arg(long)]
        dry_run: bool,

        /// Print the batch result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the transcoder binary is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// List supported output formats and video extensions
    Formats,

    /// Display version information
    Version,
}
