//! Command-line interface for talkback
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk with a language model by voice
#[derive(Parser, Debug)]
#[command(name = "talkback", version, about = "Talk with a language model by voice")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Read the user's side from a WAV file instead of the microphone
    #[arg(long, short = 'i', value_name = "WAV")]
    pub input: Option<PathBuf>,

    /// Audio input device name
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device name
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Spoken once when the session starts
    #[arg(long, value_name = "TEXT")]
    pub greeting: Option<String>,

    /// Keep speaking when the user talks over the reply
    #[arg(long)]
    pub no_barge_in: bool,

    /// Give up on a stalled service after this long. Examples: 15s, 1m, 2m30s
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub turn_timeout: Option<Duration>,
}

/// Parse a duration; bare numbers are seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input and output devices
    Devices,

    /// Print the effective configuration as TOML
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

impl Cli {
    /// Default log filter for the verbosity level.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "talkback=info",
            1 => "talkback=debug",
            _ => "talkback=trace",
        }
    }
}
