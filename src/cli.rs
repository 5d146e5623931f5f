//! Command-line interface for hassist
//!
//! Provides argument parsing using clap derive macros.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Voice-assistant pipeline client for Home Assistant
#[derive(Parser, Debug)]
#[command(
    name = "hassist",
    version,
    about = "Voice-assistant pipeline client for Home Assistant"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: transitions, -vv: every event)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input devices
    Devices,

    /// Replay recorded server events through a pipeline session
    Replay(ReplayArgs),

    /// List pipelines from a saved catalog response
    Pipelines {
        /// JSON file holding a pipeline list response
        catalog: PathBuf,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Arguments of `hassist replay`
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON Lines file with one server event per line
    #[arg(value_name = "EVENTS")]
    pub events: PathBuf,

    /// Run with typed text instead of audio
    #[arg(long, value_name = "TEXT", conflicts_with_all = ["audio", "mic"])]
    pub text: Option<String>,

    /// WAV file streamed as microphone input
    #[arg(long, value_name = "FILE", conflicts_with = "mic")]
    pub audio: Option<PathBuf>,

    /// Stream the configured microphone
    #[arg(long)]
    pub mic: bool,

    /// Pipeline id or name (default: from config, then the catalog's preferred)
    #[arg(long, value_name = "PIPELINE")]
    pub pipeline: Option<String>,

    /// JSON file holding a pipeline list response
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Delay between replayed events in milliseconds
    #[arg(long, value_name = "MS")]
    pub delay: Option<u64>,

    /// Do not play the response audio
    #[arg(long)]
    pub no_playback: bool,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file, defaults and environment)
    Show,
    /// Print the configuration file path
    Path,
    /// Dump the default configuration as TOML
    Dump,
}
