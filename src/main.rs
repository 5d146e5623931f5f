use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use hassist::app::{ReplayInput, ReplayOptions, ReplayReport, run_replay};
use hassist::catalog::CatalogSnapshot;
use hassist::cli::{Cli, Commands, ConfigAction, ReplayArgs};
use hassist::config::Config;
use hassist::output;
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Replay(args) => {
            let config = load_config(cli.config.as_deref())?;
            handle_replay(&config, args, cli.quiet).await?;
        }
        Commands::Pipelines { catalog } => {
            let response = hassist::app::load_catalog_response(&catalog)?;
            let snapshot: CatalogSnapshot = serde_json::from_value(response)
                .with_context(|| format!("Invalid pipeline list in {}", catalog.display()))?;
            if snapshot.pipelines.is_empty() {
                eprintln!("No pipelines in {}", catalog.display());
            } else {
                println!("{}", output::format_catalog(&snapshot));
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "hassist",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over `-q`/`-v`.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "hassist=info",
        (false, _) => "hassist=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/hassist/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top of all three.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = hassist::audio::capture::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("hassist was built without microphone support (feature `cpal-audio`)")
}

async fn handle_replay(config: &Config, args: ReplayArgs, quiet: bool) -> Result<()> {
    let input = match (args.text, args.audio, args.mic) {
        (Some(text), _, _) => ReplayInput::Text(text),
        (None, Some(path), _) => ReplayInput::Wav(path),
        (None, None, true) => ReplayInput::Microphone,
        (None, None, false) => anyhow::bail!("Nothing to send: pass --text, --audio or --mic"),
    };

    let options = ReplayOptions {
        events: args.events,
        input,
        pipeline: args.pipeline,
        catalog: args.catalog,
        delay: args.delay.map(Duration::from_millis),
        playback: !args.no_playback,
        quiet,
    };
    let report = run_replay(config, options).await?;
    if !quiet {
        print_report(&report);
    }

    if let hassist::SessionState::Error(detail) = &report.snapshot.state {
        anyhow::bail!("Run failed: {}", detail);
    }
    Ok(())
}

fn print_report(report: &ReplayReport) {
    println!();
    println!("{} {}", "Pipeline:".dimmed(), report.pipeline);
    println!("{}", output::format_summary(&report.snapshot));
    if report.frames_written > 0 {
        println!(
            "{} {} frames, {} bytes, {} end-of-audio",
            "Streamed:".dimmed(),
            report.frames_written,
            report.audio_bytes,
            report.end_markers
        );
    }
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
            if !path.exists() {
                eprintln!("{}", "(file does not exist, defaults in use)".yellow());
            }
        }
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Dump => {
            print!("{}", Config::default().to_toml()?);
        }
    }
    Ok(())
}
