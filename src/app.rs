//! Replay entry point.
//!
//! Wires a [`ReplayTransport`] to a [`PipelineSession`] with real or file
//! backed audio devices, renders the transcript as it grows and waits for the
//! run and its spoken response to finish.

use crate::audio::AudioBridge;
use crate::audio::device::{AudioCapture, AudioPlayback, NullCapture, NullPlayback};
use crate::audio::player::CommandPlayer;
use crate::audio::wav::WavCapture;
use crate::catalog::{CatalogSnapshot, PipelineCatalog};
use crate::config::Config;
use crate::error::{HassistError, Result};
use crate::output;
use crate::session::{PipelineSession, SessionSnapshot, StartOutcome};
use crate::transcript::{ChatEntry, Transcript};
use crate::transport::replay::ReplayTransport;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What a replay feeds into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayInput {
    Text(String),
    Wav(PathBuf),
    Microphone,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub events: PathBuf,
    pub input: ReplayInput,
    /// Overrides `assist.pipeline` from the config.
    pub pipeline: Option<String>,
    pub catalog: Option<PathBuf>,
    pub delay: Option<Duration>,
    pub playback: bool,
    pub quiet: bool,
}

/// Outcome of a finished replay.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub pipeline: String,
    pub snapshot: SessionSnapshot,
    pub transcript: Vec<ChatEntry>,
    /// Audio frames the session wrote, end-of-audio markers included.
    pub frames_written: usize,
    pub audio_bytes: usize,
    pub end_markers: usize,
}

/// Read a saved pipeline list response.
pub fn load_catalog_response(path: &Path) -> Result<serde_json::Value> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| HassistError::Replay {
        message: format!("{}: {}", path.display(), e),
    })
}

/// Decide which pipeline a run targets.
///
/// An explicit choice is resolved against the catalog by id or name and
/// used verbatim when the catalog does not know it. Without one the
/// catalog's preferred pipeline is used.
pub fn select_pipeline(explicit: Option<&str>, catalog: &CatalogSnapshot) -> Result<String> {
    match explicit {
        Some(wanted) => Ok(catalog
            .resolve(wanted)
            .map(|p| p.id.clone())
            .unwrap_or_else(|| wanted.to_string())),
        None => catalog
            .preferred()
            .map(|p| p.id.clone())
            .ok_or(HassistError::NoPipeline),
    }
}

fn open_capture(input: &ReplayInput, config: &Config) -> Result<Box<dyn AudioCapture>> {
    match input {
        ReplayInput::Text(_) => Ok(Box::new(NullCapture)),
        ReplayInput::Wav(path) => Ok(Box::new(WavCapture::open(path)?)),
        ReplayInput::Microphone => open_microphone(config),
    }
}

#[cfg(feature = "cpal-audio")]
fn open_microphone(config: &Config) -> Result<Box<dyn AudioCapture>> {
    match crate::audio::capture::CpalCapture::new(config.audio.device.as_deref()) {
        Ok(capture) => Ok(Box::new(capture)),
        Err(e) => {
            // The session reports the missing microphone in the transcript.
            tracing::warn!(error = %e, "failed to open microphone");
            Ok(Box::new(NullCapture))
        }
    }
}

#[cfg(not(feature = "cpal-audio"))]
fn open_microphone(_config: &Config) -> Result<Box<dyn AudioCapture>> {
    tracing::warn!("built without microphone support");
    Ok(Box::new(NullCapture))
}

fn open_playback(enabled: bool, config: &Config) -> Box<dyn AudioPlayback> {
    if enabled {
        Box::new(CommandPlayer::new(
            config.audio.player.clone(),
            config.audio.player_args.clone(),
        ))
    } else {
        Box::new(NullPlayback::default())
    }
}

/// Replay a recorded run through a fresh session and report how it ended.
pub async fn run_replay(config: &Config, options: ReplayOptions) -> Result<ReplayReport> {
    let mut transport = ReplayTransport::load(&options.events)?;
    if let Some(path) = &options.catalog {
        transport = transport.with_catalog(load_catalog_response(path)?);
    }
    if let Some(delay) = options.delay {
        transport = transport.with_delay(delay);
    }
    let transport = Arc::new(transport);
    tracing::info!(
        events = transport.event_count(),
        file = %options.events.display(),
        "loaded recording"
    );

    let catalog = PipelineCatalog::new(transport.clone());
    if options.catalog.is_some()
        && let Err(e) = catalog.fetch().await
    {
        tracing::warn!(error = %e, "pipeline catalog unavailable");
    }
    let explicit = options.pipeline.as_deref().or(config.assist.pipeline.as_deref());
    let pipeline = select_pipeline(explicit, &catalog.snapshot())?;

    let bridge = AudioBridge::new(
        open_capture(&options.input, config)?,
        open_playback(options.playback, config),
    );

    let (entry_tx, entry_rx) = crossbeam_channel::unbounded();
    let transcript = Transcript::with_listener(entry_tx);
    let quiet = options.quiet;
    let color = std::io::stdout().is_terminal();
    let renderer = std::thread::Builder::new()
        .name("transcript-renderer".to_string())
        .spawn(move || {
            for entry in entry_rx.iter() {
                if !quiet {
                    output::render_entry(&entry, color);
                }
            }
        })?;

    let session = PipelineSession::new(
        transport.clone(),
        bridge,
        transcript.clone(),
        config.server.url.clone(),
    );

    let started = match &options.input {
        ReplayInput::Text(text) => session
            .start_text(&pipeline, config.end_stage(), text)
            .await
            .map(|_| true),
        ReplayInput::Wav(_) | ReplayInput::Microphone => session
            .start_audio(&pipeline, config.end_stage(), config.audio.sample_rate)
            .await
            .map(|outcome| match outcome {
                StartOutcome::Started { sample_rate } => {
                    tracing::info!(sample_rate, pipeline = %pipeline, "streaming audio");
                    true
                }
                StartOutcome::CaptureUnavailable(_) => false,
            }),
    };

    // A failed subscribe has already moved the session to its error state.
    if let Err(e) = &started {
        tracing::error!(error = %e, "run did not start");
    }
    if matches!(started, Ok(true)) {
        tokio::select! {
            state = session.settled() => {
                tracing::info!(state = state.name(), "run settled");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                session.cancel();
            }
        }
    }

    // Dropping the session kills the player, so let the response finish.
    if session.is_playing() {
        tracing::info!("waiting for response playback");
        tokio::select! {
            _ = session.playback_finished() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                session.stop_playback();
            }
        }
    }

    let report = ReplayReport {
        pipeline,
        snapshot: session.snapshot(),
        transcript: transcript.all(),
        frames_written: transport.frames_received(),
        audio_bytes: transport.audio_bytes_received(),
        end_markers: transport.end_markers_received(),
    };

    // Last transcript handles go here; the renderer drains and exits.
    drop(session);
    drop(transcript);
    if renderer.join().is_err() {
        tracing::warn!("transcript renderer panicked");
    }

    Ok(report)
}
