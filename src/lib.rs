//! hassist - Voice-assistant pipeline client for Home Assistant
//!
//! Drives one assist pipeline run at a time: streams microphone audio or
//! typed text to the server, follows the stage events it sends back, keeps
//! a conversation transcript and plays the spoken response.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod catalog;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "cli")]
pub mod output;
pub mod session;
pub mod transcript;
pub mod transport;

// Composition root for the command-line tool
#[cfg(feature = "cli")]
pub mod app;

// Device seams
pub use audio::{AudioBridge, AudioCapture, AudioPlayback, CaptureStream};

// Session
pub use session::{
    PipelineSession, RunConfig, SessionSnapshot, SessionState, Stage, StartOutcome,
};

// Wire format
pub use codec::{OutboundMessage, StageEvent, StageEventKind};

// Transport seam
pub use transport::{Subscription, Transport, TransportEvent};

// Transcript and catalog
pub use catalog::{CatalogSnapshot, Pipeline, PipelineCatalog};
pub use transcript::{ChatEntry, EntryKind, Transcript};

// Error handling
pub use error::{HassistError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
