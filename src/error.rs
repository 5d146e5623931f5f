//! Error types for hassist.
//!
//! Each concern gets its own enum so callers can tell fatal run errors
//! (decode, server-reported, dropped subscription) from recoverable device
//! and catalog errors. `HassistError` wraps them for the crate-level API.

use thiserror::Error;

/// Inbound event could not be turned into a [`crate::codec::StageEvent`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Stage tag is not one this client knows. Logged and ignored.
    #[error("Unknown pipeline stage: {tag}")]
    UnknownStage { tag: String },

    /// Recognized stage (or envelope) with a payload that does not fit.
    #[error("Malformed {stage} event: {message}")]
    Malformed { stage: String, message: String },
}

/// Capture device could not be opened or configured.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Audio capture device not found: {device}")]
    NoDevice { device: String },

    #[error("Audio capture configuration failed: {message}")]
    SessionConfigFailed { message: String },
}

/// Playback device could not play a media URL.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Audio player not found: {player}")]
    PlayerNotFound { player: String },

    #[error("Audio playback failed: {message}")]
    Failed { message: String },
}

/// Failures reported by the transport collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Failed to send request: {message}")]
    SendFailed { message: String },

    #[error("Subscription dropped: {reason}")]
    SubscriptionDropped { reason: String },
}

/// Errors reported by the server for the active run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Pipeline error ({code}): {message}")]
    ServerReported { code: String, message: String },
}

/// Pipeline list could not be refreshed. The previous snapshot stays valid.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Pipeline list request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Pipeline list response malformed: {message}")]
    Malformed { message: String },
}

impl CatalogError {
    /// Every catalog failure can be retried by fetching again.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

#[derive(Error, Debug)]
pub enum HassistError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Session usage errors
    #[error("Assist input is empty")]
    EmptyInput,

    #[error("No pipeline selected and the catalog has no preferred pipeline")]
    NoPipeline,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Replay file error: {message}")]
    Replay { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HassistError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_unknown_stage_display() {
        let error = DecodeError::UnknownStage {
            tag: "stt-partial".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown pipeline stage: stt-partial");
    }

    #[test]
    fn test_malformed_display() {
        let error = DecodeError::Malformed {
            stage: "stt-end".to_string(),
            message: "missing stt_output.text".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed stt-end event: missing stt_output.text"
        );
    }

    #[test]
    fn test_capture_error_display() {
        let error = CaptureError::NoDevice {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio capture device not found: default");

        let error = CaptureError::SessionConfigFailed {
            message: "rate 16000 rejected".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio capture configuration failed: rate 16000 rejected"
        );
    }

    #[test]
    fn test_server_reported_display() {
        let error = PipelineError::ServerReported {
            code: "stt-no-text-recognized".to_string(),
            message: "No text recognized".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Pipeline error (stt-no-text-recognized): No text recognized"
        );
    }

    #[test]
    fn test_catalog_error_from_transport() {
        let error: CatalogError = TransportError::SendFailed {
            message: "socket closed".to_string(),
        }
        .into();
        assert!(error.is_retryable());
        assert_eq!(
            error.to_string(),
            "Pipeline list request failed: Failed to send request: socket closed"
        );
    }

    #[test]
    fn test_transparent_capture_error() {
        let error: HassistError = CaptureError::NoDevice {
            device: "hw:1".to_string(),
        }
        .into();
        assert_eq!(error.to_string(), "Audio capture device not found: hw:1");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: HassistError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: HassistError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<HassistError>();
        assert_sync::<HassistError>();
    }
}
