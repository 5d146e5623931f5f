//! Owner of the capture and playback devices.
//!
//! Capture and playback are mutually exclusive: starting one stops the other,
//! so the assistant never hears its own response. Stop calls are only issued
//! to devices that are actually running.

use crate::audio::device::{AudioCapture, AudioPlayback, CaptureStream, NullCapture, NullPlayback};
use crate::error::{CaptureError, PlaybackError};

pub struct AudioBridge {
    capture: Box<dyn AudioCapture>,
    playback: Box<dyn AudioPlayback>,
}

impl AudioBridge {
    pub fn new(capture: Box<dyn AudioCapture>, playback: Box<dyn AudioPlayback>) -> Self {
        Self { capture, playback }
    }

    /// Bridge with no devices: capture always fails, playback is skipped.
    pub fn disabled() -> Self {
        Self::new(Box::new(NullCapture), Box::new(NullPlayback::default()))
    }

    /// Stop any playback, then start capturing.
    pub fn start_capture(&mut self, sample_rate_hint: u32) -> Result<CaptureStream, CaptureError> {
        self.stop_playback();
        let stream = self.capture.start(sample_rate_hint)?;
        tracing::info!(sample_rate = stream.sample_rate, "capture started");
        Ok(stream)
    }

    /// Stop capture if it is running. Returns whether a stop was issued.
    pub fn stop_capture(&mut self) -> bool {
        if !self.capture.is_capturing() {
            return false;
        }
        if let Err(e) = self.capture.stop() {
            tracing::warn!(error = %e, "failed to stop capture");
        } else {
            tracing::info!("capture stopped");
        }
        true
    }

    /// Stop capture if needed, then play `url`.
    pub fn play(&mut self, url: &str) -> Result<(), PlaybackError> {
        self.stop_capture();
        self.playback.play(url)?;
        tracing::info!(url, "playback started");
        Ok(())
    }

    /// Stop playback if it is running. Returns whether a stop was issued.
    pub fn stop_playback(&mut self) -> bool {
        if !self.playback.is_playing() {
            return false;
        }
        self.playback.stop();
        tracing::info!("playback stopped");
        true
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_capturing()
    }

    pub fn is_playing(&mut self) -> bool {
        self.playback.is_playing()
    }
}

impl std::fmt::Debug for AudioBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBridge")
            .field("capturing", &self.capture.is_capturing())
            .finish_non_exhaustive()
    }
}
