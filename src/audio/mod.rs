//! Audio devices: microphone capture and response playback.

pub mod bridge;
#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod device;
pub mod player;
pub mod wav;

pub use bridge::AudioBridge;
pub use device::{AudioCapture, AudioPlayback, CaptureStream};
