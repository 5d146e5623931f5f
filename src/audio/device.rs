use crate::error::{CaptureError, PlaybackError};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// Live capture output: the negotiated rate plus a stream of PCM chunks.
///
/// Chunks are 16-bit little-endian mono PCM at `sample_rate`. The stream ends
/// (the receiver disconnects) once the device is stopped or fails.
#[derive(Debug)]
pub struct CaptureStream {
    pub sample_rate: u32,
    pub chunks: Receiver<Vec<u8>>,
}

/// Trait for microphone-like capture devices.
///
/// This trait allows swapping implementations (real audio device, WAV file,
/// mock).
pub trait AudioCapture: Send {
    /// Start capturing.
    ///
    /// `sample_rate_hint` is the preferred rate; the returned stream reports
    /// the rate actually delivered.
    fn start(&mut self, sample_rate_hint: u32) -> Result<CaptureStream, CaptureError>;

    /// Stop capturing. Stopping an idle device is a no-op.
    fn stop(&mut self) -> Result<(), CaptureError>;

    fn is_capturing(&self) -> bool;
}

/// Trait for media playback devices.
pub trait AudioPlayback: Send {
    /// Start playing `url`, replacing anything currently playing.
    fn play(&mut self, url: &str) -> Result<(), PlaybackError>;

    /// Stop playback. Stopping an idle player is a no-op.
    fn stop(&mut self);

    fn is_playing(&mut self) -> bool;
}

/// Capture stand-in for hosts without an input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCapture;

impl AudioCapture for NullCapture {
    fn start(&mut self, _sample_rate_hint: u32) -> Result<CaptureStream, CaptureError> {
        Err(CaptureError::NoDevice {
            device: "none".to_string(),
        })
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }
}

/// Playback stand-in that accepts and discards every URL.
#[derive(Debug, Default, Clone)]
pub struct NullPlayback {
    last_url: Option<String>,
}

impl NullPlayback {
    pub fn last_url(&self) -> Option<&str> {
        self.last_url.as_deref()
    }
}

impl AudioPlayback for NullPlayback {
    fn play(&mut self, url: &str) -> Result<(), PlaybackError> {
        tracing::info!(url, "playback disabled, skipping response audio");
        self.last_url = Some(url.to_string());
        Ok(())
    }

    fn stop(&mut self) {}

    fn is_playing(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct MockCaptureState {
    sender: Option<Sender<Vec<u8>>>,
    start_calls: usize,
    stop_calls: usize,
    start_failure: Option<CaptureError>,
    negotiated_rate: Option<u32>,
}

/// Scriptable capture device for tests.
///
/// Clones share state, so a test keeps one clone to feed chunks and inspect
/// call counts while the session owns the other.
#[derive(Debug, Clone, Default)]
pub struct MockCapture {
    state: Arc<Mutex<MockCaptureState>>,
}

impl MockCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(self, error: CaptureError) -> Self {
        self.lock().start_failure = Some(error);
        self
    }

    /// Report `rate` instead of the hint, as a device with a fixed rate would.
    pub fn with_negotiated_rate(self, rate: u32) -> Self {
        self.lock().negotiated_rate = Some(rate);
        self
    }

    /// Deliver one chunk as if the device callback fired.
    ///
    /// Returns false when not capturing.
    pub fn push_chunk(&self, chunk: Vec<u8>) -> bool {
        match self.lock().sender {
            Some(ref tx) => tx.send(chunk).is_ok(),
            None => false,
        }
    }

    /// Raw sender of the running capture.
    ///
    /// Holding it past `stop()` simulates a device that keeps delivering for
    /// a moment after being told to stop.
    pub fn sender(&self) -> Option<Sender<Vec<u8>>> {
        self.lock().sender.clone()
    }

    pub fn start_calls(&self) -> usize {
        self.lock().start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.lock().stop_calls
    }

    fn lock(&self) -> MutexGuard<'_, MockCaptureState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioCapture for MockCapture {
    fn start(&mut self, sample_rate_hint: u32) -> Result<CaptureStream, CaptureError> {
        let mut state = self.lock();
        state.start_calls += 1;
        if let Some(ref error) = state.start_failure {
            return Err(error.clone());
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        state.sender = Some(tx);
        Ok(CaptureStream {
            sample_rate: state.negotiated_rate.unwrap_or(sample_rate_hint),
            chunks: rx,
        })
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let mut state = self.lock();
        state.stop_calls += 1;
        state.sender = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.lock().sender.is_some()
    }
}

#[derive(Debug, Default)]
struct MockPlaybackState {
    played: Vec<String>,
    stop_calls: usize,
    playing: bool,
    failure: Option<PlaybackError>,
}

/// Scriptable playback device for tests. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockPlayback {
    state: Arc<Mutex<MockPlaybackState>>,
}

impl MockPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(self, error: PlaybackError) -> Self {
        self.lock().failure = Some(error);
        self
    }

    /// URLs passed to `play`, in order.
    pub fn played(&self) -> Vec<String> {
        self.lock().played.clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.lock().stop_calls
    }

    /// Simulate the media running to completion.
    pub fn finish(&self) {
        self.lock().playing = false;
    }

    fn lock(&self) -> MutexGuard<'_, MockPlaybackState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioPlayback for MockPlayback {
    fn play(&mut self, url: &str) -> Result<(), PlaybackError> {
        let mut state = self.lock();
        if let Some(ref error) = state.failure {
            return Err(error.clone());
        }
        state.played.push(url.to_string());
        state.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.stop_calls += 1;
        state.playing = false;
    }

    fn is_playing(&mut self) -> bool {
        self.lock().playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_capture_start_stop_state_management() {
        let mut capture = MockCapture::new();
        assert!(!capture.is_capturing());

        let stream = capture.start(16000).unwrap();
        assert_eq!(stream.sample_rate, 16000);
        assert!(capture.is_capturing());

        capture.stop().unwrap();
        assert!(!capture.is_capturing());
        assert_eq!(capture.start_calls(), 1);
        assert_eq!(capture.stop_calls(), 1);
    }

    #[test]
    fn test_mock_capture_chunks_flow_until_stop() {
        let mut capture = MockCapture::new();
        let feeder = capture.clone();
        let stream = capture.start(16000).unwrap();

        assert!(feeder.push_chunk(vec![1, 2]));
        assert!(feeder.push_chunk(vec![3, 4]));
        capture.stop().unwrap();
        assert!(!feeder.push_chunk(vec![5, 6]));

        let received: Vec<Vec<u8>> = stream.chunks.iter().collect();
        assert_eq!(received, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_mock_capture_held_sender_outlives_stop() {
        let mut capture = MockCapture::new();
        let stream = capture.start(16000).unwrap();
        let late = capture.sender().unwrap();
        capture.stop().unwrap();

        late.send(vec![9]).unwrap();
        assert_eq!(stream.chunks.try_recv().unwrap(), vec![9]);
    }

    #[test]
    fn test_mock_capture_start_failure() {
        let mut capture = MockCapture::new().with_start_failure(CaptureError::NoDevice {
            device: "hw:9".to_string(),
        });
        let result = capture.start(16000);
        assert!(matches!(result, Err(CaptureError::NoDevice { device }) if device == "hw:9"));
        assert!(!capture.is_capturing());
    }

    #[test]
    fn test_mock_capture_negotiated_rate() {
        let mut capture = MockCapture::new().with_negotiated_rate(48000);
        assert_eq!(capture.start(16000).unwrap().sample_rate, 48000);
    }

    #[test]
    fn test_mock_playback_records_urls() {
        let mut playback = MockPlayback::new();
        playback.play("http://ha/a.mp3").unwrap();
        assert!(playback.is_playing());
        playback.stop();
        assert!(!playback.is_playing());
        assert_eq!(playback.played(), vec!["http://ha/a.mp3".to_string()]);
        assert_eq!(playback.stop_calls(), 1);
    }

    #[test]
    fn test_mock_playback_failure() {
        let mut playback = MockPlayback::new().with_failure(PlaybackError::Failed {
            message: "codec".to_string(),
        });
        assert!(playback.play("x").is_err());
        assert!(!playback.is_playing());
    }

    #[test]
    fn test_null_devices() {
        let mut capture = NullCapture;
        assert!(matches!(
            capture.start(16000),
            Err(CaptureError::NoDevice { .. })
        ));
        assert!(capture.stop().is_ok());

        let mut playback = NullPlayback::default();
        playback.play("http://ha/x.mp3").unwrap();
        assert_eq!(playback.last_url(), Some("http://ha/x.mp3"));
        assert!(!playback.is_playing());
    }

    #[test]
    fn test_devices_are_object_safe() {
        let mut capture: Box<dyn AudioCapture> = Box::new(MockCapture::new());
        let mut playback: Box<dyn AudioPlayback> = Box::new(MockPlayback::new());
        assert!(capture.start(16000).is_ok());
        assert!(playback.play("u").is_ok());
    }
}
