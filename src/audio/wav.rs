//! WAV file used as a capture device.
//!
//! Lets a recorded utterance stand in for the microphone when replaying or
//! debugging a run. Chunks are paced in real time by default, followed by a
//! stretch of silence so server-side voice activity detection can see the
//! end of speech.

use crate::audio::device::{AudioCapture, CaptureStream};
use crate::defaults;
use crate::error::CaptureError;
use crossbeam_channel::SendTimeoutError;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

const TRAILING_SILENCE_MS: u32 = 1000;
const SEND_POLL: Duration = Duration::from_millis(20);

pub struct WavCapture {
    samples: Arc<Vec<i16>>,
    sample_rate: u32,
    chunk_ms: u32,
    realtime: bool,
    trailing_silence_ms: u32,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

fn open_error(path: &Path, error: std::io::Error) -> CaptureError {
    if error.kind() == std::io::ErrorKind::NotFound {
        CaptureError::NoDevice {
            device: path.display().to_string(),
        }
    } else {
        CaptureError::SessionConfigFailed {
            message: format!("Failed to open {}: {}", path.display(), error),
        }
    }
}

impl WavCapture {
    /// Parse WAV data from any reader. Stereo is mixed down to mono; the
    /// file's own sample rate is reported as the capture rate.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CaptureError> {
        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| CaptureError::SessionConfigFailed {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(CaptureError::SessionConfigFailed {
                message: format!(
                    "Unsupported WAV format: {}-bit {:?}, expected 16-bit PCM",
                    spec.bits_per_sample, spec.sample_format
                ),
            });
        }

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CaptureError::SessionConfigFailed {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let channels = spec.channels as usize;
        let samples = if channels > 1 {
            raw_samples
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        } else {
            raw_samples
        };

        Ok(Self {
            samples: Arc::new(samples),
            sample_rate: spec.sample_rate,
            chunk_ms: defaults::WAV_CHUNK_MS,
            realtime: true,
            trailing_silence_ms: TRAILING_SILENCE_MS,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Open a WAV file. Only a missing file counts as a missing device.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let file = std::fs::File::open(path).map_err(|e| open_error(path, e))?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Deliver chunks as fast as the consumer takes them.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_trailing_silence_ms(mut self, ms: u32) -> Self {
        self.trailing_silence_ms = ms;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per chunk at the file's rate.
    fn chunk_len(&self) -> usize {
        ((self.sample_rate as u64 * self.chunk_ms as u64) / 1000).max(1) as usize
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("wav capture worker panicked");
        }
    }
}

impl AudioCapture for WavCapture {
    fn start(&mut self, _sample_rate_hint: u32) -> Result<CaptureStream, CaptureError> {
        if self.is_capturing() {
            return Err(CaptureError::SessionConfigFailed {
                message: "capture already running".to_string(),
            });
        }
        // Previous playthrough ran to the end without an explicit stop.
        self.join_worker();

        let (tx, rx) = crossbeam_channel::bounded(defaults::CAPTURE_CHANNEL_CAPACITY);
        self.stop_flag.store(false, Ordering::SeqCst);

        let samples = Arc::clone(&self.samples);
        let stop = Arc::clone(&self.stop_flag);
        let chunk_len = self.chunk_len();
        let pause = self
            .realtime
            .then(|| Duration::from_millis(self.chunk_ms as u64));
        let silence_len =
            (self.sample_rate as u64 * self.trailing_silence_ms as u64 / 1000) as usize;

        let worker = std::thread::Builder::new()
            .name("wav-capture".to_string())
            .spawn(move || {
                let silence = vec![0i16; silence_len];
                let chunks = samples.chunks(chunk_len).chain(silence.chunks(chunk_len));
                for chunk in chunks {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let mut pending: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
                    // Bounded wait: stop() joins this thread while the
                    // consumer may be blocked on the session lock.
                    loop {
                        match tx.send_timeout(pending, SEND_POLL) {
                            Ok(()) => break,
                            Err(SendTimeoutError::Timeout(back)) => {
                                if stop.load(Ordering::SeqCst) {
                                    return;
                                }
                                pending = back;
                            }
                            Err(SendTimeoutError::Disconnected(_)) => return,
                        }
                    }
                    if let Some(pause) = pause {
                        std::thread::sleep(pause);
                    }
                }
            })
            .map_err(|e| CaptureError::SessionConfigFailed {
                message: format!("Failed to spawn wav capture thread: {}", e),
            })?;

        self.worker = Some(worker);
        Ok(CaptureStream {
            sample_rate: self.sample_rate,
            chunks: rx,
        })
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.join_worker();
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl Drop for WavCapture {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.join_worker();
    }
}
