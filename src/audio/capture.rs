//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::device::{AudioCapture, CaptureStream};
use crate::defaults;
use crate::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for desktop sound servers.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never microphones.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List usable input devices, marking preferred ones with "\[recommended\]".
pub fn list_devices() -> Result<Vec<String>, CaptureError> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices());
    let devices = devices.map_err(|e| CaptureError::SessionConfigFailed {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(wanted) = device_name {
            let devices = host
                .input_devices()
                .map_err(|e| CaptureError::SessionConfigFailed {
                    message: format!("Failed to enumerate devices: {}", e),
                })?;
            for device in devices {
                if let Ok(name) = device.name()
                    && name == wanted
                {
                    return Ok(device);
                }
            }
            return Err(CaptureError::NoDevice {
                device: wanted.to_string(),
            });
        }

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| CaptureError::NoDevice {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through `&mut CpalCapture`, and the
/// bridge owning it sits behind the session lock.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Serialize samples as 16-bit little-endian PCM.
fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Average interleaved frames down to one channel.
fn mix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Hand one chunk to the session without blocking the audio thread.
fn forward(tx: &Sender<Vec<u8>>, dropped: &AtomicU64, samples: &[i16]) {
    if samples.is_empty() {
        return;
    }
    if tx.try_send(pcm_bytes(samples)).is_err() {
        dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Microphone capture through CPAL.
///
/// Tries mono i16 at the requested rate first, then mono f32, then the
/// device's native config mixed down to mono. The native path reports the
/// native rate instead of resampling.
pub struct CpalCapture {
    device: cpal::Device,
    stream: Option<SendableStream>,
    callback_count: Arc<AtomicU64>,
    dropped_chunks: Arc<AtomicU64>,
}

impl CpalCapture {
    /// Open `device_name`, or the best default input when `None`.
    pub fn new(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let device = find_device(device_name)?;
        Ok(Self {
            device,
            stream: None,
            callback_count: Arc::new(AtomicU64::new(0)),
            dropped_chunks: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Chunks dropped because the session fell behind.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    fn build_preferred(
        &self,
        sample_rate: u32,
        tx: &Sender<Vec<u8>>,
    ) -> Option<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let err_callback = |err| {
            tracing::warn!(error = %err, "audio stream error");
        };

        let (counter, dropped, sender) = (
            Arc::clone(&self.callback_count),
            Arc::clone(&self.dropped_chunks),
            tx.clone(),
        );
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                forward(&sender, &dropped, data);
            },
            err_callback,
            None,
        ) {
            return Some(stream);
        }

        let (counter, dropped, sender) = (
            Arc::clone(&self.callback_count),
            Arc::clone(&self.dropped_chunks),
            tx.clone(),
        );
        self.device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    forward(&sender, &dropped, &f32_to_i16(data));
                },
                err_callback,
                None,
            )
            .ok()
    }

    /// Stream at the device's default config, mixed to mono in software.
    fn build_native(&self, tx: &Sender<Vec<u8>>) -> Result<(cpal::Stream, u32), CaptureError> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| CaptureError::SessionConfigFailed {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate();
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels,
            sample_rate = native_rate,
            format = ?default_config.sample_format(),
            "using native audio format"
        );

        let err_callback = |err| {
            tracing::warn!(error = %err, "audio stream error");
        };
        let counter = Arc::clone(&self.callback_count);
        let dropped = Arc::clone(&self.dropped_chunks);
        let sender = tx.clone();

        let stream = match default_config.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    forward(&sender, &dropped, &mix_to_mono(data, channels));
                },
                err_callback,
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    forward(&sender, &dropped, &mix_to_mono(&f32_to_i16(data), channels));
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(CaptureError::SessionConfigFailed {
                    message: format!(
                        "Unsupported native sample format: {:?}. \
                         Try another device in [audio] device.",
                        fmt
                    ),
                });
            }
        };

        let stream = stream.map_err(|e| CaptureError::SessionConfigFailed {
            message: format!("Failed to build native stream: {}", e),
        })?;
        Ok((stream, native_rate))
    }
}

impl AudioCapture for CpalCapture {
    fn start(&mut self, sample_rate_hint: u32) -> Result<CaptureStream, CaptureError> {
        if self.stream.is_some() {
            return Err(CaptureError::SessionConfigFailed {
                message: "capture already running".to_string(),
            });
        }

        let (tx, rx) = crossbeam_channel::bounded(defaults::CAPTURE_CHANNEL_CAPACITY);
        self.callback_count.store(0, Ordering::Relaxed);

        let mut started = None;
        if let Some(stream) = self.build_preferred(sample_rate_hint, &tx)
            && stream.play().is_ok()
        {
            // Some PipeWire-ALSA setups accept non-native configs but never
            // fire the data callback.
            std::thread::sleep(Duration::from_millis(200));
            if self.callback_count.load(Ordering::Relaxed) > 0 {
                started = Some((stream, sample_rate_hint));
            }
        }

        let (stream, sample_rate) = match started {
            Some(found) => found,
            None => {
                // Chunks from the abandoned stream are at the wrong rate.
                while rx.try_recv().is_ok() {}
                let (stream, rate) = self.build_native(&tx)?;
                stream.play().map_err(|e| CaptureError::SessionConfigFailed {
                    message: format!("Failed to start native audio stream: {}", e),
                })?;
                (stream, rate)
            }
        };

        self.stream = Some(SendableStream(stream));
        // Only the stream callbacks hold senders from here on, so the
        // receiver disconnects once the stream is dropped.
        drop(tx);
        Ok(CaptureStream {
            sample_rate,
            chunks: rx,
        })
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(stream) = self.stream.take() {
            stream
                .0
                .pause()
                .map_err(|e| CaptureError::SessionConfigFailed {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
    }

    #[test]
    fn test_pcm_bytes_little_endian() {
        assert_eq!(pcm_bytes(&[1, -2, 0x1234]), vec![1, 0, 0xfe, 0xff, 0x34, 0x12]);
        assert!(pcm_bytes(&[]).is_empty());
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(&[0.0, 1.0, -2.0]), vec![0, i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_mix_to_mono() {
        assert_eq!(mix_to_mono(&[100, 200, 300, 500], 2), vec![150, 400]);
        assert_eq!(mix_to_mono(&[1, 2, 3], 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_forward_counts_drops_when_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let dropped = AtomicU64::new(0);
        forward(&tx, &dropped, &[1]);
        forward(&tx, &dropped, &[2]);
        forward(&tx, &dropped, &[]);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_create_with_invalid_device_name() {
        match CpalCapture::new(Some("NonExistentDevice12345")) {
            Err(CaptureError::NoDevice { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            Err(CaptureError::SessionConfigFailed { .. }) => {}
            Ok(_) => panic!("Expected NoDevice error"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_start_stop_closes_chunk_stream() {
        let mut capture = CpalCapture::new(None).expect("no input device");
        let stream = capture.start(defaults::SAMPLE_RATE).expect("start failed");
        std::thread::sleep(Duration::from_millis(100));
        capture.stop().expect("stop failed");
        drop(capture);
        let _ = stream.chunks.iter().count();
    }
}
