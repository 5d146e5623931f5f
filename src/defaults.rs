//! Default configuration constants for hassist.

/// Sample rate requested from the capture device, in Hz.
///
/// 16kHz mono is what the server-side speech-to-text engines expect. The
/// device may negotiate a different rate; the run request then carries the
/// negotiated one.
pub const SAMPLE_RATE: u32 = 16000;

/// Base URL of the Home Assistant instance.
pub const SERVER_URL: &str = "http://homeassistant.local:8123";

/// Command used to play text-to-speech media.
pub const PLAYER_COMMAND: &str = "mpv";

/// Arguments passed to the player before the media URL.
pub const PLAYER_ARGS: &[&str] = &["--no-video", "--really-quiet"];

/// Capacity of the channel between the capture callback and the session.
///
/// One entry per device callback (typically 10-20ms of audio), so this holds
/// several seconds before the callback starts dropping chunks.
pub const CAPTURE_CHANNEL_CAPACITY: usize = 512;

/// Duration of each chunk produced when replaying a WAV file as capture input.
pub const WAV_CHUNK_MS: u32 = 100;

/// How often a finished run checks whether the response is still playing.
pub const PLAYBACK_POLL_MS: u64 = 50;

/// Delay between replayed server events (milliseconds).
pub const REPLAY_EVENT_DELAY_MS: u64 = 20;

/// Message type of a pipeline run subscription.
pub const RUN_MESSAGE_TYPE: &str = "assist_pipeline/run";

/// Message type of the pipeline list request.
pub const PIPELINE_LIST_MESSAGE_TYPE: &str = "assist_pipeline/pipeline/list";
