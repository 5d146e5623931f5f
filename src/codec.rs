//! Wire codec for assist pipeline messages.
//!
//! Inbound run events arrive as `{type, timestamp, data}` JSON objects.
//! Outbound traffic is either a JSON request (run, pipeline list) or a binary
//! audio frame prefixed with the run's binary-handler id.

use crate::defaults;
use crate::error::DecodeError;
use crate::session::run::{InputMode, RunConfig};
use serde::Deserialize;
use serde_json::{Value, json};

/// A message handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Json(Value),
    Binary(Vec<u8>),
}

impl OutboundMessage {
    /// JSON body, if this is a JSON request.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            OutboundMessage::Json(v) => Some(v),
            OutboundMessage::Binary(_) => None,
        }
    }

    /// Binary body, if this is an audio frame.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            OutboundMessage::Json(_) => None,
            OutboundMessage::Binary(b) => Some(b),
        }
    }
}

/// One decoded pipeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    pub kind: StageEventKind,
    pub timestamp: Option<String>,
}

/// Stage-specific event payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEventKind {
    /// Run accepted. Audio runs carry the binary-handler id for frames.
    RunStart {
        handler_id: Option<u8>,
        timeout_secs: Option<u64>,
    },
    RunEnd,
    WakeWordStart,
    WakeWordEnd,
    SttStart,
    SttVadStart,
    SttVadEnd,
    SttEnd { text: String },
    IntentStart,
    /// Speech may be absent when the agent has nothing to say.
    IntentEnd { speech: Option<String> },
    TtsStart,
    /// Media path, usually relative to the server base URL.
    TtsEnd { url: String },
    Error { code: String, message: String },
}

impl StageEventKind {
    /// Wire tag for this event.
    pub fn tag(&self) -> &'static str {
        match self {
            StageEventKind::RunStart { .. } => "run-start",
            StageEventKind::RunEnd => "run-end",
            StageEventKind::WakeWordStart => "wake_word-start",
            StageEventKind::WakeWordEnd => "wake_word-end",
            StageEventKind::SttStart => "stt-start",
            StageEventKind::SttVadStart => "stt-vad-start",
            StageEventKind::SttVadEnd => "stt-vad-end",
            StageEventKind::SttEnd { .. } => "stt-end",
            StageEventKind::IntentStart => "intent-start",
            StageEventKind::IntentEnd { .. } => "intent-end",
            StageEventKind::TtsStart => "tts-start",
            StageEventKind::TtsEnd { .. } => "tts-end",
            StageEventKind::Error { .. } => "error",
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize, Default)]
struct RunStartData {
    #[serde(default)]
    runner_data: Option<RunnerData>,
}

#[derive(Deserialize)]
struct RunnerData {
    #[serde(default)]
    stt_binary_handler_id: Option<u8>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Deserialize)]
struct SttEndData {
    stt_output: SttOutput,
}

#[derive(Deserialize)]
struct SttOutput {
    text: String,
}

#[derive(Deserialize)]
struct IntentEndData {
    intent_output: IntentOutput,
}

#[derive(Deserialize)]
struct IntentOutput {
    #[serde(default)]
    response: Option<IntentResponse>,
}

#[derive(Deserialize)]
struct IntentResponse {
    #[serde(default)]
    speech: Option<Speech>,
}

#[derive(Deserialize)]
struct Speech {
    #[serde(default)]
    plain: Option<PlainSpeech>,
}

#[derive(Deserialize)]
struct PlainSpeech {
    speech: String,
}

#[derive(Deserialize)]
struct TtsEndData {
    tts_output: TtsOutput,
}

#[derive(Deserialize)]
struct TtsOutput {
    url: String,
}

#[derive(Deserialize)]
struct ErrorData {
    code: String,
    message: String,
}

/// Parse `data` into `T`, treating a missing/null payload as `null`.
fn payload<T: for<'de> Deserialize<'de>>(
    tag: &str,
    data: Option<Value>,
) -> Result<T, DecodeError> {
    serde_json::from_value(data.unwrap_or(Value::Null)).map_err(|e| DecodeError::Malformed {
        stage: tag.to_string(),
        message: e.to_string(),
    })
}

/// Decode one inbound event.
///
/// # Errors
/// `UnknownStage` for tags this client does not handle, `Malformed` when the
/// envelope or the payload of a known stage does not match.
pub fn decode(raw: &Value) -> Result<StageEvent, DecodeError> {
    let envelope: Envelope =
        serde_json::from_value(raw.clone()).map_err(|e| DecodeError::Malformed {
            stage: "envelope".to_string(),
            message: e.to_string(),
        })?;

    let tag = envelope.tag.as_str();
    let data = envelope.data;

    let kind = match tag {
        "run-start" => {
            // Text runs send run-start without runner data.
            let parsed: RunStartData = if data.as_ref().is_none_or(Value::is_null) {
                RunStartData::default()
            } else {
                payload(tag, data)?
            };
            let runner = parsed.runner_data;
            StageEventKind::RunStart {
                handler_id: runner.as_ref().and_then(|r| r.stt_binary_handler_id),
                timeout_secs: runner.as_ref().and_then(|r| r.timeout),
            }
        }
        "run-end" => StageEventKind::RunEnd,
        "wake_word-start" => StageEventKind::WakeWordStart,
        "wake_word-end" => StageEventKind::WakeWordEnd,
        "stt-start" => StageEventKind::SttStart,
        "stt-vad-start" => StageEventKind::SttVadStart,
        "stt-vad-end" => StageEventKind::SttVadEnd,
        "stt-end" => {
            let parsed: SttEndData = payload(tag, data)?;
            StageEventKind::SttEnd {
                text: parsed.stt_output.text,
            }
        }
        "intent-start" => StageEventKind::IntentStart,
        "intent-end" => {
            let parsed: IntentEndData = payload(tag, data)?;
            let speech = parsed
                .intent_output
                .response
                .and_then(|r| r.speech)
                .and_then(|s| s.plain)
                .map(|p| p.speech);
            StageEventKind::IntentEnd { speech }
        }
        "tts-start" => StageEventKind::TtsStart,
        "tts-end" => {
            let parsed: TtsEndData = payload(tag, data)?;
            StageEventKind::TtsEnd {
                url: parsed.tts_output.url,
            }
        }
        "error" => {
            let parsed: ErrorData = payload(tag, data)?;
            StageEventKind::Error {
                code: parsed.code,
                message: parsed.message,
            }
        }
        other => {
            return Err(DecodeError::UnknownStage {
                tag: other.to_string(),
            });
        }
    };

    Ok(StageEvent {
        kind,
        timestamp: envelope.timestamp,
    })
}

/// Encode the run subscription request.
pub fn encode_run(config: &RunConfig) -> OutboundMessage {
    let input = match &config.input {
        InputMode::Text(text) => json!({ "text": text }),
        InputMode::Audio { sample_rate } => json!({ "sample_rate": sample_rate }),
    };
    OutboundMessage::Json(json!({
        "type": defaults::RUN_MESSAGE_TYPE,
        "pipeline": config.pipeline,
        "start_stage": config.start_stage().as_str(),
        "end_stage": config.end_stage.as_str(),
        "input": input,
    }))
}

/// Encode an audio frame for the run identified by `handler_id`.
///
/// Empty `bytes` produce the end-of-audio marker (handler id alone).
pub fn encode_audio_frame(handler_id: u8, bytes: &[u8]) -> OutboundMessage {
    let mut frame = Vec::with_capacity(bytes.len() + 1);
    frame.push(handler_id);
    frame.extend_from_slice(bytes);
    OutboundMessage::Binary(frame)
}

/// Encode the pipeline list request.
pub fn encode_pipeline_list() -> OutboundMessage {
    OutboundMessage::Json(json!({ "type": defaults::PIPELINE_LIST_MESSAGE_TYPE }))
}
