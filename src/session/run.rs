//! Parameters of a single pipeline run.

use serde::{Deserialize, Serialize};

/// Pipeline stages a run can start or end at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Stt,
    Intent,
    Tts,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Stt => "stt",
            Stage::Intent => "intent",
            Stage::Tts => "tts",
        }
    }
}

/// What the run is fed with.
#[derive(Debug, Clone, PartialEq)]
pub enum InputMode {
    Text(String),
    Audio { sample_rate: u32 },
}

/// Immutable description of one session's run request.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub pipeline: String,
    pub end_stage: Stage,
    pub input: InputMode,
}

impl RunConfig {
    /// Text runs go straight to intent recognition.
    ///
    /// With `end_stage` at [`Stage::Tts`] the answer is also spoken.
    pub fn text(pipeline: impl Into<String>, text: impl Into<String>, end_stage: Stage) -> Self {
        Self {
            pipeline: pipeline.into(),
            end_stage,
            input: InputMode::Text(text.into()),
        }
    }

    /// Audio runs start at speech-to-text.
    pub fn audio(pipeline: impl Into<String>, sample_rate: u32, end_stage: Stage) -> Self {
        Self {
            pipeline: pipeline.into(),
            end_stage,
            input: InputMode::Audio { sample_rate },
        }
    }

    /// Start stage implied by the input mode.
    pub fn start_stage(&self) -> Stage {
        match self.input {
            InputMode::Text(_) => Stage::Intent,
            InputMode::Audio { .. } => Stage::Stt,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.input, InputMode::Audio { .. })
    }

    /// Whether the server will synthesize a spoken response.
    pub fn wants_tts(&self) -> bool {
        self.end_stage == Stage::Tts
    }
}
