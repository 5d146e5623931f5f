//! Pure transition function of a pipeline session.
//!
//! [`transition`] maps the current state plus one input to the next state
//! and the side effects the session must execute, in order. It performs no
//! I/O, which keeps the whole run lifecycle testable as plain data.

use crate::codec::StageEventKind;
use crate::error::{DecodeError, PipelineError, TransportError};
use crate::session::run::RunConfig;
use crate::transcript::EntryKind;
use serde::Serialize;

/// Where the session is in its run lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// Audio run requested, waiting for run-start.
    Starting,
    Listening(ListenMode),
    Processing(ProcessingStage),
    /// Waiting for synthesized speech.
    Responding,
    /// Run ended with a fatal error.
    Error(String),
    /// Run ended by the caller.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    /// Microphone open, frames flowing once the handler id is known.
    Capturing,
    /// No microphone available; only typed text can start a run.
    TextPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Stt,
    Intent,
}

impl SessionState {
    /// Whether a run is open (a subscription exists or is being opened).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Starting
                | SessionState::Listening(ListenMode::Capturing)
                | SessionState::Processing(_)
                | SessionState::Responding
        )
    }

    /// Short lowercase name for logs and status output.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Listening(ListenMode::Capturing) => "listening",
            SessionState::Listening(ListenMode::TextPending) => "text-pending",
            SessionState::Processing(ProcessingStage::Stt) => "processing-stt",
            SessionState::Processing(ProcessingStage::Intent) => "processing-intent",
            SessionState::Responding => "responding",
            SessionState::Error(_) => "error",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// Everything that can move the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Input<'a> {
    /// Caller started a text run with this (already validated) text.
    StartText(&'a str),
    /// Caller started an audio run and the microphone is open.
    StartAudio,
    /// Caller asked for an audio run but the microphone failed.
    CaptureUnavailable(&'a str),
    Event(&'a StageEventKind),
    Malformed(&'a DecodeError),
    SubscriptionDropped(&'a str),
    Cancel,
}

/// Side effects, executed by the session in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Append(EntryKind, String),
    StoreHandler(u8),
    AcceptAudio(bool),
    StopCapture,
    SendEndOfAudio,
    /// Start playback of a media path as reported by the server.
    Play(String),
    StopPlayback,
    /// Server stage timeout from run-start, in seconds.
    RecordTimeout(u64),
    /// Cancel the subscription and drop the run handle.
    EndRun,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
    /// Input had no meaning in this state.
    pub ignored: bool,
}

impl Transition {
    fn to(next: SessionState, effects: Vec<Effect>) -> Self {
        Self {
            next,
            effects,
            ignored: false,
        }
    }

    fn stay(state: &SessionState, effects: Vec<Effect>) -> Self {
        Self::to(state.clone(), effects)
    }

    fn ignore(state: &SessionState) -> Self {
        Self {
            next: state.clone(),
            effects: Vec::new(),
            ignored: true,
        }
    }
}

fn fail(detail: String) -> Transition {
    Transition::to(
        SessionState::Error(detail.clone()),
        vec![
            Effect::AcceptAudio(false),
            Effect::StopCapture,
            Effect::Append(EntryKind::Error, detail),
            Effect::EndRun,
        ],
    )
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Compute the next state and effects for `input` in `state`.
///
/// `run` is the configuration of the run the input belongs to, if any.
pub fn transition(
    state: &SessionState,
    input: &Input<'_>,
    run: Option<&RunConfig>,
) -> Transition {
    use SessionState as S;

    // Starts only move the state; the session opens the subscription itself
    // once its lock is released.
    if !state.is_active() {
        return match input {
            Input::StartText(text) => Transition::to(
                S::Processing(ProcessingStage::Intent),
                vec![Effect::Append(EntryKind::Input, text.to_string())],
            ),
            Input::StartAudio => Transition::to(S::Starting, Vec::new()),
            Input::CaptureUnavailable(detail) => Transition::to(
                S::Listening(ListenMode::TextPending),
                vec![Effect::Append(EntryKind::Info, detail.to_string())],
            ),
            Input::Cancel if *state == S::Listening(ListenMode::TextPending) => {
                Transition::to(S::Cancelled, Vec::new())
            }
            _ => Transition::ignore(state),
        };
    }

    match input {
        Input::Cancel => Transition::to(
            S::Cancelled,
            vec![
                Effect::AcceptAudio(false),
                Effect::StopCapture,
                Effect::StopPlayback,
                Effect::EndRun,
            ],
        ),
        Input::Malformed(error) => fail(error.to_string()),
        Input::SubscriptionDropped(reason) => fail(
            TransportError::SubscriptionDropped {
                reason: reason.to_string(),
            }
            .to_string(),
        ),
        Input::Event(event) => on_event(state, event, run),
        // Start while active: the session cancels before starting.
        Input::StartText(_) | Input::StartAudio | Input::CaptureUnavailable(_) => {
            Transition::ignore(state)
        }
    }
}

fn on_event(state: &SessionState, event: &StageEventKind, run: Option<&RunConfig>) -> Transition {
    use SessionState as S;
    use StageEventKind as E;

    match (state, event) {
        (_, E::Error { code, message }) => fail(
            PipelineError::ServerReported {
                code: code.clone(),
                message: message.clone(),
            }
            .to_string(),
        ),
        (_, E::RunEnd) => Transition::to(
            S::Idle,
            vec![Effect::AcceptAudio(false), Effect::StopCapture, Effect::EndRun],
        ),

        (S::Starting, E::RunStart { handler_id, timeout_secs }) => {
            let Some(id) = handler_id else {
                return fail("Audio run started without a binary handler id".to_string());
            };
            let mut effects = vec![Effect::StoreHandler(*id), Effect::AcceptAudio(true)];
            effects.extend(timeout_secs.map(Effect::RecordTimeout));
            Transition::to(S::Listening(ListenMode::Capturing), effects)
        }
        // Text runs get run-start after the request; only the timeout matters.
        (S::Processing(ProcessingStage::Intent), E::RunStart { timeout_secs, .. })
            if !run.is_some_and(RunConfig::is_audio) =>
        {
            Transition::stay(
                state,
                timeout_secs.map(Effect::RecordTimeout).into_iter().collect(),
            )
        }

        (S::Listening(ListenMode::Capturing), E::SttStart) => {
            Transition::stay(state, vec![Effect::AcceptAudio(true)])
        }
        (S::Listening(ListenMode::Capturing), E::SttVadEnd) => Transition::to(
            S::Processing(ProcessingStage::Stt),
            vec![
                Effect::AcceptAudio(false),
                Effect::StopCapture,
                Effect::SendEndOfAudio,
            ],
        ),
        (S::Listening(ListenMode::Capturing), E::SttEnd { text }) => {
            let mut effects = vec![Effect::AcceptAudio(false), Effect::StopCapture];
            effects.extend(non_empty(text).map(|t| Effect::Append(EntryKind::Input, t)));
            Transition::to(S::Processing(ProcessingStage::Intent), effects)
        }
        (S::Processing(ProcessingStage::Stt), E::SttEnd { text }) => Transition::to(
            S::Processing(ProcessingStage::Intent),
            non_empty(text)
                .map(|t| Effect::Append(EntryKind::Input, t))
                .into_iter()
                .collect(),
        ),

        (S::Processing(ProcessingStage::Intent), E::IntentEnd { speech }) => {
            let mut effects: Vec<Effect> = speech
                .as_deref()
                .and_then(non_empty)
                .map(|s| Effect::Append(EntryKind::Output, s))
                .into_iter()
                .collect();
            if run.is_some_and(RunConfig::wants_tts) {
                Transition::to(S::Responding, effects)
            } else {
                effects.push(Effect::EndRun);
                Transition::to(S::Idle, effects)
            }
        }

        (S::Responding, E::TtsEnd { url }) => Transition::to(
            S::Idle,
            vec![Effect::Play(url.clone()), Effect::EndRun],
        ),

        _ => Transition::ignore(state),
    }
}
