//! Pipeline session: one assist run at a time, driven by server events.
//!
//! All mutable run state sits behind a single mutex. Transport deliveries,
//! captured audio chunks and caller actions each take that lock, feed one
//! input to [`machine::transition`] and execute the resulting effects before
//! releasing it, so a cancel can never interleave with an event transition
//! and no chunk can slip out after the accept flag is cleared. The lock is
//! never held across an `.await`.
//!
//! Every run gets an epoch. Callbacks capture the epoch they were issued
//! under; a delivery whose epoch no longer matches the active run is dropped.

pub mod machine;
pub mod run;

pub use machine::{ListenMode, ProcessingStage, SessionState};
pub use run::{InputMode, RunConfig, Stage};

use crate::audio::AudioBridge;
use crate::codec;
use crate::defaults;
use crate::error::{CaptureError, DecodeError, HassistError, Result};
use crate::session::machine::{Effect, Input};
use crate::transcript::{EntryKind, Transcript};
use crate::transport::{EventCallback, Subscription, Transport, TransportEvent};
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

/// The live run.
struct SessionHandle {
    epoch: u64,
    /// Set once the transport has accepted the subscription.
    subscription: Option<Box<dyn Subscription>>,
    handler_id: Option<u8>,
    accept_audio: bool,
}

impl SessionHandle {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            subscription: None,
            handler_id: None,
            accept_audio: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RunStats {
    frames_sent: u64,
    chunks_dropped: u64,
    events_ignored: u64,
    stage_timeout_secs: Option<u64>,
}

struct SessionCore {
    state: SessionState,
    epoch: u64,
    run: Option<RunConfig>,
    handle: Option<SessionHandle>,
    bridge: AudioBridge,
    stats: RunStats,
}

impl SessionCore {
    fn is_current(&self, epoch: u64) -> bool {
        self.handle.as_ref().is_some_and(|h| h.epoch == epoch)
    }

    /// Open a new run and return its epoch.
    fn begin(&mut self, run: RunConfig) -> u64 {
        self.epoch += 1;
        self.run = Some(run);
        self.handle = Some(SessionHandle::new(self.epoch));
        self.stats = RunStats::default();
        self.epoch
    }
}

/// Point-in-time view of the session for status output and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub epoch: u64,
    pub handler_id: Option<u8>,
    pub accepting_audio: bool,
    pub capturing: bool,
    /// Audio frames written this run, end-of-audio marker excluded.
    pub frames_sent: u64,
    /// Chunks captured this run that were not forwarded.
    pub chunks_dropped: u64,
    pub events_ignored: u64,
    /// Stage timeout announced by the server. Informational only.
    pub stage_timeout_secs: Option<u64>,
}

/// Result of asking for an audio run.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// Run requested; audio is forwarded once the server assigns a handler.
    Started { sample_rate: u32 },
    /// Microphone unavailable. No run was opened; text input still works.
    CaptureUnavailable(CaptureError),
}

struct Shared {
    transport: Arc<dyn Transport>,
    transcript: Transcript,
    server_url: String,
    core: Mutex<SessionCore>,
    state_tx: watch::Sender<SessionState>,
}

/// Orchestrates assist pipeline runs over a [`Transport`].
#[derive(Clone)]
pub struct PipelineSession {
    shared: Arc<Shared>,
}

impl PipelineSession {
    /// Create an idle session.
    ///
    /// `server_url` is the base URL that relative media paths from tts-end
    /// are resolved against.
    pub fn new(
        transport: Arc<dyn Transport>,
        bridge: AudioBridge,
        transcript: Transcript,
        server_url: impl Into<String>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                transport,
                transcript,
                server_url: server_url.into(),
                core: Mutex::new(SessionCore {
                    state: SessionState::Idle,
                    epoch: 0,
                    run: None,
                    handle: None,
                    bridge,
                    stats: RunStats::default(),
                }),
                state_tx,
            }),
        }
    }

    /// Run `text` through `pipeline` from intent recognition to `end_stage`.
    ///
    /// Any active run is cancelled first.
    ///
    /// # Errors
    /// `EmptyInput` for blank text (no run is opened), or the transport
    /// error if the subscription could not be opened (the session is then in
    /// the error state).
    pub async fn start_text(&self, pipeline: &str, end_stage: Stage, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HassistError::EmptyInput);
        }

        let run = RunConfig::text(pipeline, text, end_stage);
        let epoch = {
            let mut core = self.shared.lock();
            self.shared.supersede(&mut core);
            let epoch = core.begin(run.clone());
            self.shared.apply(&mut core, &Input::StartText(text));
            epoch
        };
        self.shared.open_subscription(epoch, &run).await
    }

    /// Open the microphone and start a speech run on `pipeline`.
    ///
    /// Any active run is cancelled first. A microphone failure is not an
    /// error: it is reported as [`StartOutcome::CaptureUnavailable`] and
    /// recorded in the transcript.
    pub async fn start_audio(
        &self,
        pipeline: &str,
        end_stage: Stage,
        sample_rate_hint: u32,
    ) -> Result<StartOutcome> {
        let (epoch, run) = {
            let mut core = self.shared.lock();
            self.shared.supersede(&mut core);

            let stream = match core.bridge.start_capture(sample_rate_hint) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "microphone unavailable");
                    let detail = e.to_string();
                    self.shared
                        .apply(&mut core, &Input::CaptureUnavailable(&detail));
                    return Ok(StartOutcome::CaptureUnavailable(e));
                }
            };

            let run = RunConfig::audio(pipeline, stream.sample_rate, end_stage);
            let epoch = core.begin(run.clone());
            self.shared.apply(&mut core, &Input::StartAudio);
            if let Err(e) = spawn_forwarder(Arc::downgrade(&self.shared), epoch, stream.chunks) {
                self.shared.apply(&mut core, &Input::Cancel);
                return Err(e);
            }
            (epoch, run)
        };

        let sample_rate = match run.input {
            InputMode::Audio { sample_rate } => sample_rate,
            InputMode::Text(_) => sample_rate_hint,
        };
        self.shared.open_subscription(epoch, &run).await?;
        Ok(StartOutcome::Started { sample_rate })
    }

    /// Cancel the active run: stop capture and playback, cancel the
    /// subscription. Returns false when there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut core = self.shared.lock();
        self.shared.apply(&mut core, &Input::Cancel)
    }

    /// Stop response playback without touching the run.
    pub fn stop_playback(&self) -> bool {
        self.shared.lock().bridge.stop_playback()
    }

    /// Whether a spoken response is still playing.
    pub fn is_playing(&self) -> bool {
        self.shared.lock().bridge.is_playing()
    }

    /// Wait until the spoken response, if any, has finished playing.
    pub async fn playback_finished(&self) {
        let interval = std::time::Duration::from_millis(defaults::PLAYBACK_POLL_MS);
        while self.is_playing() {
            tokio::time::sleep(interval).await;
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until no run is active and return the state it settled in.
    pub async fn settled(&self) -> SessionState {
        let mut rx = self.watch_state();
        match rx.wait_for(|state| !state.is_active()).await {
            Ok(state) => state.clone(),
            // Sender lives in `self`, so it cannot be gone here.
            Err(_) => self.state(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.shared.lock();
        let handle = core.handle.as_ref();
        SessionSnapshot {
            state: core.state.clone(),
            epoch: core.epoch,
            handler_id: handle.and_then(|h| h.handler_id),
            accepting_audio: handle.is_some_and(|h| h.accept_audio),
            capturing: core.bridge.is_capturing(),
            frames_sent: core.stats.frames_sent,
            chunks_dropped: core.stats.chunks_dropped,
            events_ignored: core.stats.events_ignored,
            stage_timeout_secs: core.stats.stage_timeout_secs,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.shared.transcript
    }
}

impl std::fmt::Debug for PipelineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSession")
            .field("server_url", &self.shared.server_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel the active run, if any, before a new one starts.
    fn supersede(&self, core: &mut SessionCore) {
        if core.state.is_active() {
            tracing::info!(epoch = core.epoch, "superseding active run");
            self.apply(core, &Input::Cancel);
        }
    }

    /// Feed one input to the state machine and execute its effects.
    ///
    /// Returns false if the input was ignored in the current state.
    fn apply(&self, core: &mut SessionCore, input: &Input<'_>) -> bool {
        let previous = core.state.clone();
        let step = machine::transition(&previous, input, core.run.as_ref());
        if step.ignored {
            tracing::debug!(state = previous.name(), ?input, "input ignored");
            if matches!(input, Input::Event(_)) {
                core.stats.events_ignored += 1;
            }
            return false;
        }

        if previous != step.next {
            tracing::info!(
                epoch = core.epoch,
                from = previous.name(),
                to = step.next.name(),
                "session transition"
            );
        }
        if let SessionState::Error(ref detail) = step.next {
            tracing::error!(epoch = core.epoch, detail = %detail, "run failed");
        }

        core.state = step.next;
        for effect in step.effects {
            self.execute(core, effect);
        }
        self.state_tx.send_replace(core.state.clone());
        true
    }

    fn execute(&self, core: &mut SessionCore, effect: Effect) {
        match effect {
            Effect::Append(kind, content) => {
                self.transcript.append(kind, content);
            }
            Effect::StoreHandler(id) => {
                if let Some(handle) = core.handle.as_mut() {
                    handle.handler_id = Some(id);
                }
            }
            Effect::AcceptAudio(accept) => {
                if let Some(handle) = core.handle.as_mut() {
                    handle.accept_audio = accept;
                }
            }
            Effect::StopCapture => {
                core.bridge.stop_capture();
            }
            Effect::SendEndOfAudio => {
                if let Some(id) = core.handle.as_ref().and_then(|h| h.handler_id)
                    && let Err(e) = self
                        .transport
                        .send_frame(codec::encode_audio_frame(id, &[]))
                {
                    tracing::warn!(error = %e, "failed to send end-of-audio marker");
                }
            }
            Effect::Play(path) => {
                let url = resolve_media_url(&self.server_url, &path);
                if let Err(e) = core.bridge.play(&url) {
                    tracing::warn!(error = %e, url = %url, "response playback failed");
                    self.transcript.append(EntryKind::Info, e.to_string());
                }
            }
            Effect::StopPlayback => {
                core.bridge.stop_playback();
            }
            Effect::RecordTimeout(secs) => {
                tracing::info!(timeout_secs = secs, "server stage timeout");
                core.stats.stage_timeout_secs = Some(secs);
            }
            Effect::EndRun => {
                if let Some(handle) = core.handle.take()
                    && let Some(subscription) = handle.subscription
                {
                    subscription.cancel();
                }
                core.bridge.stop_capture();
            }
        }
    }

    async fn open_subscription(self: &Arc<Self>, epoch: u64, run: &RunConfig) -> Result<()> {
        let weak = Arc::downgrade(self);
        let on_event: EventCallback = Box::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_transport_event(epoch, event);
            }
        });

        match self
            .transport
            .subscribe(codec::encode_run(run), on_event)
            .await
        {
            Ok(subscription) => {
                let mut core = self.lock();
                match core.handle.as_mut() {
                    Some(handle) if handle.epoch == epoch => {
                        handle.subscription = Some(subscription);
                    }
                    _ => {
                        tracing::debug!(epoch, "run ended before its subscription opened");
                        subscription.cancel();
                    }
                }
                Ok(())
            }
            Err(e) => {
                let mut core = self.lock();
                if core.is_current(epoch) {
                    let reason = e.to_string();
                    self.apply(&mut core, &Input::SubscriptionDropped(&reason));
                }
                Err(e.into())
            }
        }
    }

    fn handle_transport_event(&self, epoch: u64, event: TransportEvent) {
        let mut core = self.lock();
        if !core.is_current(epoch) {
            tracing::debug!(epoch, active = core.epoch, "dropping stale delivery");
            return;
        }

        match event {
            TransportEvent::Message(raw) => match codec::decode(&raw) {
                Ok(event) => {
                    tracing::debug!(
                        epoch,
                        event = event.kind.tag(),
                        timestamp = event.timestamp.as_deref().unwrap_or(""),
                        "pipeline event"
                    );
                    self.apply(&mut core, &Input::Event(&event.kind));
                }
                Err(DecodeError::UnknownStage { tag }) => {
                    tracing::debug!(epoch, tag = %tag, "ignoring unknown pipeline stage");
                    core.stats.events_ignored += 1;
                }
                Err(e) => {
                    self.apply(&mut core, &Input::Malformed(&e));
                }
            },
            TransportEvent::Closed(reason) => {
                self.apply(&mut core, &Input::SubscriptionDropped(&reason));
            }
        }
    }

    fn handle_chunk(&self, epoch: u64, chunk: Vec<u8>) {
        // An empty frame would read as end-of-audio.
        if chunk.is_empty() {
            return;
        }

        let mut core = self.lock();
        if !core.is_current(epoch) {
            return;
        }
        let gate = core
            .handle
            .as_ref()
            .filter(|h| h.accept_audio)
            .and_then(|h| h.handler_id);

        match gate {
            Some(id) => match self
                .transport
                .send_frame(codec::encode_audio_frame(id, &chunk))
            {
                Ok(()) => core.stats.frames_sent += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to send audio frame");
                    core.stats.chunks_dropped += 1;
                }
            },
            None => core.stats.chunks_dropped += 1,
        }
    }
}

/// Drain captured chunks into the session until the capture stream ends.
fn spawn_forwarder(shared: Weak<Shared>, epoch: u64, chunks: Receiver<Vec<u8>>) -> Result<()> {
    std::thread::Builder::new()
        .name(format!("chunk-forwarder-{epoch}"))
        .spawn(move || {
            for chunk in chunks.iter() {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.handle_chunk(epoch, chunk);
            }
            tracing::debug!(epoch, "capture stream ended");
        })?;
    Ok(())
}

/// Absolute URL for a media path reported by the server.
///
/// Absolute http(s) URLs pass through; anything else is joined to the
/// server base URL.
pub fn resolve_media_url(server_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        server_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{MockCapture, MockPlayback};
    use crate::error::TransportError;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    struct Rig {
        session: PipelineSession,
        transport: Arc<MockTransport>,
        capture: MockCapture,
        playback: MockPlayback,
    }

    fn rig_with(capture: MockCapture) -> Rig {
        let transport = Arc::new(MockTransport::new());
        let playback = MockPlayback::new();
        let bridge = AudioBridge::new(Box::new(capture.clone()), Box::new(playback.clone()));
        let session = PipelineSession::new(
            transport.clone(),
            bridge,
            Transcript::new(),
            "http://ha.local:8123/",
        );
        Rig {
            session,
            transport,
            capture,
            playback,
        }
    }

    fn rig() -> Rig {
        rig_with(MockCapture::new())
    }

    fn ev(tag: &str, data: serde_json::Value) -> serde_json::Value {
        json!({ "type": tag, "timestamp": "2024-01-01T00:00:00Z", "data": data })
    }

    #[test]
    fn test_resolve_media_url() {
        assert_eq!(
            resolve_media_url("http://ha.local:8123/", "/api/tts_proxy/a.mp3"),
            "http://ha.local:8123/api/tts_proxy/a.mp3"
        );
        assert_eq!(
            resolve_media_url("http://ha.local:8123", "api/tts_proxy/a.mp3"),
            "http://ha.local:8123/api/tts_proxy/a.mp3"
        );
        assert_eq!(
            resolve_media_url("http://ha.local:8123", "https://cdn.example/a.mp3"),
            "https://cdn.example/a.mp3"
        );
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_without_run() {
        let rig = rig();
        let result = rig.session.start_text("p", Stage::Intent, "   ").await;
        assert!(matches!(result, Err(HassistError::EmptyInput)));
        assert_eq!(rig.transport.subscription_count(), 0);
        assert_eq!(rig.session.state(), SessionState::Idle);
        assert!(rig.session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_text_run_records_timeout() {
        let rig = rig();
        rig.session.start_text("p", Stage::Intent, "hello").await.unwrap();
        rig.transport
            .emit(ev("run-start", json!({ "runner_data": { "timeout": 300 } })));
        assert_eq!(rig.session.snapshot().stage_timeout_secs, Some(300));
        assert_eq!(
            rig.session.state(),
            SessionState::Processing(ProcessingStage::Intent)
        );
    }

    #[tokio::test]
    async fn test_subscribe_failure_moves_to_error() {
        let rig = rig();
        rig.transport.fail_next_subscribe(TransportError::SendFailed {
            message: "socket closed".to_string(),
        });
        let result = rig.session.start_text("p", Stage::Intent, "hello").await;
        assert!(matches!(result, Err(HassistError::Transport(_))));
        assert!(matches!(rig.session.state(), SessionState::Error(_)));
        let last = rig.session.transcript().last().unwrap();
        assert_eq!(last.kind, EntryKind::Error);
        assert!(last.content.contains("socket closed"));
    }

    #[tokio::test]
    async fn test_capture_failure_keeps_text_path() {
        let rig = rig_with(MockCapture::new().with_start_failure(CaptureError::NoDevice {
            device: "default".to_string(),
        }));
        let outcome = rig
            .session
            .start_audio("p", Stage::Tts, 16000)
            .await
            .unwrap();
        assert!(matches!(outcome, StartOutcome::CaptureUnavailable(_)));
        assert_eq!(
            rig.session.state(),
            SessionState::Listening(ListenMode::TextPending)
        );
        assert_eq!(rig.transport.subscription_count(), 0);
        assert_eq!(rig.session.transcript().all()[0].kind, EntryKind::Info);

        rig.session.start_text("p", Stage::Intent, "lights on").await.unwrap();
        assert_eq!(rig.transport.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_audio_run_request_uses_negotiated_rate() {
        let rig = rig_with(MockCapture::new().with_negotiated_rate(48000));
        let outcome = rig
            .session
            .start_audio("p", Stage::Tts, 16000)
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started { sample_rate: 48000 });
        let request = rig.transport.subscription_request(0).unwrap();
        assert_eq!(request["input"], json!({ "sample_rate": 48000 }));
        assert_eq!(request["start_stage"], "stt");
        assert_eq!(request["end_stage"], "tts");
        rig.session.cancel();
    }

    #[tokio::test]
    async fn test_tts_end_plays_resolved_url() {
        let rig = rig();
        rig.session
            .start_audio("p", Stage::Tts, 16000)
            .await
            .unwrap();
        rig.transport.emit(ev(
            "run-start",
            json!({ "runner_data": { "stt_binary_handler_id": 1 } }),
        ));
        rig.transport
            .emit(ev("stt-end", json!({ "stt_output": { "text": "time" } })));
        rig.transport.emit(ev(
            "intent-end",
            json!({ "intent_output": { "response": { "speech": { "plain": { "speech": "Noon" } } } } }),
        ));
        assert_eq!(rig.session.state(), SessionState::Responding);
        rig.transport.emit(ev(
            "tts-end",
            json!({ "tts_output": { "url": "/api/tts_proxy/n.mp3" } }),
        ));

        assert_eq!(rig.session.state(), SessionState::Idle);
        assert_eq!(
            rig.playback.played(),
            vec!["http://ha.local:8123/api/tts_proxy/n.mp3".to_string()]
        );
        assert_eq!(rig.transport.cancel_count(0), 1);
        assert_eq!(rig.capture.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_playback_failure_is_informational() {
        let transport = Arc::new(MockTransport::new());
        let playback = MockPlayback::new().with_failure(crate::error::PlaybackError::PlayerNotFound {
            player: "mpv".to_string(),
        });
        let bridge = AudioBridge::new(Box::new(MockCapture::new()), Box::new(playback));
        let session = PipelineSession::new(transport.clone(), bridge, Transcript::new(), "http://ha");

        session.start_audio("p", Stage::Tts, 16000).await.unwrap();
        transport.emit(ev(
            "run-start",
            json!({ "runner_data": { "stt_binary_handler_id": 2 } }),
        ));
        transport.emit(ev("stt-end", json!({ "stt_output": { "text": "x" } })));
        transport.emit(ev(
            "intent-end",
            json!({ "intent_output": { "response": { "speech": { "plain": { "speech": "y" } } } } }),
        ));
        transport.emit(ev("tts-end", json!({ "tts_output": { "url": "/a.mp3" } })));

        assert_eq!(session.state(), SessionState::Idle);
        let last = session.transcript().last().unwrap();
        assert_eq!(last.kind, EntryKind::Info);
        assert_eq!(last.content, "Audio player not found: mpv");
    }

    #[tokio::test]
    async fn test_unknown_stage_is_counted_and_ignored() {
        let rig = rig();
        rig.session.start_text("p", Stage::Intent, "hello").await.unwrap();
        rig.transport.emit(ev("stt-partial", json!({})));
        rig.transport.emit(ev("intent-start", json!({})));
        let snapshot = rig.session.snapshot();
        assert_eq!(snapshot.events_ignored, 2);
        assert!(snapshot.state.is_active());
    }

    #[tokio::test]
    async fn test_malformed_event_is_fatal() {
        let rig = rig();
        rig.session.start_text("p", Stage::Intent, "hello").await.unwrap();
        rig.transport.emit(ev("intent-end", json!({ "nope": true })));
        assert!(matches!(rig.session.state(), SessionState::Error(_)));
        assert_eq!(rig.transport.cancel_count(0), 1);
    }

    #[tokio::test]
    async fn test_closed_subscription_is_fatal() {
        let rig = rig();
        rig.session.start_text("p", Stage::Intent, "hello").await.unwrap();
        rig.transport.close("connection lost");
        assert_eq!(
            rig.session.state(),
            SessionState::Error("Subscription dropped: connection lost".to_string())
        );
    }

    #[tokio::test]
    async fn test_new_start_supersedes_active_run() {
        let rig = rig();
        rig.session.start_text("p", Stage::Intent, "first").await.unwrap();
        rig.session.start_text("p", Stage::Intent, "second").await.unwrap();

        assert_eq!(rig.transport.subscription_count(), 2);
        assert_eq!(rig.transport.cancel_count(0), 1);
        assert_eq!(rig.transport.cancel_count(1), 0);
        assert_eq!(rig.session.snapshot().epoch, 2);
    }

    #[tokio::test]
    async fn test_stop_playback_leaves_run_alone() {
        let rig = rig();
        assert!(!rig.session.stop_playback());
        rig.session.start_text("p", Stage::Intent, "hi").await.unwrap();
        assert!(!rig.session.stop_playback());
        assert!(rig.session.state().is_active());
    }

    #[tokio::test]
    async fn test_playback_finished_waits_for_player() {
        let rig = rig();
        rig.session.start_text("p", Stage::Tts, "what time is it").await.unwrap();
        let request = rig.transport.subscription_request(0).unwrap();
        assert_eq!(request["start_stage"], "intent");
        assert_eq!(request["end_stage"], "tts");
        rig.transport.emit(ev(
            "intent-end",
            json!({ "intent_output": { "response": { "speech": { "plain": { "speech": "Noon" } } } } }),
        ));
        assert_eq!(rig.session.state(), SessionState::Responding);
        rig.transport.emit(ev("tts-end", json!({ "tts_output": { "url": "/n.mp3" } })));
        assert_eq!(rig.session.settled().await, SessionState::Idle);
        assert!(rig.session.is_playing());

        let wait = rig.session.playback_finished();
        tokio::pin!(wait);
        let early = tokio::time::timeout(std::time::Duration::from_millis(120), &mut wait).await;
        assert!(early.is_err());

        rig.playback.finish();
        tokio::time::timeout(std::time::Duration::from_secs(2), wait)
            .await
            .unwrap();
        assert!(!rig.session.is_playing());
        assert_eq!(rig.playback.stop_calls(), 0);
    }

    #[tokio::test]
    async fn test_settled_returns_terminal_state() {
        let rig = rig();
        rig.session.start_text("p", Stage::Intent, "hi").await.unwrap();
        rig.transport.emit(ev("run-end", json!(null)));
        assert_eq!(rig.session.settled().await, SessionState::Idle);
    }
}
