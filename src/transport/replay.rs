//! Transport that replays a recorded run.
//!
//! Events are read from a JSON Lines file (one inbound event object per line,
//! blank lines and `#` comments skipped) and delivered on a tokio task with a
//! fixed delay between them, followed by a close once the recording is
//! exhausted. Frames written by the session are counted but
//! otherwise discarded, so a replay shows exactly what the client would have
//! streamed.

use crate::codec::OutboundMessage;
use crate::defaults;
use crate::error::{HassistError, Result, TransportError};
use crate::transport::{EventCallback, Subscription, Transport, TransportEvent};
use serde_json::Value;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct FrameStats {
    frames: AtomicUsize,
    audio_bytes: AtomicUsize,
    end_markers: AtomicUsize,
}

pub struct ReplayTransport {
    events: Arc<Vec<Value>>,
    catalog: Option<Value>,
    delay: Duration,
    stats: FrameStats,
}

impl ReplayTransport {
    pub fn new(events: Vec<Value>) -> Self {
        Self {
            events: Arc::new(events),
            catalog: None,
            delay: Duration::from_millis(defaults::REPLAY_EVENT_DELAY_MS),
            stats: FrameStats::default(),
        }
    }

    /// Parse a JSON Lines stream of recorded events.
    pub fn from_jsonl<R: BufRead>(reader: R) -> Result<Self> {
        let mut events = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let value: Value = serde_json::from_str(trimmed).map_err(|e| HassistError::Replay {
                message: format!("line {}: {}", index + 1, e),
            })?;
            events.push(value);
        }
        Ok(Self::new(events))
    }

    /// Load a recorded run from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| HassistError::Replay {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_jsonl(std::io::BufReader::new(file))
    }

    /// Answer pipeline list requests with `response`.
    pub fn with_catalog(mut self, response: Value) -> Self {
        self.catalog = Some(response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Audio frames written, end-of-audio markers included.
    pub fn frames_received(&self) -> usize {
        self.stats.frames.load(Ordering::Relaxed)
    }

    /// PCM bytes received, handler-id prefixes excluded.
    pub fn audio_bytes_received(&self) -> usize {
        self.stats.audio_bytes.load(Ordering::Relaxed)
    }

    pub fn end_markers_received(&self) -> usize {
        self.stats.end_markers.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transport for ReplayTransport {
    async fn subscribe(
        &self,
        request: OutboundMessage,
        on_event: EventCallback,
    ) -> std::result::Result<Box<dyn Subscription>, TransportError> {
        if request.as_json().is_none() {
            return Err(TransportError::SendFailed {
                message: "subscription request must be JSON".to_string(),
            });
        }
        tracing::debug!(events = self.events.len(), "replaying recorded run");

        let token = CancellationToken::new();
        let task_token = token.clone();
        let events = Arc::clone(&self.events);
        let delay = self.delay;

        tokio::spawn(async move {
            for event in events.iter() {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                on_event(TransportEvent::Message(event.clone()));
            }
            if task_token.is_cancelled() {
                return;
            }
            tracing::debug!("replay finished");
            // A recording that stops mid-run ends the run like a lost connection.
            on_event(TransportEvent::Closed("end of recording".to_string()));
        });

        Ok(Box::new(token))
    }

    async fn send(&self, request: OutboundMessage) -> std::result::Result<Value, TransportError> {
        let Some(body) = request.as_json() else {
            return Err(TransportError::SendFailed {
                message: "request must be JSON".to_string(),
            });
        };
        match (body.get("type").and_then(Value::as_str), &self.catalog) {
            (Some(defaults::PIPELINE_LIST_MESSAGE_TYPE), Some(catalog)) => Ok(catalog.clone()),
            (Some(kind), _) => Err(TransportError::SendFailed {
                message: format!("no recorded response for {kind}"),
            }),
            (None, _) => Err(TransportError::SendFailed {
                message: "request has no type".to_string(),
            }),
        }
    }

    fn send_frame(&self, frame: OutboundMessage) -> std::result::Result<(), TransportError> {
        let Some(bytes) = frame.as_binary() else {
            return Err(TransportError::SendFailed {
                message: "JSON payload written as a frame".to_string(),
            });
        };
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        if bytes.len() <= 1 {
            self.stats.end_markers.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats
                .audio_bytes
                .fetch_add(bytes.len() - 1, Ordering::Relaxed);
        }
        Ok(())
    }
}
