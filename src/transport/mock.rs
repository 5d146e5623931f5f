//! In-memory transport for tests.
//!
//! Records every subscription request and frame, and lets the test push
//! server events into any subscription, including ones the session already
//! cancelled (to exercise stale-delivery handling).

use crate::codec::OutboundMessage;
use crate::error::TransportError;
use crate::transport::{EventCallback, Subscription, Transport, TransportEvent};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Subscription handle that counts cancel calls.
#[derive(Debug, Default)]
pub struct MockSubscription {
    cancels: AtomicUsize,
}

impl MockSubscription {
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Subscription for Arc<MockSubscription> {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_count() > 0
    }
}

struct Subscribed {
    request: Value,
    callback: Arc<EventCallback>,
    handle: Arc<MockSubscription>,
}

#[derive(Default)]
struct MockState {
    subscriptions: Vec<Subscribed>,
    requests: Vec<OutboundMessage>,
    responses: VecDeque<Result<Value, TransportError>>,
    frames: Vec<Vec<u8>>,
    subscribe_failure: Option<TransportError>,
    frame_failure: Option<TransportError>,
}

/// Scriptable [`Transport`] double.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next [`Transport::send`] call.
    pub fn push_response(&self, response: Result<Value, TransportError>) {
        self.lock().responses.push_back(response);
    }

    /// Make the next subscribe call fail.
    pub fn fail_next_subscribe(&self, error: TransportError) {
        self.lock().subscribe_failure = Some(error);
    }

    /// Make every frame write fail.
    pub fn fail_frames(&self, error: TransportError) {
        self.lock().frame_failure = Some(error);
    }

    /// Deliver `event` on the most recent subscription.
    ///
    /// Returns false if nothing has subscribed yet.
    pub fn emit(&self, event: Value) -> bool {
        self.deliver_latest(TransportEvent::Message(event))
    }

    /// Deliver `event` on subscription number `index` (0-based).
    pub fn emit_to(&self, index: usize, event: Value) -> bool {
        let callback = self
            .lock()
            .subscriptions
            .get(index)
            .map(|s| Arc::clone(&s.callback));
        match callback {
            Some(cb) => {
                cb(TransportEvent::Message(event));
                true
            }
            None => false,
        }
    }

    /// Close the most recent subscription from the transport side.
    pub fn close(&self, reason: &str) -> bool {
        self.deliver_latest(TransportEvent::Closed(reason.to_string()))
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Request payload of subscription number `index`.
    pub fn subscription_request(&self, index: usize) -> Option<Value> {
        self.lock()
            .subscriptions
            .get(index)
            .map(|s| s.request.clone())
    }

    /// Cancel calls received by subscription number `index`.
    pub fn cancel_count(&self, index: usize) -> usize {
        self.lock()
            .subscriptions
            .get(index)
            .map(|s| s.handle.cancel_count())
            .unwrap_or(0)
    }

    /// Request/response calls received so far.
    pub fn requests(&self) -> Vec<OutboundMessage> {
        self.lock().requests.clone()
    }

    /// Binary frames written so far, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.lock().frames.clone()
    }

    fn deliver_latest(&self, event: TransportEvent) -> bool {
        // Callback runs without our lock held: it re-enters the session,
        // which may write frames back into this transport.
        let callback = self
            .lock()
            .subscriptions
            .last()
            .map(|s| Arc::clone(&s.callback));
        match callback {
            Some(cb) => {
                cb(event);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn subscribe(
        &self,
        request: OutboundMessage,
        on_event: EventCallback,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let mut state = self.lock();
        if let Some(error) = state.subscribe_failure.take() {
            return Err(error);
        }
        let handle = Arc::new(MockSubscription::default());
        state.subscriptions.push(Subscribed {
            request: request.as_json().cloned().unwrap_or(Value::Null),
            callback: Arc::new(on_event),
            handle: Arc::clone(&handle),
        });
        Ok(Box::new(handle))
    }

    async fn send(&self, request: OutboundMessage) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state.requests.push(request);
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| {
                Err(TransportError::SendFailed {
                    message: "no response scripted".to_string(),
                })
            })
    }

    fn send_frame(&self, frame: OutboundMessage) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(ref error) = state.frame_failure {
            return Err(error.clone());
        }
        match frame {
            OutboundMessage::Binary(bytes) => {
                state.frames.push(bytes);
                Ok(())
            }
            OutboundMessage::Json(_) => Err(TransportError::SendFailed {
                message: "JSON payload written as a frame".to_string(),
            }),
        }
    }
}
