//! Transport seam: the persistent server connection.
//!
//! hassist does not open sockets itself. A transport multiplexes run
//! subscriptions, answers request/response calls and writes binary audio
//! frames. Implementations deliver subscription traffic on their own task or
//! thread through the callback passed to [`Transport::subscribe`].

pub mod mock;
pub mod replay;

use crate::codec::OutboundMessage;
use crate::error::TransportError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Something delivered on a run subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One inbound event payload, still undecoded.
    Message(Value),
    /// The subscription ended from the transport side.
    Closed(String),
}

/// Callback invoked for every delivery on a subscription.
pub type EventCallback = Box<dyn Fn(TransportEvent) + Send + Sync + 'static>;

/// Handle to an open subscription.
pub trait Subscription: Send + Sync {
    /// Ask the transport to unsubscribe. Must be idempotent.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

impl Subscription for CancellationToken {
    fn cancel(&self) {
        CancellationToken::cancel(self);
    }

    fn is_cancelled(&self) -> bool {
        CancellationToken::is_cancelled(self)
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a subscription with `request` and deliver its traffic to `on_event`.
    async fn subscribe(
        &self,
        request: OutboundMessage,
        on_event: EventCallback,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Request/response call.
    async fn send(&self, request: OutboundMessage) -> Result<Value, TransportError>;

    /// Queue a frame for writing without waiting. Must not call back into
    /// any subscription callback.
    fn send_frame(&self, frame: OutboundMessage) -> Result<(), TransportError>;
}
