//! Transport abstraction for opening event streams

use std::pin::Pin;

use async_trait::async_trait;
use chatkit_wire::StreamEvent;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A stream of decoded agent events.
///
/// Mid-stream transport failures surface as a final
/// [`StreamEvent::Error`] item; cancellation simply ends the stream.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Which streaming endpoint a turn goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    /// Send a user message, optionally continuing a conversation
    Chat {
        message: String,
        conversation_id: Option<String>,
    },
    /// Continue after the user accepted a pending confirmation
    Confirm { conversation_id: String },
}

/// Transport for opening a cancellable agent event stream.
///
/// An `Err` here means the stream never opened (network failure or a
/// non-2xx status with the body read as text); no events were parsed.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, request: StreamRequest, cancel: CancellationToken)
    -> Result<EventStream>;
}
