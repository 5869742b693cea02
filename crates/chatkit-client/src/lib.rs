//! chatkit-client: embeddable chat widget client
//!
//! This crate drives a conversation with the chatkit agent backend:
//! opening cancellable event streams, dispatching decoded events to
//! handlers, and maintaining the transcript state machine with
//! confirmation gating.

pub mod api;
pub mod chat;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod session;
pub mod timeline;
pub mod transport;

pub use api::{ApiClient, TokenRefresh};
pub use chat::{Chat, ChatConfig, ChatHandle, SuggestedAction, WidgetEvent};
pub use dispatch::{StreamHandler, dispatch};
pub use error::{Error, Result};
pub use session::{ChatMessage, ConfirmState, MessageKind, Role, Session, TurnPhase};
pub use transport::{EventStream, StreamRequest, StreamTransport};
