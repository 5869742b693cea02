//! chatkit-wire: protocol types for the chatkit agent stream
//!
//! This crate owns the wire format shared by the streaming and
//! non-streaming paths: the typed [`StreamEvent`] union, the incremental
//! SSE record parser, and the JSON request/response types.

pub mod events;
pub mod parser;
pub mod types;

pub use events::{AgentStep, DecodeError, StreamEvent};
pub use parser::{SseParser, feed};
pub use types::*;
