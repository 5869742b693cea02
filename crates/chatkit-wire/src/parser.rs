//! Incremental parser for the line-oriented agent event stream
//!
//! The wire format is one record per event:
//!
//! ```text
//! event: <kind>
//! data: <json>
//! <blank line>
//! ```
//!
//! Chunks arrive with arbitrary boundaries, including mid-line and
//! mid-record. [`feed`] consumes only complete lines; any trailing
//! un-terminated record is returned verbatim as the remaining buffer and
//! must be prepended to the next call. No event is ever split, lost, or
//! double-emitted across chunk boundaries.

use crate::events::StreamEvent;

/// Parse as many complete records as possible from `buffer` + `chunk`.
///
/// Returns the decoded events in arrival order and the remaining
/// unconsumed text. Records whose `data:` line is not valid JSON are
/// dropped (logged at debug level) without affecting later records.
pub fn feed(buffer: &str, chunk: &str) -> (Vec<StreamEvent>, String) {
    let combined = if buffer.is_empty() {
        chunk.to_string()
    } else {
        let mut s = String::with_capacity(buffer.len() + chunk.len());
        s.push_str(buffer);
        s.push_str(chunk);
        s
    };

    let mut events = Vec::new();
    let mut event_type = String::new();
    let mut event_data = String::new();
    // Raw text of the current un-terminated record, replayed on the next feed.
    let mut pending = String::new();

    let mut rest = combined.as_str();
    while let Some(pos) = rest.find('\n') {
        let line = &rest[..pos];
        rest = &rest[pos + 1..];

        if let Some(kind) = line.strip_prefix("event: ") {
            event_type = kind.trim().to_string();
            pending.push_str(line);
            pending.push('\n');
        } else if let Some(data) = line.strip_prefix("data: ") {
            event_data = data.to_string();
            pending.push_str(line);
            pending.push('\n');
        } else if line.is_empty() && !event_type.is_empty() && !event_data.is_empty() {
            match StreamEvent::decode(&event_type, &event_data) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::debug!(kind = %event_type, error = %e, "dropping malformed stream record");
                }
            }
            event_type.clear();
            event_data.clear();
            pending.clear();
        }
        // Other lines (comments, stray blanks) are ignored.
    }

    // The final partial line, if any, carries over together with the
    // un-terminated record.
    pending.push_str(rest);
    (events, pending)
}

/// Stateful wrapper around [`feed`] that owns the carry-over buffer.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of decoded text, yielding all newly-completed events.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        let (events, remaining) = feed(&self.buffer, chunk);
        self.buffer = remaining;
        events
    }

    /// Unconsumed trailing text waiting for the next chunk.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }
}
