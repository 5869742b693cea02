//! Typed stream events and agent reasoning steps

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of agent reasoning within a turn.
///
/// A step is pending while `observation` is absent and complete once it
/// arrives. The `action` field may be a comma-joined list when the agent
/// invoked several tools in parallel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    /// Zero-based step index
    pub step: usize,
    /// The agent's reasoning text for this step
    pub thought: String,
    /// Tool invocation, if any
    #[serde(default)]
    pub action: Option<String>,
    /// Parameters of the tool invocation
    #[serde(default)]
    pub action_params: Option<Value>,
    /// Tool output, once it arrives
    #[serde(default)]
    pub observation: Option<String>,
}

impl AgentStep {
    /// Whether the step's tool invocation has completed.
    pub fn is_complete(&self) -> bool {
        self.observation.is_some()
    }
}

/// Events decoded from the agent event stream.
///
/// The wire format carries an event name plus a JSON payload per record;
/// the payload is decoded into the matching variant exactly once, at the
/// parser boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event of a turn: the server-assigned conversation id
    Init { conversation_id: String },
    /// A full reasoning step (possibly still pending)
    Step(AgentStep),
    /// The agent started thinking within a step
    Thinking { step: usize, thought: String },
    /// The agent invoked a tool
    ToolCall {
        step: usize,
        tool: String,
        #[serde(default)]
        params: Value,
    },
    /// A tool returned its observation
    ToolResult {
        step: usize,
        tool: String,
        observation: String,
    },
    /// The server proposes an operation requiring explicit accept/reject
    Confirmation {
        action: String,
        #[serde(default)]
        params: Value,
        description: String,
    },
    /// Final message content for the turn
    Message { content: String },
    /// Error surfaced by the server mid-stream
    Error { message: String },
    /// Terminal event: the consuming loop must stop reading after this
    Done {
        #[serde(default)]
        steps: Vec<AgentStep>,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Failure to turn a wire record into a [`StreamEvent`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    #[error("event payload is not a JSON object")]
    NotAnObject,

    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
}

const KNOWN_KINDS: &[&str] = &[
    "init",
    "step",
    "thinking",
    "tool_call",
    "tool_result",
    "confirmation",
    "message",
    "error",
    "done",
];

impl StreamEvent {
    /// Decode a wire record from its event name and raw JSON data line.
    pub fn decode(kind: &str, data: &str) -> Result<Self, DecodeError> {
        if !KNOWN_KINDS.contains(&kind) {
            return Err(DecodeError::UnknownKind(kind.to_string()));
        }

        let mut payload: Value = serde_json::from_str(data)?;
        let obj = payload.as_object_mut().ok_or(DecodeError::NotAnObject)?;
        obj.insert("type".to_string(), Value::String(kind.to_string()));

        Ok(serde_json::from_value(payload)?)
    }

    /// The wire name of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Init { .. } => "init",
            StreamEvent::Step(_) => "step",
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Confirmation { .. } => "confirmation",
            StreamEvent::Message { .. } => "message",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done { .. } => "done",
        }
    }

    /// Whether this event terminates the stream.
    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done { .. })
    }

    /// Whether this event finalizes the in-flight transcript message.
    pub fn finalizes_message(&self) -> bool {
        matches!(
            self,
            StreamEvent::Message { .. }
                | StreamEvent::Confirmation { .. }
                | StreamEvent::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_init() {
        let ev = StreamEvent::decode("init", r#"{"conversation_id":"c1"}"#).unwrap();
        assert_eq!(
            ev,
            StreamEvent::Init {
                conversation_id: "c1".into()
            }
        );
    }

    #[test]
    fn test_decode_step_pending() {
        let ev = StreamEvent::decode(
            "step",
            r#"{"step":0,"thought":"looking","action":"search_records","action_params":{"q":"x"}}"#,
        )
        .unwrap();
        match ev {
            StreamEvent::Step(step) => {
                assert_eq!(step.step, 0);
                assert_eq!(step.action.as_deref(), Some("search_records"));
                assert!(!step.is_complete());
            }
            other => panic!("expected step, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_step_complete() {
        let ev = StreamEvent::decode(
            "step",
            r#"{"step":1,"thought":"t","action":"count_records","observation":"42"}"#,
        )
        .unwrap();
        match ev {
            StreamEvent::Step(step) => assert!(step.is_complete()),
            other => panic!("expected step, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_tool_call_and_result() {
        let call = StreamEvent::decode(
            "tool_call",
            r#"{"step":2,"tool":"aggregate","params":{"by":"month"}}"#,
        )
        .unwrap();
        assert_eq!(call.kind(), "tool_call");

        let result = StreamEvent::decode(
            "tool_result",
            r#"{"step":2,"tool":"aggregate","observation":"3 groups"}"#,
        )
        .unwrap();
        assert_eq!(result.kind(), "tool_result");
    }

    #[test]
    fn test_decode_done_with_null_message() {
        let ev = StreamEvent::decode("done", r#"{"steps":[],"message":null}"#).unwrap();
        assert!(ev.is_done());
        match ev {
            StreamEvent::Done { steps, message } => {
                assert!(steps.is_empty());
                assert!(message.is_none());
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = StreamEvent::decode("heartbeat", r#"{}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownKind(_)));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = StreamEvent::decode("message", "{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_finalizes_message() {
        assert!(
            StreamEvent::Message {
                content: "hi".into()
            }
            .finalizes_message()
        );
        assert!(
            StreamEvent::Error {
                message: "boom".into()
            }
            .finalizes_message()
        );
        assert!(
            !StreamEvent::Init {
                conversation_id: "c".into()
            }
            .finalizes_message()
        );
        assert!(
            !StreamEvent::Done {
                steps: vec![],
                message: None
            }
            .finalizes_message()
        );
    }
}
