//! JSON types shared by the streaming and request/response paths

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The agent's proposed structured operation.
///
/// Attached to confirmation, action, and executed messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIntent {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: Option<String>,
    pub table: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, rename = "where")]
    pub conditions: Map<String, Value>,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub auto_continue: bool,
}

impl ResolvedIntent {
    /// Synthesize an operation intent from a streamed confirmation event.
    ///
    /// The `table` is lifted out of the params map when present; the
    /// human-readable description becomes the intent message.
    pub fn operation(action: &str, params: &Value, description: &str) -> Self {
        let data = params.as_object().cloned().unwrap_or_default();
        let table = data
            .get("table")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            kind: "operation".to_string(),
            action: Some(action.to_string()),
            table,
            data,
            conditions: Map::new(),
            select: Vec::new(),
            message: description.to_string(),
            confidence: 1.0,
            auto_continue: false,
        }
    }
}

/// Outcome of an executed operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub affected: u64,
}

/// One intermediate agent step in a non-streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateStep {
    pub intent: ResolvedIntent,
    pub result: ActionResult,
}

/// Terminal kind of a non-streaming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Message,
    Confirmation,
    Executed,
    Rejected,
    Error,
}

/// A complete non-streaming agent response.
///
/// Carries optional intermediate steps followed by one terminal payload;
/// the state machine folds it into the transcript with the same rules as
/// a streamed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub message: String,
    #[serde(default)]
    pub intent: Option<ResolvedIntent>,
    #[serde(default)]
    pub result: Option<ActionResult>,
    #[serde(default)]
    pub steps: Option<Vec<IntermediateStep>>,
}

/// One table exposed by the backend schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaTable {
    pub table: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub columns: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaResponse {
    #[serde(default)]
    pub tables: Vec<SchemaTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

// Conversation history DTOs

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub last_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A persisted transcript row, as stored server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub id: String,
    pub title: String,
    pub messages: Vec<ConversationRecord>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation: ConversationDetail,
}
