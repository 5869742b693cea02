//! Conversation state machine: transcript, in-flight message, confirmation gating

use chatkit_wire::{
    AgentStep, ApiResponse, ConversationDetail, ResolvedIntent, ResponseKind, ActionResult,
};
use serde_json::Value;

use crate::dispatch::StreamHandler;
use crate::timeline;

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Kind of a transcript entry.
///
/// `Loading` and `Streaming` are the two mutable shapes of the single
/// in-flight message; every other kind is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Action,
    Confirmation,
    Executed,
    Rejected,
    Error,
    Loading,
    Streaming,
}

/// Whether a confirmation card was accepted or declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmState {
    Confirmed,
    Rejected,
}

/// One transcript entry.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub kind: MessageKind,
    pub body: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub intent: Option<ResolvedIntent>,
    pub result: Option<ActionResult>,
    /// Snapshot of the turn's reasoning steps, taken at finalization
    pub steps: Vec<AgentStep>,
    pub confirm_state: Option<ConfirmState>,
    /// Continuation within the same logical turn; suppresses the header
    pub is_follow_up: bool,
}

impl ChatMessage {
    fn new(role: Role, kind: MessageKind, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            kind,
            body: body.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            intent: None,
            result: None,
            steps: Vec::new(),
            confirm_state: None,
            is_follow_up: false,
        }
    }
}

/// Phase of the current streamed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingInit,
    Streaming,
    Finalized,
}

/// The running conversation owned by the widget.
///
/// At most one message is in flight (mutable) at a time; it is tracked
/// as an index so "no in-flight message" is representable and checked
/// before every mutation. Finalization nulls the index immediately.
#[derive(Debug)]
pub struct Session {
    conversation_id: Option<String>,
    messages: Vec<ChatMessage>,
    has_pending_confirmation: bool,
    in_flight: Option<usize>,
    steps: Vec<AgentStep>,
    phase: TurnPhase,
    busy: bool,
    is_open: bool,
    unread: u32,
    pending_notification: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            conversation_id: None,
            messages: Vec::new(),
            has_pending_confirmation: false,
            in_flight: None,
            steps: Vec::new(),
            phase: TurnPhase::Idle,
            busy: false,
            is_open: false,
            unread: 0,
            pending_notification: false,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn has_pending_confirmation(&self) -> bool {
        self.has_pending_confirmation
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    /// The widget became visible; unread messages are considered seen.
    pub fn open(&mut self) {
        self.is_open = true;
        self.unread = 0;
    }

    pub fn close(&mut self) {
        self.is_open = false;
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Consume the notification signal raised by a turn that finished
    /// while the widget was hidden.
    pub fn take_notification(&mut self) -> bool {
        std::mem::take(&mut self.pending_notification)
    }

    /// Append a user message to the transcript.
    pub fn push_user_message(&mut self, text: &str) {
        self.messages
            .push(ChatMessage::new(Role::User, MessageKind::Text, text));
    }

    fn push_assistant(&mut self, message: ChatMessage) {
        if !self.is_open {
            self.unread += 1;
        }
        self.messages.push(message);
    }

    /// Start a streamed turn: append the user message (if any) and one
    /// placeholder assistant message that becomes the in-flight message.
    ///
    /// Enforces the single-in-flight invariant: a still-active prior
    /// stream is settled as aborted before the new placeholder is
    /// created.
    pub fn begin_streamed_turn(&mut self, user_text: Option<&str>, follow_up: bool) {
        if self.in_flight.is_some() {
            tracing::warn!("starting a new stream while one is in flight; settling the old one");
            self.settle_aborted();
        }

        if let Some(text) = user_text {
            self.push_user_message(text);
        }

        let mut placeholder = ChatMessage::new(Role::Assistant, MessageKind::Loading, "");
        placeholder.is_follow_up = follow_up;
        self.push_assistant(placeholder);

        self.in_flight = Some(self.messages.len() - 1);
        self.steps.clear();
        self.phase = TurnPhase::AwaitingInit;
        self.busy = true;
    }

    /// Finalize the in-flight message, making it immutable.
    fn finalize(&mut self, kind: MessageKind, body: &str, intent: Option<ResolvedIntent>) {
        if let Some(index) = self.in_flight.take() {
            let message = &mut self.messages[index];
            message.kind = kind;
            message.body = body.to_string();
            message.intent = intent;
            message.steps = self.steps.clone();
        }
        self.phase = TurnPhase::Finalized;
    }

    /// The stream failed before or during the turn; finalize as an error.
    pub fn fail_turn(&mut self, message: &str) {
        if self.in_flight.is_some() {
            self.finalize(MessageKind::Error, message, None);
        } else {
            self.push_assistant(ChatMessage::new(Role::Assistant, MessageKind::Error, message));
        }
        self.busy = false;
    }

    /// User-initiated abort: settle silently, no error entry.
    ///
    /// Steps dispatched before the abort stay in the transcript as a
    /// streaming-kind snapshot. An abort before any step arrived removes
    /// the empty placeholder instead.
    pub fn settle_aborted(&mut self) {
        if let Some(index) = self.in_flight.take() {
            if self.steps.is_empty() {
                self.messages.remove(index);
            } else {
                let message = &mut self.messages[index];
                message.kind = MessageKind::Streaming;
                message.body = timeline::streaming_body(&self.steps);
                message.steps = self.steps.clone();
            }
        }
        self.busy = false;
        self.phase = TurnPhase::Idle;
    }

    /// Mark the open confirmation card and clear the pending flag.
    ///
    /// Returns `false` (a no-op) when no confirmation is pending.
    pub fn mark_confirmation(&mut self, state: ConfirmState) -> bool {
        if !self.has_pending_confirmation {
            return false;
        }
        self.has_pending_confirmation = false;

        if let Some(message) = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.kind == MessageKind::Confirmation && m.confirm_state.is_none())
        {
            message.confirm_state = Some(state);
        }
        true
    }

    /// Fold a complete non-streaming response into the transcript,
    /// applying the same finalization rules as a streamed turn.
    pub fn apply_response(&mut self, response: &ApiResponse) {
        self.conversation_id = Some(response.conversation_id.clone());

        if let Some(steps) = &response.steps {
            for step in steps {
                let mut message = ChatMessage::new(Role::Assistant, MessageKind::Action, "");
                message.intent = Some(step.intent.clone());
                message.result = Some(step.result.clone());
                self.push_assistant(message);
            }
        }

        let kind = match response.kind {
            ResponseKind::Message => MessageKind::Text,
            ResponseKind::Confirmation => {
                self.has_pending_confirmation = true;
                MessageKind::Confirmation
            }
            ResponseKind::Executed => MessageKind::Executed,
            ResponseKind::Rejected => {
                self.has_pending_confirmation = false;
                MessageKind::Rejected
            }
            ResponseKind::Error => MessageKind::Error,
        };

        let mut message = ChatMessage::new(Role::Assistant, kind, response.message.as_str());
        message.intent = response.intent.clone();
        message.result = response.result.clone();
        self.push_assistant(message);

        if !self.is_open {
            self.pending_notification = true;
        }
    }

    /// Replace the live transcript with a persisted conversation.
    ///
    /// Historical confirmations are no longer actionable and load as
    /// plain text.
    pub fn load_conversation(&mut self, detail: &ConversationDetail) {
        self.conversation_id = Some(detail.id.clone());
        self.has_pending_confirmation = false;
        self.in_flight = None;
        self.steps.clear();
        self.phase = TurnPhase::Idle;
        self.busy = false;

        self.messages = detail
            .messages
            .iter()
            .map(|record| {
                let role = if record.role == "user" {
                    Role::User
                } else {
                    Role::Assistant
                };

                let kind = if role == Role::User {
                    MessageKind::Text
                } else if record.success == Some(false) {
                    MessageKind::Error
                } else {
                    match record.intent.as_deref() {
                        Some("executed") => MessageKind::Executed,
                        Some("rejected") => MessageKind::Rejected,
                        _ => MessageKind::Text,
                    }
                };

                let mut message = ChatMessage::new(role, kind, record.content.as_str());
                message.id = record.id.clone();
                if kind == MessageKind::Executed {
                    message.result = Some(ActionResult {
                        success: record.success != Some(false),
                        message: record.content.clone(),
                        ..Default::default()
                    });
                }
                message
            })
            .collect();
    }

    /// Drop all conversation state.
    pub fn reset(&mut self) {
        self.conversation_id = None;
        self.messages.clear();
        self.has_pending_confirmation = false;
        self.in_flight = None;
        self.steps.clear();
        self.phase = TurnPhase::Idle;
        self.busy = false;
    }
}

impl StreamHandler for Session {
    fn on_init(&mut self, conversation_id: &str) {
        self.conversation_id = Some(conversation_id.to_string());
        self.phase = TurnPhase::Streaming;
    }

    fn on_step(&mut self, step: &AgentStep) {
        self.steps.push(step.clone());
        self.phase = TurnPhase::Streaming;

        // Rebuild the in-flight body wholesale from the full step list.
        if let Some(index) = self.in_flight {
            let message = &mut self.messages[index];
            message.kind = MessageKind::Streaming;
            message.body = timeline::streaming_body(&self.steps);
        }
    }

    fn on_confirmation(&mut self, action: &str, params: &Value, description: &str) {
        // A second confirmation before the first resolves overwrites the
        // pending state; that matches the observed server contract.
        self.has_pending_confirmation = true;
        let intent = ResolvedIntent::operation(action, params, description);
        self.finalize(MessageKind::Confirmation, description, Some(intent));
    }

    fn on_message(&mut self, content: &str) {
        self.finalize(MessageKind::Text, content, None);
    }

    fn on_error(&mut self, message: &str) {
        self.finalize(MessageKind::Error, message, None);
        // A mid-stream failure may be the last event the transport
        // delivers; the turn is over whether or not done follows.
        self.busy = false;
    }

    fn on_done(&mut self, _steps: &[AgentStep], _message: Option<&str>) {
        // Terminal content was already delivered by message/confirmation/
        // error; done only clears the busy flag and raises the
        // notification signal.
        self.busy = false;
        self.phase = TurnPhase::Finalized;
        if !self.is_open {
            self.pending_notification = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch;
    use chatkit_wire::StreamEvent;
    use serde_json::json;

    fn step_event(index: usize, thought: &str, action: Option<&str>, observation: Option<&str>) -> StreamEvent {
        StreamEvent::Step(AgentStep {
            step: index,
            thought: thought.into(),
            action: action.map(str::to_string),
            action_params: None,
            observation: observation.map(str::to_string),
        })
    }

    fn streamed_turn(session: &mut Session, events: &[StreamEvent]) {
        session.begin_streamed_turn(Some("hello"), false);
        for event in events {
            dispatch(event, session);
        }
    }

    #[test]
    fn test_begin_turn_creates_user_and_placeholder() {
        let mut session = Session::new();
        session.begin_streamed_turn(Some("count my orders"), false);

        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0].role, Role::User);
        assert_eq!(session.messages()[1].kind, MessageKind::Loading);
        assert!(session.is_in_flight());
        assert!(session.is_busy());
        assert_eq!(session.phase(), TurnPhase::AwaitingInit);
    }

    #[test]
    fn test_full_streamed_turn_finalizes_as_text() {
        let mut session = Session::new();
        streamed_turn(
            &mut session,
            &[
                StreamEvent::Init {
                    conversation_id: "c1".into(),
                },
                step_event(0, "searching", Some("search_records"), Some("4 rows")),
                StreamEvent::Message {
                    content: "You have 4 orders.".into(),
                },
                StreamEvent::Done {
                    steps: vec![],
                    message: None,
                },
            ],
        );

        assert_eq!(session.conversation_id(), Some("c1"));
        assert!(!session.is_busy());
        assert!(!session.is_in_flight());
        assert_eq!(session.phase(), TurnPhase::Finalized);

        let last = session.messages().last().unwrap();
        assert_eq!(last.kind, MessageKind::Text);
        assert_eq!(last.body, "You have 4 orders.");
        assert_eq!(last.steps.len(), 1);
    }

    #[test]
    fn test_step_rebuilds_body_wholesale() {
        let mut session = Session::new();
        session.begin_streamed_turn(Some("go"), false);
        dispatch(&step_event(0, "first look", Some("search_records"), None), &mut session);

        let body_after_one = session.messages().last().unwrap().body.clone();
        assert!(body_after_one.contains("Running: search"));

        dispatch(
            &step_event(0, "first look", Some("search_records"), Some("ok")),
            &mut session,
        );
        dispatch(&step_event(1, "now counting", Some("count_records"), None), &mut session);

        let body = &session.messages().last().unwrap().body;
        assert!(body.starts_with("Running: count"));
        assert!(body.contains("[done] first look (search)"));
        assert!(!body.starts_with(&body_after_one[..]));
    }

    #[test]
    fn test_confirmation_finalizes_and_sets_pending() {
        let mut session = Session::new();
        streamed_turn(
            &mut session,
            &[
                StreamEvent::Init {
                    conversation_id: "c1".into(),
                },
                StreamEvent::Confirmation {
                    action: "delete_record".into(),
                    params: json!({"table": "orders", "id": 7}),
                    description: "Delete order 7?".into(),
                },
            ],
        );

        assert!(session.has_pending_confirmation());
        let last = session.messages().last().unwrap();
        assert_eq!(last.kind, MessageKind::Confirmation);
        let intent = last.intent.as_ref().unwrap();
        assert_eq!(intent.kind, "operation");
        assert_eq!(intent.action.as_deref(), Some("delete_record"));
        assert_eq!(intent.table.as_deref(), Some("orders"));
    }

    #[test]
    fn test_error_event_finalizes_as_error() {
        let mut session = Session::new();
        streamed_turn(
            &mut session,
            &[StreamEvent::Error {
                message: "agent exploded".into(),
            }],
        );
        let last = session.messages().last().unwrap();
        assert_eq!(last.kind, MessageKind::Error);
        assert_eq!(last.body, "agent exploded");
        assert!(!session.is_in_flight());
        assert!(
            !session.is_busy(),
            "an error event ends the turn even when no done follows"
        );
    }

    #[test]
    fn test_abort_mid_stream_keeps_silent_snapshot() {
        // Init plus three steps (last one pending), then abort.
        let mut session = Session::new();
        session.begin_streamed_turn(Some("do the thing"), false);
        dispatch(
            &StreamEvent::Init {
                conversation_id: "c1".into(),
            },
            &mut session,
        );
        dispatch(&step_event(0, "a", Some("search_records"), Some("ok")), &mut session);
        dispatch(&step_event(1, "b", Some("count_records"), Some("3")), &mut session);
        dispatch(&step_event(2, "c", Some("aggregate"), None), &mut session);

        session.settle_aborted();

        let streaming: Vec<_> = session
            .messages()
            .iter()
            .filter(|m| m.kind == MessageKind::Streaming)
            .collect();
        assert_eq!(streaming.len(), 1);
        assert_eq!(streaming[0].steps.len(), 3);
        assert!(!streaming[0].steps[2].is_complete());
        assert!(
            !session.messages().iter().any(|m| m.kind == MessageKind::Error),
            "abort must not append an error entry"
        );
        assert!(!session.is_busy());
    }

    #[test]
    fn test_abort_before_any_step_removes_placeholder() {
        let mut session = Session::new();
        session.begin_streamed_turn(Some("hi"), false);
        session.settle_aborted();

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, Role::User);
    }

    #[test]
    fn test_single_in_flight_invariant() {
        let mut session = Session::new();
        session.begin_streamed_turn(Some("first"), false);
        dispatch(&step_event(0, "working", Some("search_records"), None), &mut session);

        // A second send must settle the first stream before starting.
        session.begin_streamed_turn(Some("second"), false);

        let mutable: Vec<_> = session
            .messages()
            .iter()
            .filter(|m| m.kind == MessageKind::Loading)
            .collect();
        assert_eq!(mutable.len(), 1, "only the new placeholder may be mutable");
        assert_eq!(
            session
                .messages()
                .iter()
                .filter(|m| m.kind == MessageKind::Streaming)
                .count(),
            1,
            "the first stream settled into an immutable snapshot"
        );
    }

    #[test]
    fn test_confirmation_gating() {
        let mut session = Session::new();
        assert!(!session.mark_confirmation(ConfirmState::Confirmed));
        assert!(!session.mark_confirmation(ConfirmState::Rejected));

        streamed_turn(
            &mut session,
            &[StreamEvent::Confirmation {
                action: "update_record".into(),
                params: json!({"table": "users"}),
                description: "Update?".into(),
            }],
        );

        assert!(session.mark_confirmation(ConfirmState::Confirmed));
        assert!(!session.has_pending_confirmation());
        // Second call is a no-op again.
        assert!(!session.mark_confirmation(ConfirmState::Confirmed));

        let card = session
            .messages()
            .iter()
            .find(|m| m.kind == MessageKind::Confirmation)
            .unwrap();
        assert_eq!(card.confirm_state, Some(ConfirmState::Confirmed));
    }

    #[test]
    fn test_second_confirmation_overwrites_pending_state() {
        // Documented edge case: the server may send another confirmation
        // before the first resolves; the newer one wins silently.
        let mut session = Session::new();
        streamed_turn(
            &mut session,
            &[
                StreamEvent::Confirmation {
                    action: "delete_record".into(),
                    params: json!({"table": "orders"}),
                    description: "first".into(),
                },
                StreamEvent::Confirmation {
                    action: "delete_record".into(),
                    params: json!({"table": "users"}),
                    description: "second".into(),
                },
            ],
        );

        assert!(session.has_pending_confirmation());
        // The first confirmation consumed the in-flight message; the
        // second only refreshed the pending flag.
        assert_eq!(
            session
                .messages()
                .iter()
                .filter(|m| m.kind == MessageKind::Confirmation)
                .count(),
            1
        );
    }

    #[test]
    fn test_finalized_message_not_mutated_by_late_step() {
        let mut session = Session::new();
        streamed_turn(
            &mut session,
            &[StreamEvent::Message {
                content: "final".into(),
            }],
        );

        let body_before = session.messages().last().unwrap().body.clone();
        dispatch(&step_event(5, "late", None, None), &mut session);
        assert_eq!(session.messages().last().unwrap().body, body_before);
    }

    #[test]
    fn test_apply_response_with_steps_and_confirmation() {
        let mut session = Session::new();
        let response: ApiResponse = serde_json::from_value(json!({
            "conversation_id": "c2",
            "type": "confirmation",
            "message": "Create this record?",
            "intent": {"type": "operation", "action": "create_record", "table": "users", "message": "m"},
            "steps": [{
                "intent": {"type": "operation", "action": null, "table": null, "message": "lookup"},
                "result": {"success": true, "message": "found", "data": [], "affected": 0}
            }]
        }))
        .unwrap();

        session.apply_response(&response);

        assert_eq!(session.conversation_id(), Some("c2"));
        assert!(session.has_pending_confirmation());
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0].kind, MessageKind::Action);
        assert_eq!(session.messages()[1].kind, MessageKind::Confirmation);
    }

    #[test]
    fn test_apply_response_rejected_clears_pending() {
        let mut session = Session::new();
        session.has_pending_confirmation = true;
        let response: ApiResponse = serde_json::from_value(json!({
            "conversation_id": "c2",
            "type": "rejected",
            "message": "Operation cancelled."
        }))
        .unwrap();

        session.apply_response(&response);
        assert!(!session.has_pending_confirmation());
        assert_eq!(session.messages().last().unwrap().kind, MessageKind::Rejected);
    }

    #[test]
    fn test_unread_and_notification_while_closed() {
        let mut session = Session::new();
        assert!(!session.is_open());

        streamed_turn(
            &mut session,
            &[
                StreamEvent::Message {
                    content: "hi".into(),
                },
                StreamEvent::Done {
                    steps: vec![],
                    message: None,
                },
            ],
        );

        assert_eq!(session.unread(), 1);
        assert!(session.take_notification());
        assert!(!session.take_notification(), "signal is consumed once");

        session.open();
        assert_eq!(session.unread(), 0);
    }

    #[test]
    fn test_load_conversation_maps_kinds() {
        let detail: ConversationDetail = serde_json::from_value(json!({
            "id": "c7",
            "title": "orders",
            "created_at": "2026-08-01T10:00:00Z",
            "updated_at": "2026-08-02T10:00:00Z",
            "messages": [
                {"id": "m1", "role": "user", "content": "list orders", "created_at": "2026-08-01T10:00:00Z"},
                {"id": "m2", "role": "assistant", "content": "done", "intent": "executed", "success": true, "created_at": "2026-08-01T10:00:01Z"},
                {"id": "m3", "role": "assistant", "content": "no", "intent": "rejected", "created_at": "2026-08-01T10:00:02Z"},
                {"id": "m4", "role": "assistant", "content": "confirm?", "intent": "confirmation", "created_at": "2026-08-01T10:00:03Z"},
                {"id": "m5", "role": "assistant", "content": "broke", "success": false, "created_at": "2026-08-01T10:00:04Z"}
            ]
        }))
        .unwrap();

        let mut session = Session::new();
        session.has_pending_confirmation = true;
        session.load_conversation(&detail);

        assert_eq!(session.conversation_id(), Some("c7"));
        assert!(!session.has_pending_confirmation(), "history is not actionable");

        let kinds: Vec<MessageKind> = session.messages().iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::Text,
                MessageKind::Executed,
                MessageKind::Rejected,
                MessageKind::Text,
                MessageKind::Error,
            ]
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut session = Session::new();
        streamed_turn(
            &mut session,
            &[StreamEvent::Message {
                content: "hi".into(),
            }],
        );
        session.reset();

        assert!(session.messages().is_empty());
        assert!(session.conversation_id().is_none());
        assert!(!session.has_pending_confirmation());
        assert!(!session.is_busy());
        assert_eq!(session.phase(), TurnPhase::Idle);
    }

    #[test]
    fn test_follow_up_placeholder_flag() {
        let mut session = Session::new();
        session.begin_streamed_turn(None, true);
        let placeholder = session.messages().last().unwrap();
        assert!(placeholder.is_follow_up);
        assert_eq!(placeholder.kind, MessageKind::Loading);
    }
}
