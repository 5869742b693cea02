//! Event dispatch: maps typed stream events onto a named-callback set

use chatkit_wire::{AgentStep, StreamEvent};
use serde_json::Value;

/// The named callbacks a streamed turn can drive.
///
/// All methods default to no-ops so consumers implement only what they
/// need. [`dispatch`] calls [`on_event`](StreamHandler::on_event) for
/// every event before the kind-specific method.
pub trait StreamHandler {
    /// Fired unconditionally first, for observability.
    fn on_event(&mut self, _event: &StreamEvent) {}

    fn on_init(&mut self, _conversation_id: &str) {}
    fn on_step(&mut self, _step: &AgentStep) {}
    fn on_thinking(&mut self, _step: usize, _thought: &str) {}
    fn on_tool_call(&mut self, _step: usize, _tool: &str, _params: &Value) {}
    fn on_tool_result(&mut self, _step: usize, _tool: &str, _observation: &str) {}
    fn on_confirmation(&mut self, _action: &str, _params: &Value, _description: &str) {}
    fn on_message(&mut self, _content: &str) {}
    fn on_error(&mut self, _message: &str) {}
    fn on_done(&mut self, _steps: &[AgentStep], _message: Option<&str>) {}
}

/// Route one event to its handler callback.
///
/// `Done` is terminal for the stream: the consuming loop must stop
/// reading further chunks after dispatching it, even if more bytes
/// remain buffered.
pub fn dispatch<H: StreamHandler + ?Sized>(event: &StreamEvent, handler: &mut H) {
    handler.on_event(event);

    match event {
        StreamEvent::Init { conversation_id } => handler.on_init(conversation_id),
        StreamEvent::Step(step) => handler.on_step(step),
        StreamEvent::Thinking { step, thought } => handler.on_thinking(*step, thought),
        StreamEvent::ToolCall { step, tool, params } => handler.on_tool_call(*step, tool, params),
        StreamEvent::ToolResult {
            step,
            tool,
            observation,
        } => handler.on_tool_result(*step, tool, observation),
        StreamEvent::Confirmation {
            action,
            params,
            description,
        } => handler.on_confirmation(action, params, description),
        StreamEvent::Message { content } => handler.on_message(content),
        StreamEvent::Error { message } => handler.on_error(message),
        StreamEvent::Done { steps, message } => handler.on_done(steps, message.as_deref()),
    }
}
