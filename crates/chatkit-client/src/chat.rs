//! Widget orchestrator: wires the transport, state machine, and event bus

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chatkit_wire::{SchemaTable, StreamEvent};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::dispatch::dispatch;
use crate::error::Error;
use crate::session::{ConfirmState, Session};
use crate::transport::{StreamRequest, StreamTransport};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MAX_SUGGESTIONS: usize = 6;

/// Widget configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL prefix for all agent endpoints
    pub endpoint: String,
    /// Use the streaming endpoints instead of request/response
    pub streaming: bool,
    /// Raise notification signals for turns finished while hidden
    pub sounds: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "/agent".to_string(),
            streaming: true,
            sounds: true,
        }
    }
}

/// Events broadcast to widget observers (UI layers, sound players).
#[derive(Debug, Clone)]
pub enum WidgetEvent {
    Opened,
    Closed,
    /// A raw stream event, forwarded before the state machine applies it
    Stream(StreamEvent),
    /// A turn finished while the widget was hidden
    Notify,
    /// Transient user-facing notice
    Toast(String),
}

/// A quick-reply the widget can offer based on the backend schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestedAction {
    pub label: String,
    pub message: String,
}

/// Cloneable handle for aborting the in-flight turn from another task.
#[derive(Debug, Clone, Default)]
pub struct ChatHandle {
    cancel: Arc<Mutex<CancellationToken>>,
    is_running: Arc<AtomicBool>,
}

impl ChatHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the current stream, if any.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Arm a fresh token for the next turn and return it.
    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.is_running.store(true, Ordering::SeqCst);
        token
    }

    fn clear_running(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }
}

/// The embeddable chat widget client.
pub struct Chat {
    config: ChatConfig,
    api: Arc<ApiClient>,
    transport: Arc<dyn StreamTransport>,
    session: Session,
    handle: ChatHandle,
    event_tx: broadcast::Sender<WidgetEvent>,
    schema_tables: Vec<SchemaTable>,
}

impl Chat {
    pub fn new(config: ChatConfig) -> Self {
        let api = Arc::new(ApiClient::new(config.endpoint.clone()));
        Self::with_api(config, api)
    }

    pub fn with_api(config: ChatConfig, api: Arc<ApiClient>) -> Self {
        let transport = api.clone() as Arc<dyn StreamTransport>;
        Self::build(config, api, transport)
    }

    /// Swap in a non-HTTP transport; the JSON endpoints still go
    /// through the API client.
    pub fn with_transport(config: ChatConfig, transport: Arc<dyn StreamTransport>) -> Self {
        let api = Arc::new(ApiClient::new(config.endpoint.clone()));
        Self::build(config, api, transport)
    }

    fn build(config: ChatConfig, api: Arc<ApiClient>, transport: Arc<dyn StreamTransport>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            api,
            transport,
            session: Session::new(),
            handle: ChatHandle::new(),
            event_tx,
            schema_tables: Vec::new(),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: WidgetEvent) {
        // No subscribers is fine; the widget works headless.
        let _ = self.event_tx.send(event);
    }

    pub fn open(&mut self) {
        self.session.open();
        self.broadcast(WidgetEvent::Opened);
    }

    pub fn close(&mut self) {
        self.session.close();
        self.broadcast(WidgetEvent::Closed);
    }

    /// Send a user message. Empty or whitespace-only input is ignored.
    pub async fn send(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if self.config.streaming {
            let request = StreamRequest::Chat {
                message: text.to_string(),
                conversation_id: self.session.conversation_id().map(str::to_string),
            };
            self.run_streamed_turn(request, Some(text), false).await;
        } else {
            self.session.push_user_message(text);
            let conversation_id = self.session.conversation_id().map(str::to_string);
            match self.api.chat(text, conversation_id.as_deref()).await {
                Ok(response) => self.session.apply_response(&response),
                Err(e) => self.report_failure(&e),
            }
            self.after_turn();
        }
    }

    /// Accept the pending confirmation and continue the turn.
    ///
    /// A no-op unless a confirmation is pending and the conversation is
    /// established.
    pub async fn confirm(&mut self) {
        if !self.session.has_pending_confirmation() {
            return;
        }
        let Some(conversation_id) = self.session.conversation_id().map(str::to_string) else {
            return;
        };

        self.session.mark_confirmation(ConfirmState::Confirmed);

        if self.config.streaming {
            let request = StreamRequest::Confirm {
                conversation_id,
            };
            self.run_streamed_turn(request, None, true).await;
        } else {
            match self.api.confirm(&conversation_id).await {
                Ok(response) => self.session.apply_response(&response),
                Err(e) => self.report_failure(&e),
            }
            self.after_turn();
        }
    }

    /// Decline the pending confirmation. Always a request/response call.
    pub async fn reject(&mut self) {
        if !self.session.has_pending_confirmation() {
            return;
        }
        let Some(conversation_id) = self.session.conversation_id().map(str::to_string) else {
            return;
        };

        self.session.mark_confirmation(ConfirmState::Rejected);

        match self.api.reject(&conversation_id).await {
            Ok(response) => self.session.apply_response(&response),
            Err(e) => self.report_failure(&e),
        }
        self.after_turn();
    }

    /// Clear the conversation locally and server-side.
    ///
    /// The local transcript clears even when the server call fails.
    pub async fn reset(&mut self) {
        if let Some(conversation_id) = self.session.conversation_id().map(str::to_string) {
            if let Err(e) = self.api.reset(&conversation_id).await {
                tracing::debug!(error = %e, "server-side reset failed");
            }
        }
        self.session.reset();
        self.broadcast(WidgetEvent::Toast("Conversation reset.".to_string()));
    }

    /// Replace the transcript with a persisted conversation.
    pub async fn load_conversation(&mut self, id: &str) -> crate::error::Result<()> {
        let detail = self.api.conversation(id).await?;
        self.session.load_conversation(&detail);
        Ok(())
    }

    /// Delete a persisted conversation, clearing the live transcript if
    /// it is the one being deleted.
    pub async fn delete_conversation(&mut self, id: &str) -> crate::error::Result<()> {
        self.api.delete_conversation(id).await?;
        if self.session.conversation_id() == Some(id) {
            self.session.reset();
        }
        Ok(())
    }

    /// Fetch the backend schema for quick-reply suggestions.
    ///
    /// Failures are silent; suggestions are decorative.
    pub async fn fetch_schema(&mut self) {
        match self.api.get_schema().await {
            Ok(schema) => self.schema_tables = schema.tables,
            Err(e) => tracing::debug!(error = %e, "schema fetch failed"),
        }
    }

    /// Quick-reply suggestions derived from the fetched schema.
    pub fn suggestions(&self) -> Vec<SuggestedAction> {
        let mut actions = Vec::new();
        for table in &self.schema_tables {
            if actions.len() >= MAX_SUGGESTIONS {
                break;
            }
            if table.actions.iter().any(|a| a == "read") {
                actions.push(SuggestedAction {
                    label: format!("List {}", table.table),
                    message: format!("List all {}", table.table),
                });
            }
            if actions.len() >= MAX_SUGGESTIONS {
                break;
            }
            if table.actions.iter().any(|a| a == "create") {
                actions.push(SuggestedAction {
                    label: format!("Add {}", table.table),
                    message: format!("Add new {}", table.table),
                });
            }
        }
        actions
    }

    async fn run_streamed_turn(
        &mut self,
        request: StreamRequest,
        user_text: Option<&str>,
        follow_up: bool,
    ) {
        // Only one stream at a time; a new send replaces the old turn.
        if self.handle.is_running() {
            self.handle.abort();
            self.session.settle_aborted();
        }

        self.session.begin_streamed_turn(user_text, follow_up);
        let cancel = self.handle.arm();

        let mut stream = match self.transport.open(request, cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.report_failure(&e);
                self.handle.clear_running();
                self.after_turn();
                return;
            }
        };

        while let Some(event) = stream.next().await {
            self.broadcast(WidgetEvent::Stream(event.clone()));
            let done = event.is_done();
            dispatch(&event, &mut self.session);
            if done {
                break;
            }
        }

        if cancel.is_cancelled() {
            self.session.settle_aborted();
        } else if self.session.is_in_flight() {
            // Stream ended without a terminal event.
            self.session.fail_turn("The assistant stopped responding. Please try again.");
        }

        self.handle.clear_running();
        self.after_turn();
    }

    fn report_failure(&mut self, error: &Error) {
        if error.is_abort() {
            self.session.settle_aborted();
            return;
        }
        let friendly = friendly_error(error);
        self.session.fail_turn(friendly);
        self.broadcast(WidgetEvent::Toast(friendly.to_string()));
    }

    fn after_turn(&mut self) {
        if self.session.take_notification() && self.config.sounds {
            self.broadcast(WidgetEvent::Notify);
        }
    }
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chat")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish()
    }
}

/// Map a transport or server failure to a message fit for the transcript.
fn friendly_error(error: &Error) -> &'static str {
    match error {
        Error::Status { status, .. } if matches!(status, 401 | 403 | 419) => {
            "Your session has expired. Please sign in again."
        }
        Error::Status { status, .. } if *status == 429 => {
            "Too many requests. Please wait a moment."
        }
        Error::Http(_) => "Could not reach the assistant. Check your connection.",
        _ => "Something went wrong. Please try again.",
    }
}
