//! HTTP client for the agent backend: JSON endpoints and SSE streams

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use chatkit_wire::{
    ApiResponse, ConversationDetail, ConversationListResponse, ConversationResponse,
    ConversationSummary, SchemaResponse, SseParser, StatusResponse, StreamEvent,
};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{Method, Response};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, TOKEN_EXPIRED_STATUS};
use crate::transport::{EventStream, StreamRequest, StreamTransport};

/// Callback that produces a fresh anti-forgery token after expiry.
pub type TokenRefresh = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Client for the agent backend.
///
/// All state is behind interior mutability so the client can be shared
/// behind an `Arc` between the widget and any background turn.
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: Mutex<String>,
    csrf_token: Mutex<Option<String>>,
    refresh_token: Option<TokenRefresh>,
}

impl ApiClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: Mutex::new(endpoint.into()),
            csrf_token: Mutex::new(None),
            refresh_token: None,
        }
    }

    pub fn with_csrf_token(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Self::new(endpoint);
        *client.csrf_token.lock() = Some(token.into());
        client
    }

    /// Install a refresh hook; a 419 response triggers it once per
    /// request before retrying.
    pub fn with_token_refresh(mut self, refresh: TokenRefresh) -> Self {
        self.refresh_token = Some(refresh);
        self
    }

    pub fn update_endpoint(&self, endpoint: impl Into<String>) {
        *self.endpoint.lock() = endpoint.into();
    }

    pub fn update_csrf_token(&self, token: impl Into<String>) {
        *self.csrf_token.lock() = Some(token.into());
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.lock(), path)
    }

    fn request(&self, method: Method, path: &str, accept: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, self.url(path))
            .header("Accept", accept)
            .header("X-Requested-With", "XMLHttpRequest");
        if let Some(token) = self.csrf_token.lock().as_deref() {
            builder = builder.header("X-CSRF-TOKEN", token);
        }
        builder
    }

    /// Send a JSON request, refreshing the anti-forgery token and
    /// retrying exactly once on 419. A second 419 surfaces as an error.
    async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let mut attempted_refresh = false;
        loop {
            let mut builder = self.request(method.clone(), path, "application/json");
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let code = status.as_u16();
            if code == TOKEN_EXPIRED_STATUS && !attempted_refresh {
                if let Some(refresh) = &self.refresh_token {
                    if let Some(fresh) = refresh() {
                        tracing::warn!("anti-forgery token expired, refreshing and retrying");
                        self.update_csrf_token(fresh);
                        attempted_refresh = true;
                        continue;
                    }
                }
            }

            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::status(code, body_text));
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let response = self.send_raw(method, path, body).await?;
        Ok(response.json().await?)
    }

    /// Send a user message and wait for the complete response.
    pub async fn chat(&self, message: &str, conversation_id: Option<&str>) -> Result<ApiResponse> {
        let body = json!({
            "message": message,
            "conversation_id": conversation_id,
        });
        self.send_json(Method::POST, "/chat", Some(&body)).await
    }

    /// Execute the pending confirmed operation.
    pub async fn confirm(&self, conversation_id: &str) -> Result<ApiResponse> {
        let body = json!({ "conversation_id": conversation_id });
        self.send_json(Method::POST, "/confirm", Some(&body)).await
    }

    /// Decline the pending operation.
    pub async fn reject(&self, conversation_id: &str) -> Result<ApiResponse> {
        let body = json!({ "conversation_id": conversation_id });
        self.send_json(Method::POST, "/reject", Some(&body)).await
    }

    /// Clear server-side conversation state.
    pub async fn reset(&self, conversation_id: &str) -> Result<()> {
        let body = json!({ "conversation_id": conversation_id });
        self.send_raw(Method::POST, "/reset", Some(&body)).await?;
        Ok(())
    }

    pub async fn get_schema(&self) -> Result<SchemaResponse> {
        self.send_json(Method::GET, "/schema", None).await
    }

    pub async fn get_status(&self) -> Result<StatusResponse> {
        self.send_json(Method::GET, "/status", None).await
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        let list: ConversationListResponse =
            self.send_json(Method::GET, "/conversations", None).await?;
        Ok(list.conversations)
    }

    pub async fn conversation(&self, id: &str) -> Result<ConversationDetail> {
        let response: ConversationResponse = self
            .send_json(Method::GET, &format!("/conversations/{id}"), None)
            .await?;
        Ok(response.conversation)
    }

    pub async fn create_conversation(&self, title: &str) -> Result<ConversationDetail> {
        let body = json!({ "title": title });
        let response: ConversationResponse = self
            .send_json(Method::POST, "/conversations", Some(&body))
            .await?;
        Ok(response.conversation)
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.send_raw(Method::DELETE, &format!("/conversations/{id}"), None)
            .await?;
        Ok(())
    }

    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        let body = json!({ "title": title });
        self.send_raw(
            Method::PATCH,
            &format!("/conversations/{id}/title"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    /// Open a streaming chat turn.
    pub async fn stream_chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let body = json!({
            "message": message,
            "conversation_id": conversation_id,
        });
        self.open_stream("/chat/stream", &body, cancel).await
    }

    /// Open a streaming continuation after a confirmation was accepted.
    pub async fn stream_confirm(
        &self,
        conversation_id: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let body = json!({ "conversation_id": conversation_id });
        self.open_stream("/confirm/stream", &body, cancel).await
    }

    async fn open_stream(
        &self,
        path: &str,
        body: &serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let response = self
            .request(Method::POST, path, "text/event-stream")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::status(status.as_u16(), body_text));
        }

        Ok(event_stream(response, cancel))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoint", &*self.endpoint.lock())
            .field("has_csrf_token", &self.csrf_token.lock().is_some())
            .field("has_refresh", &self.refresh_token.is_some())
            .finish()
    }
}

#[async_trait]
impl StreamTransport for ApiClient {
    async fn open(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        match request {
            StreamRequest::Chat {
                message,
                conversation_id,
            } => {
                self.stream_chat(&message, conversation_id.as_deref(), cancel)
                    .await
            }
            StreamRequest::Confirm { conversation_id } => {
                self.stream_confirm(&conversation_id, cancel).await
            }
        }
    }
}

/// Turn a streaming HTTP response body into decoded events.
///
/// The stream ends at the first done event even if the server keeps
/// writing; cancellation ends it without an extra item. A mid-body
/// transport failure is delivered as a final error event so the state
/// machine can finalize the turn.
fn event_stream(response: Response, cancel: CancellationToken) -> EventStream {
    Box::pin(stream! {
        let mut body = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut carry: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(data)) => {
                    let text = decode_chunk(&mut carry, &data);
                    for event in parser.feed(&text) {
                        let done = event.is_done();
                        yield event;
                        if done {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "event stream body failed");
                    yield StreamEvent::Error {
                        message: e.to_string(),
                    };
                    return;
                }
                None => return,
            }
        }
    })
}

/// Decode a body chunk as UTF-8, holding back a trailing partial
/// sequence so a multi-byte character split across chunks survives.
fn decode_chunk(carry: &mut Vec<u8>, data: &[u8]) -> String {
    carry.extend_from_slice(data);
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let text = text.to_string();
            carry.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            // Incomplete sequence at the tail; emit the valid prefix.
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&carry[..valid]).into_owned();
            carry.drain(..valid);
            text
        }
        Err(_) => {
            // Genuinely invalid bytes; replace and move on.
            let text = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            text
        }
    }
}
