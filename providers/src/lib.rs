//! LLM provider adapters with normalized streaming.
//!
//! Every adapter reduces its vendor's wire events to the uniform
//! [`ProviderEvent`] sequence: text deltas, usage, then exactly one `Done`
//! or `Error`. The orchestrator's retry policy depends on *where* an error
//! surfaces: an `Error` before any content is a stream-establishment
//! failure (retryable behind a human gate), anything later is a hard turn
//! failure because tool side effects may already have run.
//!
//! Vendor adapters are responsible only for translating the normalized
//! message list into their wire format, issuing the streaming call, and
//! re-emitting vendor events through the shared SSE machinery here.

pub mod anthropic;
pub mod openai;
mod sse;

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

pub use sse::SseBuffer;

pub(crate) use anyhow::Result;
pub(crate) use scribe_types::{ContentPart, ConversationMessage, Model, ProviderEvent, Role};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// A provider that can stream one model turn.
pub trait ModelProvider: Send + Sync {
    /// The model this adapter talks to.
    fn model(&self) -> Model;

    /// Issue a streaming request, emitting normalized events on `tx`.
    ///
    /// All vendor/API errors are delivered as [`ProviderEvent::Error`]
    /// events rather than `Err` returns, so partial output can be captured
    /// before the failure.
    fn create_message<'a>(
        &'a self,
        system_prompt: &'a str,
        messages: &'a [ConversationMessage],
        tx: mpsc::Sender<ProviderEvent>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Release held connections/resources. Default: nothing to release.
    fn dispose(&self) {}
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

pub(crate) async fn send_event(tx: &mpsc::Sender<ProviderEvent>, event: ProviderEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of an error response body.
pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// How a vendor parser reacted to one SSE data payload.
#[derive(Debug)]
pub(crate) enum ParseAction {
    Continue,
    Emit(Vec<ProviderEvent>),
    Done,
    Error(String),
}

/// Vendor-specific interpretation of SSE JSON payloads.
pub(crate) trait VendorParser {
    fn parse(&mut self, json: &serde_json::Value) -> ParseAction;
    fn vendor(&self) -> &'static str;
}

/// Drive a streaming HTTP response through a vendor parser.
///
/// Handles idle timeouts, buffer growth limits, `[DONE]` markers, and a
/// premature-EOF error when the connection closes without a completion
/// signal.
pub(crate) async fn consume_sse_response<P: VendorParser>(
    response: reqwest::Response,
    parser: &mut P,
    tx: &mpsc::Sender<ProviderEvent>,
) -> Result<()> {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer = SseBuffer::new(MAX_SSE_BUFFER_BYTES);

    loop {
        let Ok(next) = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await else {
            let _ = send_event(tx, ProviderEvent::Error("stream idle timeout".to_string())).await;
            return Ok(());
        };

        let Some(chunk) = next else { break };
        let chunk = chunk?;
        if buffer.extend(&chunk).is_err() {
            let _ = send_event(
                tx,
                ProviderEvent::Error("SSE buffer exceeded maximum size".to_string()),
            )
            .await;
            return Ok(());
        }

        while let Some(data) = buffer.next_data_payload() {
            if data == "[DONE]" {
                let _ = send_event(tx, ProviderEvent::Done).await;
                return Ok(());
            }

            let json: serde_json::Value = match serde_json::from_str(&data) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(vendor = parser.vendor(), %e, "invalid SSE JSON payload");
                    continue;
                }
            };

            match parser.parse(&json) {
                ParseAction::Continue => {}
                ParseAction::Emit(events) => {
                    for event in events {
                        let terminal = event.is_terminal();
                        if !send_event(tx, event).await || terminal {
                            return Ok(());
                        }
                    }
                }
                ParseAction::Done => {
                    let _ = send_event(tx, ProviderEvent::Done).await;
                    return Ok(());
                }
                ParseAction::Error(msg) => {
                    let _ = send_event(tx, ProviderEvent::Error(msg)).await;
                    return Ok(());
                }
            }
        }
    }

    // Connection closed without a completion signal.
    let _ = send_event(
        tx,
        ProviderEvent::Error("connection closed before stream completed".to_string()),
    )
    .await;
    Ok(())
}

/// Shared entry: issue the request and stream it through the parser.
///
/// Non-success HTTP statuses become a single `Error` event carrying the
/// status and a capped body excerpt.
pub(crate) async fn stream_request<P: VendorParser>(
    request: reqwest::RequestBuilder,
    parser: &mut P,
    tx: &mpsc::Sender<ProviderEvent>,
) -> Result<()> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = send_event(tx, ProviderEvent::Error(format!("request failed: {e}"))).await;
            return Ok(());
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body = read_capped_error_body(response).await;
        let _ = send_event(tx, ProviderEvent::Error(format!("API error {status}: {body}"))).await;
        return Ok(());
    }

    consume_sse_response(response, parser, tx).await
}

/// Render message content as plain text for vendors without multi-part
/// content support.
pub(crate) fn flatten_text(message: &ConversationMessage) -> String {
    let mut out = String::new();
    for part in &message.content {
        match part {
            ContentPart::Text { text } => out.push_str(text),
            ContentPart::Image { .. } => out.push_str("[image omitted]"),
            ContentPart::ToolUse { name, .. } => {
                out.push_str(&format!("[tool use: {name}]"));
            }
            ContentPart::ToolResult { content, .. } => out.push_str(content),
        }
    }
    out
}
