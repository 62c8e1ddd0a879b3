//! Anthropic Messages API adapter.
//!
//! Streams `https://api.anthropic.com/v1/messages` and reduces its event
//! grammar (`message_start`, `content_block_delta`, `message_delta`,
//! `message_stop`) to normalized [`ProviderEvent`]s. Cache token counts are
//! reported by this vendor, so usage events carry them as `Some`.

use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use scribe_types::ApiUsage;

use crate::{
    ContentPart, ConversationMessage, Model, ModelProvider, ParseAction, ProviderEvent, Result,
    Role, VendorParser, http_client, stream_request,
};

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: Model,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: Model) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.into(),
            model,
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Point the adapter at a different endpoint (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, system_prompt: &str, messages: &[ConversationMessage]) -> Value {
        let wire_messages: Vec<Value> = messages.iter().map(|m| self.to_wire(m)).collect();
        json!({
            "model": self.model.id,
            "max_tokens": self.model.info.max_tokens,
            "system": system_prompt,
            "stream": true,
            "messages": wire_messages,
        })
    }

    fn to_wire(&self, message: &ConversationMessage) -> Value {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content: Vec<Value> = message
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentPart::Image { media_type, data } if self.model.info.supports_images => {
                    Some(json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    }))
                }
                ContentPart::Image { .. } => Some(json!({
                    "type": "text",
                    "text": "[image omitted: model does not support images]",
                })),
                ContentPart::ToolUse { .. } | ContentPart::ToolResult { .. } => None,
            })
            .collect();
        json!({"role": role, "content": content})
    }
}

impl ModelProvider for AnthropicProvider {
    fn model(&self) -> Model {
        self.model.clone()
    }

    fn create_message<'a>(
        &'a self,
        system_prompt: &'a str,
        messages: &'a [ConversationMessage],
        tx: mpsc::Sender<ProviderEvent>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = self.build_body(system_prompt, messages);
            let request = self
                .client
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body);

            let mut parser = MessagesParser::default();
            stream_request(request, &mut parser, &tx).await
        })
    }
}

/// Accumulates usage across the event grammar: input-side counts arrive on
/// `message_start`, output counts on `message_delta`.
#[derive(Default)]
struct MessagesParser {
    usage: ApiUsage,
    usage_emitted: bool,
}

impl VendorParser for MessagesParser {
    fn parse(&mut self, json: &Value) -> ParseAction {
        match json.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(usage) = json.pointer("/message/usage") {
                    self.usage.input_tokens = read_u32(usage, "input_tokens").unwrap_or(0);
                    self.usage.cache_write_tokens = read_u32(usage, "cache_creation_input_tokens");
                    self.usage.cache_read_tokens = read_u32(usage, "cache_read_input_tokens");
                }
                ParseAction::Continue
            }
            Some("content_block_delta") => {
                let text = json
                    .pointer("/delta/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if text.is_empty() {
                    ParseAction::Continue
                } else {
                    ParseAction::Emit(vec![ProviderEvent::Text(text.to_string())])
                }
            }
            Some("message_delta") => {
                if let Some(tokens) = json
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.output_tokens = tokens as u32;
                }
                self.usage_emitted = true;
                ParseAction::Emit(vec![ProviderEvent::Usage(self.usage)])
            }
            Some("message_stop") => {
                if self.usage_emitted {
                    ParseAction::Done
                } else {
                    ParseAction::Emit(vec![ProviderEvent::Usage(self.usage), ProviderEvent::Done])
                }
            }
            Some("error") => {
                let message = json
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown provider error");
                ParseAction::Error(message.to_string())
            }
            // ping, content_block_start/stop and future event types
            _ => ParseAction::Continue,
        }
    }

    fn vendor(&self) -> &'static str {
        "anthropic"
    }
}

fn read_u32(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

#[cfg(test)]
mod tests {
    use super::{AnthropicProvider, ProviderEvent};
    use crate::ModelProvider;
    use scribe_types::{ContentPart, ConversationMessage, Model, ModelInfo};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model() -> Model {
        Model {
            id: "claude-test".to_string(),
            info: ModelInfo {
                context_window: 200_000,
                supports_images: true,
                ..Default::default()
            },
        }
    }

    fn sse_body() -> String {
        [
            r#"data: {"type":"message_start","message":{"usage":{"input_tokens":12,"cache_read_input_tokens":3}}}"#,
            r#"data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}"#,
            r#"data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"lo"}}"#,
            r#"data: {"type":"message_delta","usage":{"output_tokens":5}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]
        .join("\n\n")
            + "\n\n"
    }

    async fn collect(provider: &AnthropicProvider) -> Vec<ProviderEvent> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let messages = vec![ConversationMessage::user(vec![ContentPart::text("hi")])];
        provider
            .create_message("system", &messages, tx)
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn streams_text_usage_and_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body()),
            )
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("key", model())
            .unwrap()
            .with_base_url(server.uri());
        let events = collect(&provider).await;

        assert_eq!(events[0], ProviderEvent::Text("Hel".to_string()));
        assert_eq!(events[1], ProviderEvent::Text("lo".to_string()));
        let ProviderEvent::Usage(usage) = &events[2] else {
            panic!("expected usage event, got {:?}", events[2]);
        };
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.cache_read_tokens, Some(3));
        assert_eq!(usage.cache_write_tokens, None);
        assert_eq!(events[3], ProviderEvent::Done);
    }

    #[tokio::test]
    async fn http_error_becomes_error_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("key", model())
            .unwrap()
            .with_base_url(server.uri());
        let events = collect(&provider).await;

        assert_eq!(events.len(), 1);
        let ProviderEvent::Error(message) = &events[0] else {
            panic!("expected error event, got {:?}", events[0]);
        };
        assert!(message.contains("529"));
        assert!(message.contains("overloaded"));
    }

    #[tokio::test]
    async fn vendor_error_event_terminates_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"error\",\"error\":{\"message\":\"rate limited\"}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("key", model())
            .unwrap()
            .with_base_url(server.uri());
        let events = collect(&provider).await;

        assert_eq!(
            events,
            vec![ProviderEvent::Error("rate limited".to_string())]
        );
    }
}
