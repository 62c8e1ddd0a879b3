//! OpenAI-compatible Chat Completions adapter.
//!
//! Covers OpenAI itself plus the many OpenAI-compatible local and hosted
//! endpoints. This vendor does not report cache token counts on every
//! server, so usage events carry `None` for cache fields unless
//! `prompt_tokens_details.cached_tokens` is present.

use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use scribe_types::ApiUsage;

use crate::{
    ConversationMessage, Model, ModelProvider, ParseAction, ProviderEvent, Result, Role,
    VendorParser, flatten_text, http_client, stream_request,
};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: Model,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: Model) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.into(),
            model,
            base_url: OPENAI_API_URL.to_string(),
        })
    }

    /// Point the adapter at a compatible endpoint (tests, local servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, system_prompt: &str, messages: &[ConversationMessage]) -> Value {
        let mut wire: Vec<Value> = vec![json!({"role": "system", "content": system_prompt})];
        wire.extend(messages.iter().map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            json!({"role": role, "content": flatten_text(m)})
        }));
        json!({
            "model": self.model.id,
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": wire,
        })
    }
}

impl ModelProvider for OpenAiProvider {
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
                .bearer_auth(&self.api_key)
                .json(&body);

            let mut parser = ChatCompletionsParser;
            stream_request(request, &mut parser, &tx).await
        })
    }
}

struct ChatCompletionsParser;

impl VendorParser for ChatCompletionsParser {
    fn parse(&mut self, json: &Value) -> ParseAction {
        if let Some(message) = json.pointer("/error/message").and_then(Value::as_str) {
            return ParseAction::Error(message.to_string());
        }

        let mut events = Vec::new();

        if let Some(text) = json
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            && !text.is_empty()
        {
            events.push(ProviderEvent::Text(text.to_string()));
        }

        // The final chunk (empty choices) carries usage when
        // stream_options.include_usage was requested.
        if let Some(usage) = json.get("usage").filter(|u| !u.is_null()) {
            let cached = usage
                .pointer("/prompt_tokens_details/cached_tokens")
                .and_then(Value::as_u64)
                .map(|v| v as u32);
            events.push(ProviderEvent::Usage(ApiUsage {
                input_tokens: usage
                    .get("prompt_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                output_tokens: usage
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                cache_read_tokens: cached,
                cache_write_tokens: None,
                total_cost: None,
            }));
        }

        if events.is_empty() {
            ParseAction::Continue
        } else {
            ParseAction::Emit(events)
        }
    }

    fn vendor(&self) -> &'static str {
        "openai"
    }
}
