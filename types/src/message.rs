//! Conversation message model.
//!
//! Messages are immutable once appended to task history: truncation replaces
//! the whole list with a new one, it never edits entries in place.

use serde::{Deserialize, Serialize};

/// Message author role in the model-API conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One part of a message's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentPart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// A complete model-API conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ConversationMessage {
    #[must_use]
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    #[must_use]
    pub fn assistant(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Concatenated text of all `Text` parts.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// A conversation message plus the token count recorded when it was last
/// sent, so resumed tasks can reason about context pressure without
/// re-tokenizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWithTokenCount {
    #[serde(flatten)]
    pub message: ConversationMessage,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token_count: Option<u32>,
}

impl MessageWithTokenCount {
    #[must_use]
    pub fn new(message: ConversationMessage) -> Self {
        Self {
            message,
            token_count: None,
        }
    }
}

impl From<ConversationMessage> for MessageWithTokenCount {
    fn from(message: ConversationMessage) -> Self {
        Self::new(message)
    }
}
