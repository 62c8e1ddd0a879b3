//! Presentation-facing task messages.
//!
//! Every ask/say the task surfaces to the human is recorded as a
//! [`UiMessage`] and persisted to `ui_messages.json`, so a resumed task can
//! replay exactly what the user saw.

use serde::{Deserialize, Serialize};

/// Questions that block on a human response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskKind {
    /// Model asked the user a followup question.
    Followup,
    /// Approval for a shell command.
    Command,
    /// Approval for a file/search/browser tool.
    Tool,
    /// Approval to launch the browser at a URL.
    BrowserActionLaunch,
    /// First stream chunk failed; offer a retry.
    ApiReqFailed,
    /// Consecutive-mistake limit reached; needs human guidance.
    MistakeLimitReached,
    /// Consecutive auto-approval cap reached; needs a human checkpoint.
    AutoApprovalMaxReached,
    /// Final result presented; empty response means accepted.
    CompletionResult,
    /// Task rehydrated from disk; confirm before continuing.
    ResumeTask,
}

/// One-way notifications shown to the human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SayKind {
    /// The original task text (always the first message).
    Task,
    /// Plain streamed assistant text.
    Text,
    /// An API request was issued; `text` carries request metrics JSON.
    ApiReqStarted,
    ApiReqRetried,
    /// A tool action, auto-approved or already approved.
    Tool,
    CommandOutput,
    UserFeedback,
    BrowserAction,
    BrowserActionResult,
    CompletionResult,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiPayload {
    Ask { ask: AskKind },
    Say { say: SayKind },
}

/// A single presentation-facing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    #[serde(flatten)]
    pub payload: UiPayload,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub partial: Option<bool>,
}

impl UiMessage {
    #[must_use]
    pub fn ask(ts: i64, ask: AskKind, text: Option<String>, partial: bool) -> Self {
        Self {
            ts,
            payload: UiPayload::Ask { ask },
            text,
            images: None,
            partial: partial.then_some(true),
        }
    }

    #[must_use]
    pub fn say(ts: i64, say: SayKind, text: Option<String>, images: Option<Vec<String>>) -> Self {
        Self {
            ts,
            payload: UiPayload::Say { say },
            text,
            images,
            partial: None,
        }
    }

    #[must_use]
    pub fn is_ask(&self, kind: AskKind) -> bool {
        matches!(self.payload, UiPayload::Ask { ask } if ask == kind)
    }

    #[must_use]
    pub fn is_say(&self, kind: SayKind) -> bool {
        matches!(self.payload, UiPayload::Say { say } if say == kind)
    }
}

/// The human's answer to an ask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskResponse {
    Yes,
    No,
    /// Free-text (and optional image) feedback instead of a plain yes/no.
    Message {
        text: String,
        images: Vec<String>,
    },
}

impl AskResponse {
    #[must_use]
    pub fn is_yes(&self) -> bool {
        matches!(self, AskResponse::Yes)
    }
}
