//! Core domain types for Scribe.
//!
//! Everything here is plain data: conversation messages, parsed assistant
//! content blocks, model metadata, UI message records, and settings. No IO
//! and no async — the engine, tools, and providers crates own behavior.

pub mod blocks;
pub mod ids;
pub mod message;
pub mod model;
pub mod settings;
pub mod stream;
pub mod ui;

pub use blocks::{
    AssistantBlock, TextBlock, ToolParamName, ToolParams, ToolUseBlock, ToolUseName,
};
pub use ids::TaskId;
pub use message::{ContentPart, ConversationMessage, MessageWithTokenCount, Role};
pub use model::{ApiUsage, Model, ModelInfo, calculate_api_cost};
pub use settings::AutoApprovalSettings;
pub use stream::ProviderEvent;
pub use ui::{AskKind, AskResponse, SayKind, UiMessage, UiPayload};

/// Truncate a string to at most `max_chars` characters, appending an
/// ellipsis when content was dropped.
#[must_use]
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let kept: String = input.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}

#[cfg(test)]
mod tests {
    use super::truncate_with_ellipsis;

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello world", 6), "hello…");
    }

    #[test]
    fn truncate_handles_multibyte() {
        let s = "héllo wörld";
        let out = truncate_with_ellipsis(s, 6);
        assert!(out.ends_with('…'));
        assert!(out.chars().count() <= 6);
    }
}
