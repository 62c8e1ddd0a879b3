//! Parsed assistant content blocks.
//!
//! The assistant-message parser turns streamed model text into an ordered
//! sequence of these blocks. While a block's closing delimiter has not been
//! observed, `partial` is true and the block is re-derived in place on every
//! new delta — consumers address blocks by index, and identity is stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Names of the tools the assistant may invoke via the tag grammar.
///
/// A closed enum rather than free-form strings: unknown tags stay plain
/// text, and tool parameter maps are keyed by [`ToolParamName`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolUseName {
    ReadFile,
    WriteToFile,
    ReplaceInFile,
    ListFiles,
    SearchFiles,
    ExecuteCommand,
    BrowserAction,
    AskFollowupQuestion,
    AttemptCompletion,
}

impl ToolUseName {
    pub const ALL: [ToolUseName; 9] = [
        ToolUseName::ReadFile,
        ToolUseName::WriteToFile,
        ToolUseName::ReplaceInFile,
        ToolUseName::ListFiles,
        ToolUseName::SearchFiles,
        ToolUseName::ExecuteCommand,
        ToolUseName::BrowserAction,
        ToolUseName::AskFollowupQuestion,
        ToolUseName::AttemptCompletion,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ToolUseName::ReadFile => "read_file",
            ToolUseName::WriteToFile => "write_to_file",
            ToolUseName::ReplaceInFile => "replace_in_file",
            ToolUseName::ListFiles => "list_files",
            ToolUseName::SearchFiles => "search_files",
            ToolUseName::ExecuteCommand => "execute_command",
            ToolUseName::BrowserAction => "browser_action",
            ToolUseName::AskFollowupQuestion => "ask_followup_question",
            ToolUseName::AttemptCompletion => "attempt_completion",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|name| name.as_str() == tag)
    }
}

impl std::fmt::Display for ToolUseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter tag names recognized inside a tool block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolParamName {
    Command,
    Path,
    Content,
    Diff,
    Regex,
    FilePattern,
    Recursive,
    Action,
    Url,
    Coordinate,
    Text,
    Question,
    Result,
}

impl ToolParamName {
    pub const ALL: [ToolParamName; 13] = [
        ToolParamName::Command,
        ToolParamName::Path,
        ToolParamName::Content,
        ToolParamName::Diff,
        ToolParamName::Regex,
        ToolParamName::FilePattern,
        ToolParamName::Recursive,
        ToolParamName::Action,
        ToolParamName::Url,
        ToolParamName::Coordinate,
        ToolParamName::Text,
        ToolParamName::Question,
        ToolParamName::Result,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ToolParamName::Command => "command",
            ToolParamName::Path => "path",
            ToolParamName::Content => "content",
            ToolParamName::Diff => "diff",
            ToolParamName::Regex => "regex",
            ToolParamName::FilePattern => "file_pattern",
            ToolParamName::Recursive => "recursive",
            ToolParamName::Action => "action",
            ToolParamName::Url => "url",
            ToolParamName::Coordinate => "coordinate",
            ToolParamName::Text => "text",
            ToolParamName::Question => "question",
            ToolParamName::Result => "result",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|name| name.as_str() == tag)
    }
}

impl std::fmt::Display for ToolParamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collected tool parameters. A `BTreeMap` keeps display order stable.
pub type ToolParams = BTreeMap<ToolParamName, String>;

/// Plain text between tool blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub partial: bool,
}

/// A tool invocation parsed from the tag grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub name: ToolUseName,
    pub params: ToolParams,
    /// True until the closing tool tag has been observed; params may be
    /// incomplete and will be re-derived as more text arrives.
    pub partial: bool,
}

/// One parsed unit of assistant output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssistantBlock {
    Text(TextBlock),
    ToolUse(ToolUseBlock),
}

impl AssistantBlock {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        match self {
            AssistantBlock::Text(block) => block.partial,
            AssistantBlock::ToolUse(block) => block.partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ToolParamName, ToolUseName};

    #[test]
    fn tool_names_roundtrip_through_tags() {
        for name in ToolUseName::ALL {
            assert_eq!(ToolUseName::from_tag(name.as_str()), Some(name));
        }
    }

    #[test]
    fn param_names_roundtrip_through_tags() {
        for name in ToolParamName::ALL {
            assert_eq!(ToolParamName::from_tag(name.as_str()), Some(name));
        }
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert_eq!(ToolUseName::from_tag("rm_rf"), None);
        assert_eq!(ToolParamName::from_tag("payload"), None);
    }
}
