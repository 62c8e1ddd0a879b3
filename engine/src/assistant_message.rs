//! Incremental assistant-message parsing.
//!
//! Re-invoked on every streamed delta with the cumulative text, this turns
//! raw assistant output into an ordered sequence of typed content blocks:
//! plain text and tool invocations in an XML-tag-like grammar
//! (`<tool_name><param>value</param></tool_name>`). Blocks whose closing
//! delimiter has not arrived yet are marked `partial` and their parameters
//! are best-effort; an unclosed parameter's value runs to end-of-input.
//!
//! The parser is a fresh scan over the accumulated string each call; tag
//! searches keep it cheap enough for per-token invocation at realistic
//! message sizes.

use std::sync::OnceLock;

use scribe_types::{
    AssistantBlock, TextBlock, ToolParamName, ToolParams, ToolUseBlock, ToolUseName,
};

struct TagSet {
    tool_open: Vec<(ToolUseName, String)>,
    param_open: Vec<(ToolParamName, String)>,
}

fn tags() -> &'static TagSet {
    static TAGS: OnceLock<TagSet> = OnceLock::new();
    TAGS.get_or_init(|| TagSet {
        tool_open: ToolUseName::ALL
            .iter()
            .map(|name| (*name, format!("<{}>", name.as_str())))
            .collect(),
        param_open: ToolParamName::ALL
            .iter()
            .map(|name| (*name, format!("<{}>", name.as_str())))
            .collect(),
    })
}

/// Parse the cumulative assistant text into ordered content blocks.
pub fn parse_assistant_message(message: &str) -> Vec<AssistantBlock> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset < message.len() {
        let rest = &message[offset..];

        match find_earliest_tool_open(rest) {
            Some((pos, name, tag_len)) => {
                if pos > 0 {
                    push_text(&mut blocks, &rest[..pos], false);
                }
                let body_start = offset + pos + tag_len;
                let close_tag = format!("</{}>", name.as_str());
                match message[body_start..].find(&close_tag) {
                    Some(body_len) => {
                        let body = &message[body_start..body_start + body_len];
                        blocks.push(AssistantBlock::ToolUse(ToolUseBlock {
                            name,
                            params: parse_params(body, false),
                            partial: false,
                        }));
                        offset = body_start + body_len + close_tag.len();
                    }
                    None => {
                        // Tool block still streaming: everything to
                        // end-of-input is its body.
                        let body = &message[body_start..];
                        blocks.push(AssistantBlock::ToolUse(ToolUseBlock {
                            name,
                            params: parse_params(body, true),
                            partial: true,
                        }));
                        return blocks;
                    }
                }
            }
            None => {
                push_text(&mut blocks, rest, true);
                return blocks;
            }
        }
    }

    blocks
}

/// Append a text block, dropping a trailing fragment that is a prefix of a
/// known tool opening tag (it belongs to the block that is still forming).
fn push_text(blocks: &mut Vec<AssistantBlock>, raw: &str, partial: bool) {
    let mut text = raw;
    if partial
        && let Some(lt) = raw.rfind('<')
    {
        let tail = &raw[lt..];
        let is_tag_prefix = tags()
            .tool_open
            .iter()
            .any(|(_, tag)| tag.starts_with(tail));
        if is_tag_prefix {
            text = &raw[..lt];
        }
    }

    let trimmed = text.trim();
    if trimmed.is_empty() && !partial {
        return;
    }
    blocks.push(AssistantBlock::Text(TextBlock {
        text: trimmed.to_string(),
        partial,
    }));
}

fn find_earliest_tool_open(haystack: &str) -> Option<(usize, ToolUseName, usize)> {
    let mut earliest: Option<(usize, ToolUseName, usize)> = None;
    for (name, tag) in &tags().tool_open {
        if let Some(pos) = haystack.find(tag.as_str())
            && earliest.is_none_or(|(best, _, _)| pos < best)
        {
            earliest = Some((pos, *name, tag.len()));
        }
    }
    earliest
}

/// Parse nested parameter tags from a tool body.
///
/// Parameters appear sequentially. A closed tag yields its exact inner
/// value (trimmed of the surrounding newlines the grammar produces). In a
/// partial body, the final unclosed parameter's value runs to end-of-input
/// with any trailing closing-tag fragment stripped.
fn parse_params(body: &str, partial: bool) -> ToolParams {
    let mut params = ToolParams::new();
    let mut offset = 0;

    while offset < body.len() {
        let rest = &body[offset..];
        let Some((pos, name, tag_len)) = find_earliest_param_open(rest) else {
            break;
        };
        let value_start = offset + pos + tag_len;
        let close_tag = format!("</{}>", name.as_str());

        // The content parameter may legitimately contain text resembling
        // closing tags (e.g. file content with XML); take the last
        // occurrence for it, the first for everything else.
        let close_pos = if name == ToolParamName::Content {
            body[value_start..].rfind(&close_tag)
        } else {
            body[value_start..].find(&close_tag)
        };

        match close_pos {
            Some(len) => {
                let value = body[value_start..value_start + len].trim();
                params.insert(name, value.to_string());
                offset = value_start + len + close_tag.len();
            }
            None => {
                if partial {
                    let raw = &body[value_start..];
                    let value = strip_partial_close_tag(raw, &close_tag);
                    params.insert(name, value.trim().to_string());
                }
                break;
            }
        }
    }

    params
}

fn find_earliest_param_open(haystack: &str) -> Option<(usize, ToolParamName, usize)> {
    let mut earliest: Option<(usize, ToolParamName, usize)> = None;
    for (name, tag) in &tags().param_open {
        if let Some(pos) = haystack.find(tag.as_str())
            && earliest.is_none_or(|(best, _, _)| pos < best)
        {
            earliest = Some((pos, *name, tag.len()));
        }
    }
    earliest
}

/// Remove a trailing fragment that is a prefix of the closing tag.
fn strip_partial_close_tag<'a>(value: &'a str, close_tag: &str) -> &'a str {
    for k in (1..close_tag.len()).rev() {
        if value.ends_with(&close_tag[..k]) {
            return &value[..value.len() - k];
        }
    }
    value
}
