//! File tools: read, write-whole-file, and search/replace editing.

use std::path::{Path, PathBuf};

use serde_json::json;
use similar::{ChangeTag, TextDiff};

use scribe_patch::parse_search_replace_blocks;
use scribe_types::{AskKind, SayKind, ToolParamName, ToolParams, ToolUseName};
use scribe_utils::atomic_write;

use crate::{
    Approval, Tool, ToolContext, ToolError, ToolFut, ToolResponse, denied_response,
    denied_with_feedback_response, present_partial, request_approval, require_param,
};

fn resolve(cwd: &Path, rel: &str) -> PathBuf {
    let path = Path::new(rel);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Additions/deletions between old and new content, for approval prompts.
fn diff_stats(old: &str, new: &str) -> (u32, u32) {
    let diff = TextDiff::from_lines(old, new);
    let mut additions = 0u32;
    let mut deletions = 0u32;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }
    (additions, deletions)
}

fn execution_error(tool: ToolUseName, message: impl Into<String>) -> ToolError {
    ToolError::Execution {
        tool,
        message: message.into(),
    }
}

pub struct ReadFileTool;

impl Tool for ReadFileTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::ReadFile
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        params: &'a ToolParams,
        partial: bool,
    ) -> ToolFut<'a> {
        Box::pin(async move {
            let tool = self.name();
            let path_param = params
                .get(&ToolParamName::Path)
                .cloned()
                .unwrap_or_default();
            let message = json!({"tool": "readFile", "path": path_param}).to_string();

            if partial {
                present_partial(ctx, tool, AskKind::Tool, message).await?;
                return Ok(ToolResponse::empty());
            }

            let rel = require_param(tool, params, ToolParamName::Path)?;
            let path = resolve(&ctx.cwd, rel);

            match request_approval(ctx, tool, AskKind::Tool, message).await? {
                Approval::Approved | Approval::AutoApproved => {}
                Approval::Denied => return Ok(denied_response(&format!("read {rel}"))),
                Approval::DeniedWithFeedback { text, .. } => {
                    return Ok(denied_with_feedback_response(&format!("read {rel}"), &text));
                }
            }

            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| execution_error(tool, format!("failed to read {rel}: {e}")))?;
            Ok(ToolResponse::text(content))
        })
    }
}

pub struct WriteToFileTool;

impl Tool for WriteToFileTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::WriteToFile
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        params: &'a ToolParams,
        partial: bool,
    ) -> ToolFut<'a> {
        Box::pin(async move {
            let tool = self.name();
            let path_param = params
                .get(&ToolParamName::Path)
                .cloned()
                .unwrap_or_default();

            if partial {
                // Streaming preview only: the content tag may still be open.
                let message = json!({"tool": "writeToFile", "path": path_param}).to_string();
                present_partial(ctx, tool, AskKind::Tool, message).await?;
                return Ok(ToolResponse::empty());
            }

            let rel = require_param(tool, params, ToolParamName::Path)?;
            let content = require_param(tool, params, ToolParamName::Content)?;
            let path = resolve(&ctx.cwd, rel);

            let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            let (additions, deletions) = diff_stats(&existing, content);
            let message = json!({
                "tool": "writeToFile",
                "path": rel,
                "additions": additions,
                "deletions": deletions,
            })
            .to_string();

            match request_approval(ctx, tool, AskKind::Tool, message).await? {
                Approval::Approved | Approval::AutoApproved => {}
                Approval::Denied => return Ok(denied_response(&format!("write to {rel}"))),
                Approval::DeniedWithFeedback { text, .. } => {
                    return Ok(denied_with_feedback_response(
                        &format!("write to {rel}"),
                        &text,
                    ));
                }
            }

            atomic_write(&path, content.as_bytes())
                .map_err(|e| execution_error(tool, format!("failed to write {rel}: {e}")))?;
            Ok(ToolResponse::text(format!(
                "Successfully wrote {} bytes to {rel}",
                content.len()
            )))
        })
    }
}

pub struct ReplaceInFileTool;

impl Tool for ReplaceInFileTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::ReplaceInFile
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        params: &'a ToolParams,
        partial: bool,
    ) -> ToolFut<'a> {
        Box::pin(async move {
            let tool = self.name();
            let path_param = params
                .get(&ToolParamName::Path)
                .cloned()
                .unwrap_or_default();

            if partial {
                let message = json!({"tool": "replaceInFile", "path": path_param}).to_string();
                present_partial(ctx, tool, AskKind::Tool, message).await?;
                return Ok(ToolResponse::empty());
            }

            let rel = require_param(tool, params, ToolParamName::Path)?;
            let diff = require_param(tool, params, ToolParamName::Diff)?;
            let path = resolve(&ctx.cwd, rel);

            let blocks = parse_search_replace_blocks(diff);
            if blocks.is_empty() {
                return Err(ToolError::InvalidParam {
                    tool,
                    param: ToolParamName::Diff,
                    message: "no complete search/replace blocks found".to_string(),
                });
            }

            let message = json!({
                "tool": "replaceInFile",
                "path": rel,
                "blocks": blocks.len(),
            })
            .to_string();

            match request_approval(ctx, tool, AskKind::Tool, message).await? {
                Approval::Approved | Approval::AutoApproved => {}
                Approval::Denied => return Ok(denied_response(&format!("edit {rel}"))),
                Approval::DeniedWithFeedback { text, .. } => {
                    return Ok(denied_with_feedback_response(&format!("edit {rel}"), &text));
                }
            }

            let original = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| execution_error(tool, format!("failed to read {rel}: {e}")))?;

            // Validate every block against the evolving content before any
            // write: one miss fails the whole call, leaving the file
            // untouched.
            let mut modified = original;
            for block in &blocks {
                if !modified.contains(&block.search) {
                    return Err(execution_error(
                        tool,
                        format!(
                            "search content not found in {rel} (must match exactly, including whitespace):\n{}",
                            block.search
                        ),
                    ));
                }
                modified = modified.replacen(&block.search, &block.replace, 1);
            }

            atomic_write(&path, modified.as_bytes())
                .map_err(|e| execution_error(tool, format!("failed to write {rel}: {e}")))?;

            let count = blocks.len();
            let plural = if count == 1 { "" } else { "s" };
            let result = format!("Successfully applied {count} replacement{plural} to {rel}");
            ctx.ui
                .say(SayKind::Tool, Some(result.clone()), None, false)
                .await?;
            Ok(ToolResponse::text(result))
        })
    }
}
