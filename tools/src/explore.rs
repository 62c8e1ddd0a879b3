//! Workspace exploration tools: directory listing and regex search.

use std::path::Path;

use ignore::WalkBuilder;
use serde_json::json;

use scribe_types::{AskKind, ToolParamName, ToolParams, ToolUseName};

use crate::{
    Approval, Tool, ToolContext, ToolError, ToolFut, ToolResponse, denied_response,
    denied_with_feedback_response, optional_bool_param, present_partial, request_approval,
    require_param,
};

/// Cap on listed entries; a truncation notice is appended past this.
const MAX_LIST_ENTRIES: usize = 200;
/// Cap on search matches across all files.
const MAX_SEARCH_RESULTS: usize = 300;
/// Files larger than this are skipped during search.
const MAX_SEARCH_FILE_BYTES: u64 = 1_000_000;

pub struct ListFilesTool;

impl Tool for ListFilesTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::ListFiles
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
            let message = json!({"tool": "listFiles", "path": path_param}).to_string();

            if partial {
                present_partial(ctx, tool, AskKind::Tool, message).await?;
                return Ok(ToolResponse::empty());
            }

            let rel = require_param(tool, params, ToolParamName::Path)?;
            let recursive = optional_bool_param(tool, params, ToolParamName::Recursive)?;
            let root = if Path::new(rel).is_absolute() {
                Path::new(rel).to_path_buf()
            } else {
                ctx.cwd.join(rel)
            };

            match request_approval(ctx, tool, AskKind::Tool, message).await? {
                Approval::Approved | Approval::AutoApproved => {}
                Approval::Denied => return Ok(denied_response(&format!("list files in {rel}"))),
                Approval::DeniedWithFeedback { text, .. } => {
                    return Ok(denied_with_feedback_response(
                        &format!("list files in {rel}"),
                        &text,
                    ));
                }
            }

            let listing = list_entries(&root, recursive);
            if listing.is_empty() {
                return Ok(ToolResponse::text(format!("No files found in {rel}")));
            }
            Ok(ToolResponse::text(listing.join("\n")))
        })
    }
}

fn list_entries(root: &Path, recursive: bool) -> Vec<String> {
    let mut walker = WalkBuilder::new(root);
    if !recursive {
        walker.max_depth(Some(1));
    }
    let mut entries: Vec<String> = Vec::new();
    let mut truncated = false;

    for entry in walker.build().flatten() {
        if entry.depth() == 0 {
            continue;
        }
        if entries.len() >= MAX_LIST_ENTRIES {
            truncated = true;
            break;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        entries.push(if is_dir { format!("{rel}/") } else { rel });
    }

    entries.sort();
    if truncated {
        entries.push(format!(
            "(results truncated: only the first {MAX_LIST_ENTRIES} entries are shown)"
        ));
    }
    entries
}

pub struct SearchFilesTool;

impl Tool for SearchFilesTool {
    fn name(&self) -> ToolUseName {
        ToolUseName::SearchFiles
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
            let regex_param = params
                .get(&ToolParamName::Regex)
                .cloned()
                .unwrap_or_default();
            let message =
                json!({"tool": "searchFiles", "path": path_param, "regex": regex_param})
                    .to_string();

            if partial {
                present_partial(ctx, tool, AskKind::Tool, message).await?;
                return Ok(ToolResponse::empty());
            }

            let rel = require_param(tool, params, ToolParamName::Path)?;
            let pattern = require_param(tool, params, ToolParamName::Regex)?;
            let file_pattern = params.get(&ToolParamName::FilePattern).cloned();

            let regex = regex::Regex::new(pattern).map_err(|e| ToolError::InvalidParam {
                tool,
                param: ToolParamName::Regex,
                message: e.to_string(),
            })?;
            let glob = match &file_pattern {
                Some(raw) if !raw.is_empty() => Some(
                    globset::GlobBuilder::new(raw)
                        .build()
                        .map_err(|e| ToolError::InvalidParam {
                            tool,
                            param: ToolParamName::FilePattern,
                            message: e.to_string(),
                        })?
                        .compile_matcher(),
                ),
                _ => None,
            };

            let root = if Path::new(rel).is_absolute() {
                Path::new(rel).to_path_buf()
            } else {
                ctx.cwd.join(rel)
            };

            match request_approval(ctx, tool, AskKind::Tool, message).await? {
                Approval::Approved | Approval::AutoApproved => {}
                Approval::Denied => return Ok(denied_response(&format!("search in {rel}"))),
                Approval::DeniedWithFeedback { text, .. } => {
                    return Ok(denied_with_feedback_response(
                        &format!("search in {rel}"),
                        &text,
                    ));
                }
            }

            let results = search_entries(&root, &regex, glob.as_ref());
            if results.is_empty() {
                return Ok(ToolResponse::text(format!(
                    "No matches for '{pattern}' in {rel}"
                )));
            }
            Ok(ToolResponse::text(results.join("\n")))
        })
    }
}

fn search_entries(
    root: &Path,
    regex: &regex::Regex,
    glob: Option<&globset::GlobMatcher>,
) -> Vec<String> {
    let mut results = Vec::new();

    'files: for entry in WalkBuilder::new(root).build().flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if let Some(glob) = glob {
            let rel = path.strip_prefix(root).unwrap_or(path);
            if !glob.is_match(rel) && !glob.is_match(path) {
                continue;
            }
        }
        if entry
            .metadata()
            .map(|m| m.len() > MAX_SEARCH_FILE_BYTES)
            .unwrap_or(true)
        {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(path) else {
            // Binary or unreadable; skip.
            continue;
        };

        let rel = path.strip_prefix(root).unwrap_or(path).display();
        for (line_no, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                results.push(format!("{rel}:{}: {}", line_no + 1, line.trim_end()));
                if results.len() >= MAX_SEARCH_RESULTS {
                    results.push(format!(
                        "(results truncated at {MAX_SEARCH_RESULTS} matches)"
                    ));
                    break 'files;
                }
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scribe_types::{AutoApprovalSettings, ToolParamName, ToolParams, ToolUseName};

    use crate::testing::ScriptedUi;
    use crate::{ApprovalGate, Tool, ToolContext};

    use super::{ListFilesTool, SearchFilesTool};

    fn ctx(cwd: std::path::PathBuf) -> ToolContext {
        ToolContext {
            cwd,
            ui: Arc::new(ScriptedUi::default()),
            approval: Arc::new(ApprovalGate::new(AutoApprovalSettings {
                enabled: true,
                read_files: true,
                max_requests: 1000,
                ..Default::default()
            })),
        }
    }

    fn params(entries: &[(ToolParamName, &str)]) -> ToolParams {
        entries
            .iter()
            .map(|(k, v)| (*k, (*v).to_string()))
            .collect()
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("top.rs"), "fn top() {}\n").unwrap();
        std::fs::write(
            dir.path().join("sub/inner.rs"),
            "fn inner() {}\nlet needle = 42;\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn non_recursive_listing_stays_shallow() {
        let dir = fixture();
        let response = ListFilesTool
            .execute(&ctx(dir.path().to_path_buf()), &params(&[(ToolParamName::Path, ".")]), false)
            .await
            .unwrap();
        assert!(response.text.contains("top.rs"));
        assert!(response.text.contains("sub/"));
        assert!(!response.text.contains("inner.rs"));
    }

    #[tokio::test]
    async fn recursive_listing_descends() {
        let dir = fixture();
        let p = params(&[
            (ToolParamName::Path, "."),
            (ToolParamName::Recursive, "true"),
        ]);
        let response = ListFilesTool
            .execute(&ctx(dir.path().to_path_buf()), &p, false)
            .await
            .unwrap();
        assert!(response.text.contains("sub/inner.rs"));
    }

    #[tokio::test]
    async fn truncation_notice_appears_past_cap() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..250 {
            std::fs::write(dir.path().join(format!("f{i:03}.txt")), "x").unwrap();
        }
        let response = ListFilesTool
            .execute(&ctx(dir.path().to_path_buf()), &params(&[(ToolParamName::Path, ".")]), false)
            .await
            .unwrap();
        assert!(response.text.contains("results truncated"));
    }

    #[tokio::test]
    async fn search_reports_path_line_and_text() {
        let dir = fixture();
        let p = params(&[
            (ToolParamName::Path, "."),
            (ToolParamName::Regex, "needle"),
        ]);
        let response = SearchFilesTool
            .execute(&ctx(dir.path().to_path_buf()), &p, false)
            .await
            .unwrap();
        assert!(response.text.contains("sub/inner.rs:2: let needle = 42;"));
    }

    #[tokio::test]
    async fn search_honors_file_pattern() {
        let dir = fixture();
        std::fs::write(dir.path().join("notes.txt"), "needle in text\n").unwrap();
        let p = params(&[
            (ToolParamName::Path, "."),
            (ToolParamName::Regex, "needle"),
            (ToolParamName::FilePattern, "*.txt"),
        ]);
        let response = SearchFilesTool
            .execute(&ctx(dir.path().to_path_buf()), &p, false)
            .await
            .unwrap();
        assert!(response.text.contains("notes.txt"));
        assert!(!response.text.contains("inner.rs"));
    }

    #[tokio::test]
    async fn invalid_regex_is_validation_error() {
        let dir = fixture();
        let p = params(&[(ToolParamName::Path, "."), (ToolParamName::Regex, "([")]);
        let err = SearchFilesTool
            .execute(&ctx(dir.path().to_path_buf()), &p, false)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn tool_names_match_grammar() {
        assert_eq!(ListFilesTool.name(), ToolUseName::ListFiles);
        assert_eq!(SearchFilesTool.name(), ToolUseName::SearchFiles);
    }
}
