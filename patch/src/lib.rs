//! Streaming search/replace patch engine.
//!
//! Reconstructs a full file from a partial, line-based diff while the diff
//! is still arriving token-by-token. The diff format is a sequence of
//! blocks delimited by three literal marker lines:
//!
//! ```text
//! <<<<<<< SEARCH
//! lines to locate in the original
//! =======
//! replacement lines
//! >>>>>>> REPLACE
//! ```
//!
//! [`apply_incremental_diff`] is pure in its inputs: callers pass the full
//! accumulated diff text on every invocation (both inputs only ever grow),
//! so replaying the same complete inputs yields identical output.

mod matcher;

use matcher::find_best_line_match;

pub const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
pub const SEPARATOR_MARKER: &str = "=======";
pub const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// The search block did not match anywhere in the unprocessed suffix of
    /// the original file. Carries the offending search text so the operator
    /// (or the model) can correct the diff.
    #[error("could not find a match for search block:\n{search_text}")]
    NoMatch { search_text: String },
}

/// A fully-delimited search/replace pair, used by the non-streaming
/// replace path which requires verbatim matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReplaceBlock {
    pub search: String,
    pub replace: String,
}

/// Reconstruct file content from `original` and a (possibly incomplete)
/// `diff`.
///
/// May be called repeatedly with a growing `diff` prefix as the stream
/// advances; each call is independent. Content already consumed from the
/// original is never revisited: matching proceeds forward-only from the end
/// of the previous block's match. On the final chunk (`is_final`), original
/// content past the last replaced region is appended verbatim.
///
/// Unexpected lines outside any recognized marker state are ignored rather
/// than rejected; the only failure is an unmatched search block.
pub fn apply_incremental_diff(
    original: &str,
    diff: &str,
    is_final: bool,
) -> Result<String, PatchError> {
    let original_lines: Vec<&str> = original.split('\n').collect();

    let mut diff_lines: Vec<&str> = diff.split('\n').collect();
    // A diff ending in '\n' splits into a trailing empty fragment; it marks
    // "no incomplete line at the end", not an empty replacement line.
    if diff_lines.last() == Some(&"") {
        diff_lines.pop();
    }
    trim_partial_marker(&mut diff_lines);

    let mut result = String::new();
    let mut last_processed = 0usize;
    let mut search_content = String::new();
    let mut in_search = false;
    let mut in_replace = false;
    // Character range of the current block's match, valid while in_replace.
    let mut match_range: Option<(usize, usize)> = None;

    for line in diff_lines {
        if line == SEARCH_MARKER {
            in_search = true;
            in_replace = false;
            search_content.clear();
            continue;
        }

        if line == SEPARATOR_MARKER && in_search {
            in_search = false;
            in_replace = true;

            let (start, end) = if search_content.is_empty() {
                if original.is_empty() {
                    // Brand-new file: insert at position 0.
                    (0, 0)
                } else {
                    // Empty search against existing content: whole-file
                    // replacement.
                    (0, original.len())
                }
            } else {
                let mut search_lines: Vec<&str> = search_content.split('\n').collect();
                if search_lines.last() == Some(&"") {
                    search_lines.pop();
                }

                let start_line = line_index_at(&original_lines, last_processed);
                let matched =
                    find_best_line_match(&original_lines, &search_lines, start_line).ok_or_else(
                        || PatchError::NoMatch {
                            search_text: search_content.trim_end().to_string(),
                        },
                    )?;
                character_range(&original_lines, matched.original_start, matched.original_end)
            };

            // Emit untouched original content up to the match.
            let start = start.min(original.len());
            result.push_str(&original[last_processed.min(original.len())..start]);
            match_range = Some((start, end.min(original.len())));
            continue;
        }

        if line == REPLACE_MARKER && in_replace {
            in_search = false;
            in_replace = false;
            if let Some((_, end)) = match_range.take() {
                last_processed = end;
            }
            search_content.clear();
            continue;
        }

        if in_search {
            search_content.push_str(line);
            search_content.push('\n');
        } else if in_replace && match_range.is_some() {
            result.push_str(line);
            result.push('\n');
        }
        // Lines outside any recognized state are ignored.
    }

    if is_final && last_processed < original.len() {
        result.push_str(&original[last_processed..]);
    }

    Ok(result)
}

/// Parse a complete diff into its delimited blocks.
///
/// Used by the whole-file replace path: every block must be fully closed,
/// and each search text is later required to appear verbatim in the file.
#[must_use]
pub fn parse_search_replace_blocks(diff: &str) -> Vec<SearchReplaceBlock> {
    enum Collecting {
        None,
        Search,
        Replace,
    }

    let mut blocks = Vec::new();
    let mut collecting = Collecting::None;
    let mut search: Vec<&str> = Vec::new();
    let mut replace: Vec<&str> = Vec::new();

    for line in diff.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)) {
        match line {
            SEARCH_MARKER => {
                collecting = Collecting::Search;
                search.clear();
                replace.clear();
            }
            SEPARATOR_MARKER => {
                if matches!(collecting, Collecting::Search) {
                    collecting = Collecting::Replace;
                }
            }
            REPLACE_MARKER => {
                if matches!(collecting, Collecting::Replace) {
                    blocks.push(SearchReplaceBlock {
                        search: search.join("\n"),
                        replace: replace.join("\n"),
                    });
                    collecting = Collecting::None;
                }
            }
            _ => match collecting {
                Collecting::Search => search.push(line),
                Collecting::Replace => replace.push(line),
                Collecting::None => {}
            },
        }
    }

    blocks
}

/// Drop a trailing line that looks like the prefix of a marker but is not
/// an exact, complete one. A stream can end mid-marker; matching on the
/// truncated text would corrupt the block state.
fn trim_partial_marker(diff_lines: &mut Vec<&str>) {
    let Some(last) = diff_lines.last() else {
        return;
    };
    let looks_like_marker =
        last.starts_with('<') || last.starts_with('=') || last.starts_with('>');
    let is_exact_marker =
        *last == SEARCH_MARKER || *last == SEPARATOR_MARKER || *last == REPLACE_MARKER;
    if looks_like_marker && !is_exact_marker {
        diff_lines.pop();
    }
}

/// Line index containing the given character offset.
fn line_index_at(lines: &[&str], char_offset: usize) -> usize {
    let mut acc = 0usize;
    for (i, line) in lines.iter().enumerate() {
        acc += line.len() + 1;
        if acc > char_offset {
            return i;
        }
    }
    lines.len()
}

/// Convert a line range to absolute character offsets by summing line
/// lengths plus one newline each.
fn character_range(lines: &[&str], start_line: usize, end_line: usize) -> (usize, usize) {
    let mut start_char = 0usize;
    let mut end_char = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if i >= end_line {
            break;
        }
        if i < start_line {
            start_char += line.len() + 1;
        }
        end_char += line.len() + 1;
    }
    (start_char, end_char)
}

#[cfg(test)]
mod tests {
    use super::{PatchError, apply_incremental_diff, parse_search_replace_blocks};

    fn diff_for(search: &str, replace: &str) -> String {
        format!("<<<<<<< SEARCH\n{search}=======\n{replace}>>>>>>> REPLACE\n")
    }

    #[test]
    fn replaces_single_line() {
        let diff = diff_for("b\n", "B\n");
        let out = apply_incremental_diff("a\nb\nc\n", &diff, true).unwrap();
        assert_eq!(out, "a\nB\nc\n");
    }

    #[test]
    fn idempotent_full_chunk_replay() {
        let original = "fn main() {\n    println!(\"hi\");\n}\n";
        let diff = diff_for("    println!(\"hi\");\n", "    println!(\"bye\");\n");
        let first = apply_incremental_diff(original, &diff, true).unwrap();
        let second = apply_incremental_diff(original, &diff, true).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "fn main() {\n    println!(\"bye\");\n}\n");
    }

    #[test]
    fn empty_search_replaces_whole_file() {
        let diff = diff_for("", "entirely new\n");
        let out = apply_incremental_diff("old content\nmore\n", &diff, true).unwrap();
        assert_eq!(out, "entirely new\n");
    }

    #[test]
    fn empty_search_on_empty_original_creates_file() {
        let diff = diff_for("", "line one\nline two\n");
        let out = apply_incremental_diff("", &diff, true).unwrap();
        assert_eq!(out, "line one\nline two\n");
    }

    #[test]
    fn matching_is_forward_only() {
        // "x" appears twice; the first block consumes the first occurrence,
        // so the second block must match the later one.
        let original = "x\nmiddle\nx\ntail\n";
        let diff = format!("{}{}", diff_for("x\n", "first\n"), diff_for("x\n", "second\n"));
        let out = apply_incremental_diff(original, &diff, true).unwrap();
        assert_eq!(out, "first\nmiddle\nsecond\ntail\n");
    }

    #[test]
    fn unmatched_block_reports_search_text() {
        let diff = diff_for("no such line\n", "whatever\n");
        let err = apply_incremental_diff("a\nb\n", &diff, true).unwrap_err();
        match err {
            PatchError::NoMatch { search_text } => {
                assert_eq!(search_text, "no such line");
            }
        }
    }

    #[test]
    fn unmatched_block_after_cursor_fails_even_if_text_was_earlier() {
        // "a" only exists before the cursor once the first block consumed
        // past it; a later search for it must fail, not rewind.
        let original = "a\nb\nc\n";
        let diff = format!("{}{}", diff_for("c\n", "C\n"), diff_for("a\n", "A\n"));
        let err = apply_incremental_diff(original, &diff, true).unwrap_err();
        assert!(matches!(err, PatchError::NoMatch { .. }));
    }

    #[test]
    fn trailing_partial_marker_is_dropped() {
        let original = "a\nb\nc\n";
        let partial = "<<<<<<< SEARCH\nb\n=======\nB\n>>>>>>>";
        let out = apply_incremental_diff(original, partial, false).unwrap();
        // The truncated close marker must not leak into output.
        assert_eq!(out, "a\nB\n");

        let complete = "<<<<<<< SEARCH\nb\n=======\nB\n>>>>>>> REPLACE\n";
        let out = apply_incremental_diff(original, complete, true).unwrap();
        assert_eq!(out, "a\nB\nc\n");
    }

    #[test]
    fn partial_replacement_lines_are_not_duplicated_across_calls() {
        let original = "keep\nold\nrest\n";
        let step1 = "<<<<<<< SEARCH\nold\n=======\nnew line\n";
        let step2 = "<<<<<<< SEARCH\nold\n=======\nnew line\nsecond line\n>>>>>>> REPLACE\n";

        let out1 = apply_incremental_diff(original, step1, false).unwrap();
        assert_eq!(out1, "keep\nnew line\n");

        let out2 = apply_incremental_diff(original, step2, true).unwrap();
        assert_eq!(out2, "keep\nnew line\nsecond line\nrest\n");
    }

    #[test]
    fn fuzzy_match_tolerates_whitespace_drift() {
        let original = "fn add(a: i32) {\n    a + 1\n}\n";
        // Search uses different indentation; trimmed comparison still hits.
        let diff = diff_for("  a + 1\n", "    a + 2\n");
        let out = apply_incremental_diff(original, &diff, true).unwrap();
        assert_eq!(out, "fn add(a: i32) {\n    a + 2\n}\n");
    }

    #[test]
    fn multiple_blocks_apply_in_order() {
        let original = "one\ntwo\nthree\nfour\n";
        let diff = format!(
            "{}{}",
            diff_for("one\n", "ONE\n"),
            diff_for("three\n", "THREE\n")
        );
        let out = apply_incremental_diff(original, &diff, true).unwrap();
        assert_eq!(out, "ONE\ntwo\nTHREE\nfour\n");
    }

    #[test]
    fn preserves_tail_only_on_final_chunk() {
        let original = "a\nb\nc\n";
        let diff = diff_for("a\n", "A\n");
        let streaming = apply_incremental_diff(original, &diff, false).unwrap();
        assert_eq!(streaming, "A\n");
        let final_out = apply_incremental_diff(original, &diff, true).unwrap();
        assert_eq!(final_out, "A\nb\nc\n");
    }

    #[test]
    fn content_lines_resembling_markers_mid_diff_are_content() {
        let original = "start\n<div>\nend\n";
        // "<div>" starts with '<' but only the trailing line is subject to
        // partial-marker trimming.
        let diff = diff_for("<div>\n", "<span>\n");
        let out = apply_incremental_diff(original, &diff, true).unwrap();
        assert_eq!(out, "start\n<span>\nend\n");
    }

    #[test]
    fn ignores_stray_lines_outside_blocks() {
        let original = "a\nb\n";
        let diff = format!("stray preamble\n{}", diff_for("a\n", "A\n"));
        let out = apply_incremental_diff(original, &diff, true).unwrap();
        assert_eq!(out, "A\nb\n");
    }

    mod block_parsing {
        use super::parse_search_replace_blocks;

        #[test]
        fn parses_single_block() {
            let diff = "<<<<<<< SEARCH\nfoo\n=======\nbar\n>>>>>>> REPLACE";
            let blocks = parse_search_replace_blocks(diff);
            assert_eq!(blocks.len(), 1);
            assert_eq!(blocks[0].search, "foo");
            assert_eq!(blocks[0].replace, "bar");
        }

        #[test]
        fn parses_multiple_blocks() {
            let diff = "<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n<<<<<<< SEARCH\nc\n=======\nd\n>>>>>>> REPLACE";
            let blocks = parse_search_replace_blocks(diff);
            assert_eq!(blocks.len(), 2);
            assert_eq!(blocks[1].search, "c");
            assert_eq!(blocks[1].replace, "d");
        }

        #[test]
        fn unterminated_block_is_dropped() {
            let diff = "<<<<<<< SEARCH\na\n=======\nb\n";
            assert!(parse_search_replace_blocks(diff).is_empty());
        }

        #[test]
        fn tolerates_crlf_line_endings() {
            let diff = "<<<<<<< SEARCH\r\nfoo\r\n=======\r\nbar\r\n>>>>>>> REPLACE\r\n";
            let blocks = parse_search_replace_blocks(diff);
            assert_eq!(blocks.len(), 1);
            assert_eq!(blocks[0].search, "foo");
        }

        #[test]
        fn multiline_content_preserved() {
            let diff = "<<<<<<< SEARCH\nline1\nline2\n=======\nnew1\nnew2\nnew3\n>>>>>>> REPLACE";
            let blocks = parse_search_replace_blocks(diff);
            assert_eq!(blocks[0].search, "line1\nline2");
            assert_eq!(blocks[0].replace, "new1\nnew2\nnew3");
        }
    }
}
