//! Fuzzy line-range matching for search blocks.

use std::collections::HashMap;

/// Where a search block best matches in the original file, as line-index
/// ranges (end exclusive). Computed fresh per block, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineMatch {
    pub original_start: usize,
    pub original_end: usize,
    pub search_start: usize,
    pub search_end: usize,
}

/// Locate the best line-range match for `search_lines` in
/// `original_lines[start_index..]`.
///
/// Builds a map from trimmed line text to line numbers in one pass over the
/// unprocessed suffix, then seeds candidate starts from the entry for the
/// search block's first trimmed line. Each candidate extends forward with
/// trimmed comparisons: an exact match scores 1.0; substring containment in
/// either direction scores 0.5 plus a 0.3 fuzzy bonus; any other mismatch
/// stops the extension. The highest cumulative score wins and ties keep the
/// first candidate scanned (lowest start index). The tie-break is a
/// heuristic kept for compatibility, not a guaranteed-optimal choice.
pub(crate) fn find_best_line_match(
    original_lines: &[&str],
    search_lines: &[&str],
    start_index: usize,
) -> Option<LineMatch> {
    if search_lines.is_empty() {
        return None;
    }

    let mut line_index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, line) in original_lines.iter().enumerate().skip(start_index) {
        line_index.entry(line.trim()).or_default().push(i);
    }

    let first_line = search_lines[0].trim();
    let start_positions = line_index.get(first_line)?;

    let mut best_match: Option<LineMatch> = None;
    let mut best_score = 0.0_f64;

    for &start_pos in start_positions {
        let mut match_length = 0.0_f64;
        let mut fuzzy_matches = 0u32;

        for (i, search_line) in search_lines.iter().enumerate() {
            let Some(original_line) = original_lines.get(start_pos + i) else {
                break;
            };
            let original_trimmed = original_line.trim();
            let search_trimmed = search_line.trim();

            if original_trimmed == search_trimmed {
                match_length += 1.0;
            } else if original_trimmed.contains(search_trimmed)
                || search_trimmed.contains(original_trimmed)
            {
                fuzzy_matches += 1;
                match_length += 0.5;
            } else {
                break;
            }
        }

        let score = match_length + f64::from(fuzzy_matches) * 0.3;
        if score > best_score {
            best_score = score;
            best_match = Some(LineMatch {
                original_start: start_pos,
                original_end: start_pos + search_lines.len(),
                search_start: 0,
                search_end: search_lines.len(),
            });
        }
    }

    best_match
}

#[cfg(test)]
mod tests {
    use super::find_best_line_match;

    #[test]
    fn exact_run_matches() {
        let original = vec!["a", "b", "c", "d"];
        let search = vec!["b", "c"];
        let m = find_best_line_match(&original, &search, 0).unwrap();
        assert_eq!(m.original_start, 1);
        assert_eq!(m.original_end, 3);
    }

    #[test]
    fn respects_start_index() {
        let original = vec!["x", "y", "x", "z"];
        let search = vec!["x"];
        let m = find_best_line_match(&original, &search, 1).unwrap();
        assert_eq!(m.original_start, 2);
    }

    #[test]
    fn first_candidate_wins_ties() {
        let original = vec!["dup", "other", "dup"];
        let search = vec!["dup"];
        let m = find_best_line_match(&original, &search, 0).unwrap();
        assert_eq!(m.original_start, 0);
    }

    #[test]
    fn longer_exact_run_beats_shorter_one() {
        // Both seeds start with an exact "fn f() {"; only the second
        // continues into "    body" and must win on cumulative score.
        let original = vec!["fn f() {", "noise", "fn f() {", "    body"];
        let search = vec!["fn f() {", "    body"];
        let m = find_best_line_match(&original, &search, 0).unwrap();
        assert_eq!(m.original_start, 2);
    }

    #[test]
    fn containment_counts_with_penalty() {
        let original = vec!["let total_count = 0;"];
        let search = vec!["total_count"];
        let m = find_best_line_match(&original, &search, 0);
        // First-line seeding requires an exact trimmed hit for the first
        // search line, so pure-containment first lines find nothing.
        assert!(m.is_none());
    }

    #[test]
    fn no_match_returns_none() {
        let original = vec!["alpha", "beta"];
        let search = vec!["gamma"];
        assert!(find_best_line_match(&original, &search, 0).is_none());
    }

    #[test]
    fn empty_search_returns_none() {
        let original = vec!["alpha"];
        assert!(find_best_line_match(&original, &[], 0).is_none());
    }

    #[test]
    fn trailing_mismatch_still_scores_prefix() {
        // Extension stops at the mismatch but the candidate is still the
        // best (and only) one; the reported range spans the search length.
        let original = vec!["a", "b", "zzz"];
        let search = vec!["a", "b", "c"];
        let m = find_best_line_match(&original, &search, 0).unwrap();
        assert_eq!(m.original_start, 0);
        assert_eq!(m.original_end, 3);
    }
}
