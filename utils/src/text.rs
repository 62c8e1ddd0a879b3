//! Terminal output sanitisation.
//!
//! Shell output is untrusted text headed for the model's context window and
//! the user's terminal. Strip ANSI escapes and control characters before it
//! goes anywhere.

use std::sync::OnceLock;

use regex::Regex;

fn ansi_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // CSI sequences, OSC sequences (BEL or ST terminated), and lone
        // two-byte escapes.
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
            .expect("ANSI pattern must compile")
    })
}

/// Remove ANSI escape sequences.
#[must_use]
pub fn strip_ansi(input: &str) -> String {
    ansi_pattern().replace_all(input, "").into_owned()
}

/// Remove remaining C0 control characters except newline and tab.
#[must_use]
pub fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Whether an output line merely echoes the command being run.
///
/// Shells may repeat the submitted command before its output; the echo is
/// noise in captured results. Callers drop echo lines only until real
/// output begins.
#[must_use]
pub fn is_command_echo(line: &str, command: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && command.contains(trimmed)
}
