//! Context-window management.
//!
//! Truncation is proactive: when the previous turn's recorded token usage
//! comes within a model-specific safety margin of the context window, the
//! oldest half of the exchanges is dropped before the next request is
//! issued. The first message (the original task) is never dropped, and
//! truncation always produces a new list rather than editing in place.

use scribe_types::MessageWithTokenCount;

/// Reserved headroom for a given context window size.
///
/// Known window sizes carry tuned margins; anything else reserves
/// `max(40k, 20%)` of the window.
#[must_use]
pub fn reserved_margin(context_window: u32) -> u32 {
    match context_window {
        64_000 => 27_000,
        128_000 => 30_000,
        200_000 => 40_000,
        other => 40_000.max(other / 5),
    }
}

/// Whether the previous turn's total token usage requires truncating
/// history before the next request.
#[must_use]
pub fn should_truncate(total_tokens: u32, context_window: u32) -> bool {
    total_tokens >= context_window.saturating_sub(reserved_margin(context_window))
}

/// Drop roughly the oldest half of the conversation, keeping the first
/// message. The removed count is even so user/assistant pairing survives.
#[must_use]
pub fn truncate_half_conversation(messages: &[MessageWithTokenCount]) -> Vec<MessageWithTokenCount> {
    if messages.len() < 2 {
        return messages.to_vec();
    }
    let to_remove = (messages.len() / 4) * 2;
    let mut truncated = Vec::with_capacity(messages.len().saturating_sub(to_remove));
    truncated.push(messages[0].clone());
    truncated.extend(messages.iter().skip(to_remove + 1).cloned());
    truncated
}
