//! Thread title derivation
//!
//! Titles come from the first user message of a thread. Threads that never
//! received one get a placeholder built from their id.

const MAX_TITLE_CHARS: usize = 40;
const ELLIPSIS: &str = "...";
const DEFAULT_ID_CHARS: usize = 8;

/// Title for a thread whose first message is `message_text`.
///
/// Lengths are counted in characters, so multi-byte text is never split
/// inside a code point.
pub fn derive_title(message_text: &str) -> String {
    let mut chars = message_text.chars();
    let head: String = chars.by_ref().take(MAX_TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}{ELLIPSIS}")
    } else {
        head
    }
}

/// Placeholder title for a thread without a stored one
pub fn default_title(thread_id: &str) -> String {
    let prefix: String = thread_id.chars().take(DEFAULT_ID_CHARS).collect();
    format!("Thread {prefix}")
}
