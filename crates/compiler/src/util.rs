use rules_filelock::hex_encode_lower;
use sha2::{Digest, Sha384};
use std::time::Duration;

/// Longest stderr excerpt carried in a compilation error
pub const STDERR_PREVIEW_CHARS: usize = 200;

/// Cut `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_to_chars(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

pub fn stderr_preview(stderr: &[u8]) -> String {
    truncate_to_chars(&String::from_utf8_lossy(stderr), STDERR_PREVIEW_CHARS)
}

/// Comments start with `!` or `#` once leading whitespace is trimmed.
pub fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('!') || trimmed.starts_with('#')
}

pub fn is_rule(line: &str) -> bool {
    !line.trim().is_empty() && !is_comment(line)
}

pub fn count_rules<'a>(lines: impl IntoIterator<Item = &'a str>) -> usize {
    lines.into_iter().filter(|line| is_rule(line)).count()
}

/// SHA-384 of `content`, lowercase hex
pub fn sha384_hex(content: &[u8]) -> String {
    hex_encode_lower(&Sha384::digest(content))
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
