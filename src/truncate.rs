//! Token estimates and output truncation.

/// Rough token count: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Shortens `text` to about `max_chars` characters, keeping the head and
/// the tail and marking how much was cut from the middle.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let head_len = max_chars / 2;
    let tail_len = max_chars - head_len;
    let omitted = total - head_len - tail_len;

    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();
    format!("{head}\n... [{omitted} characters omitted] ...\n{tail}")
}
