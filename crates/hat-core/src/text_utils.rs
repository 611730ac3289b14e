//! Text helpers for log and error output.

/// Truncates `value` to `max_chars` characters, appending `...` when cut.
pub fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

/// Masks a secret for logging, keeping at most four leading characters.
pub fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let count = trimmed.chars().count();
    if count <= 8 {
        return "***".to_string();
    }
    let prefix = trimmed.chars().take(4).collect::<String>();
    format!("{prefix}***({count} chars)")
}
