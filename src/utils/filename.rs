/// Characters that cannot appear in a portable file name.
const INVALID_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

const MAX_LENGTH: usize = 100;
const FALLBACK: &str = "download";

/// Turns a source-reported title into a safe file name stem: invalid
/// characters stripped, edges trimmed of spaces and periods, capped at 100
/// characters, with a fixed fallback when nothing survives. Idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !INVALID_CHARS.contains(c)).collect();
    let trimmed = stripped.trim_matches(|c| c == ' ' || c == '.');
    let truncated: String = trimmed.chars().take(MAX_LENGTH).collect();
    // Truncation can expose a new trailing space or period.
    let cleaned = truncated.trim_matches(|c| c == ' ' || c == '.');

    if cleaned.is_empty() {
        FALLBACK.to_string()
    } else {
        cleaned.to_string()
    }
}
