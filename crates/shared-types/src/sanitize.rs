//! Helpers for logging untrusted strings.

/// Longest string (in chars) written to a log line.
pub const MAX_LOG_STRING_LENGTH: usize = 256;

/// Truncate and escape a string received off the wire before logging it.
///
/// Non-printable characters are rendered with `char::escape_default`, so a
/// peer cannot forge log lines with embedded newlines or terminal codes.
#[must_use]
pub fn sanitize_log_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LOG_STRING_LENGTH));
    let mut chars = input.chars();

    for c in chars.by_ref().take(MAX_LOG_STRING_LENGTH) {
        if c.is_control() {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }

    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}
