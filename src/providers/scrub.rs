//! Scrubbing of provider error bodies before they reach logs or callers.

use std::borrow::Cow;

const MAX_SURFACED_CHARS: usize = 200;

/// Key-material prefixes: everything token-like after one of these is
/// redacted.
const SECRET_MARKERS: [&str; 8] = [
    "sk-",
    "AIza",
    "Bearer ",
    "api_key=",
    "access_token=",
    "\"api_key\":\"",
    "\"access_token\":\"",
    "x-api-key: ",
];

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '/' | '=')
}

fn redact_after(text: &mut String, marker: &str) {
    let mut from = 0;
    while let Some(offset) = text[from..].find(marker) {
        let start = from + offset;
        let token_start = start + marker.len();
        let token_len = text[token_start..]
            .chars()
            .take_while(|c| is_token_char(*c))
            .map(char::len_utf8)
            .sum::<usize>();

        if token_len == 0 {
            from = token_start;
            continue;
        }

        text.replace_range(start..token_start + token_len, "[REDACTED]");
        from = start + "[REDACTED]".len();
    }
}

/// Redact secret-like tokens (API keys, bearer credentials) from text.
pub fn scrub_secrets(input: &str) -> Cow<'_, str> {
    if !SECRET_MARKERS.iter().any(|marker| input.contains(marker)) {
        return Cow::Borrowed(input);
    }

    let mut scrubbed = input.to_string();
    for marker in SECRET_MARKERS {
        redact_after(&mut scrubbed, marker);
    }
    Cow::Owned(scrubbed)
}

/// Scrub and truncate an upstream error body for surfacing to a caller.
#[must_use]
pub fn sanitize_provider_error(body: &str) -> String {
    let scrubbed = scrub_secrets(body);
    if scrubbed.chars().count() <= MAX_SURFACED_CHARS {
        return scrubbed.into_owned();
    }

    let mut end = MAX_SURFACED_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &scrubbed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_passes_through_borrowed() {
        let input = "model overloaded, retry later";
        assert!(matches!(scrub_secrets(input), Cow::Borrowed(_)));
    }

    #[test]
    fn api_key_prefix_is_redacted() {
        let scrubbed = scrub_secrets("invalid key sk-proj-abc123XYZ provided");
        assert!(scrubbed.contains("[REDACTED]"));
        assert!(!scrubbed.contains("abc123XYZ"));
    }

    #[test]
    fn bearer_header_is_redacted() {
        let scrubbed = scrub_secrets("Authorization: Bearer eyJhbGciOi.payload");
        assert!(!scrubbed.contains("eyJhbGciOi"));
    }

    #[test]
    fn bare_marker_without_token_is_kept() {
        let input = "expected api_key= to be set";
        assert_eq!(scrub_secrets(input), input);
    }

    #[test]
    fn sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_provider_error(&body);
        assert!(sanitized.len() <= MAX_SURFACED_CHARS + 3);
        assert!(sanitized.ends_with("..."));
    }
}
