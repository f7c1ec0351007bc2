//! Secret redaction for captured command output.
//!
//! Applied to every diagnostic step before it reaches the analysis service
//! or the report.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // API keys with known prefixes
        (Regex::new(r"sk-ant-[a-zA-Z0-9_-]+").unwrap(), "[REDACTED_ANTHROPIC_KEY]"),
        (Regex::new(r"sk-proj-[a-zA-Z0-9_-]+").unwrap(), "[REDACTED_OPENAI_KEY]"),
        (Regex::new(r"AIzaSy[a-zA-Z0-9_-]+").unwrap(), "[REDACTED_GOOGLE_KEY]"),
        (Regex::new(r"gh[pousr]_[A-Za-z0-9]{20,}").unwrap(), "[REDACTED_GITHUB_TOKEN]"),
        (Regex::new(r"AKIA[0-9A-Z]{16}").unwrap(), "[REDACTED_AWS_KEY]"),
        // Service account tokens and other bearer credentials
        (
            Regex::new(r"(?i)bearer\s+[a-zA-Z0-9._~+/=-]{16,}").unwrap(),
            "Bearer [REDACTED]",
        ),
        (
            Regex::new(r"eyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]+").unwrap(),
            "[REDACTED_JWT]",
        ),
        // key=value / key: value pairs in env dumps and logs
        (
            Regex::new(r"(?i)\b([a-z0-9_]*(?:password|passwd|secret|token|api_key|apikey)[a-z0-9_]*)\s*([=:])\s*\S+")
                .unwrap(),
            "${1}${2}[REDACTED]",
        ),
    ]
});

/// Replace credentials in `text` with redaction markers.
pub fn redact_secrets(text: &str) -> String {
    let mut result = Cow::Borrowed(text);
    for (re, replacement) in SECRET_PATTERNS.iter() {
        if re.is_match(&result) {
            result = Cow::Owned(re.replace_all(&result, *replacement).into_owned());
        }
    }
    result.into_owned()
}

/// Cut `text` to at most `max_bytes`, on a char boundary, with a marker.
pub fn truncate_output(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... (truncated, {} bytes omitted)",
        &text[..cut],
        text.len() - cut
    )
}
