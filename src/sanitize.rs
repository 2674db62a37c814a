//! Credential sanitizer
//!
//! Redacts secret-shaped substrings from free text before it is logged or
//! captured into a metering payload. Every replacement is itself outside the
//! pattern it replaced, so sanitizing twice yields the same text.

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

/// Marker inserted in place of a redacted secret.
pub const REDACTED: &str = "***REDACTED***";

/// Characters of text kept past a capture limit so a secret straddling the
/// limit is still long enough to match its pattern before truncation.
pub const SECRET_LOOKAHEAD: usize = 512;

struct SecretPattern {
    name: &'static str,
    regex: Regex,
    replacement: &'static str,
}

lazy_static! {
    static ref SECRET_PATTERNS: Vec<SecretPattern> = {
        let defs: &[(&str, &str, &str)] = &[
            ("openai_project_key", r"sk-proj-[A-Za-z0-9_\-]{20,}", "sk-proj-***REDACTED***"),
            ("anthropic_key", r"sk-ant-[A-Za-z0-9_\-]{20,}", "sk-ant-***REDACTED***"),
            ("openai_key", r"sk-[A-Za-z0-9]{20,}", "sk-***REDACTED***"),
            ("metering_key", r"hak_[A-Za-z0-9_\-]{8,}", "hak_***REDACTED***"),
            ("bearer", r"(?i)\bbearer\s+[A-Za-z0-9._~+/=\-]{8,}", "Bearer ***REDACTED***"),
            ("aws_access_key", r"\bAKIA[0-9A-Z]{16}\b", "AKIA***REDACTED***"),
            ("google_api_key", r"AIza[0-9A-Za-z_\-]{35}", "AIza***REDACTED***"),
            ("github_token", r"\bgh[pousr]_[A-Za-z0-9]{36,}", "gh_***REDACTED***"),
            ("slack_token", r"\bxox[baprs]-[A-Za-z0-9\-]{10,}", "xox-***REDACTED***"),
            (
                "jwt",
                r"\beyJ[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]{10,}",
                "***REDACTED_JWT***",
            ),
            (
                "key_value",
                concat!(
                    r#"(?i)\b(api[_\-]?key|secret|password|passwd|access[_\-]?token)"#,
                    r#"(["']?\s*[:=]\s*["']?)[^\s"',;&]{8,}"#,
                ),
                "${1}${2}***REDACTED***",
            ),
        ];
        defs.iter()
            .map(|(name, pattern, replacement)| SecretPattern {
                name,
                regex: Regex::new(pattern).expect("secret pattern must compile"),
                replacement,
            })
            .collect()
    };
}

/// Redact every known secret pattern in `text`.
pub fn sanitize_text(text: &str) -> String {
    sanitize_cow(text).into_owned()
}

/// Like [`sanitize_text`], but borrows when nothing was redacted.
pub fn sanitize_cow(text: &str) -> Cow<'_, str> {
    let mut out: Cow<'_, str> = Cow::Borrowed(text);
    for pattern in SECRET_PATTERNS.iter() {
        if pattern.regex.is_match(&out) {
            let replaced = pattern
                .regex
                .replace_all(&out, pattern.replacement)
                .into_owned();
            out = Cow::Owned(replaced);
        }
    }
    out
}

/// Recursively redact every string inside a JSON value.
pub fn sanitize_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if let Cow::Owned(clean) = sanitize_cow(s) {
                *s = clean;
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(sanitize_value),
        serde_json::Value::Object(map) => map.values_mut().for_each(sanitize_value),
        _ => {}
    }
}

/// Names of the patterns that match `text` (diagnostics only).
pub fn matching_patterns(text: &str) -> Vec<&'static str> {
    SECRET_PATTERNS
        .iter()
        .filter(|p| p.regex.is_match(text))
        .map(|p| p.name)
        .collect()
}

pub fn contains_secret(text: &str) -> bool {
    SECRET_PATTERNS.iter().any(|p| {
        p.regex
            .find_iter(text)
            .any(|m| !m.as_str().contains(REDACTED) && !m.as_str().contains("***REDACTED_JWT***"))
    })
}
