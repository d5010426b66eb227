/*!
 * Log redaction helpers.
 *
 * Error causes can embed fragments of prompts, responses, or credentials.
 * Anything that flows into a log message through `redact` has secret-shaped
 * `key=value` pairs and API-key-shaped values replaced with `[REDACTED]`.
 * Safe messages bypass this path by construction.
 */

use once_cell::sync::Lazy;
use regex::Regex;

const REDACTED: &str = "[REDACTED]";

/// Key substrings whose values are always redacted.
const SENSITIVE_KEY_SUBSTRINGS: &[&str] = &[
    "key",
    "token",
    "secret",
    "password",
    "authorization",
    "bearer",
    "api",
    "prompt",
    "content",
    "body",
    "input",
    "output",
    "text",
];

static KEY_VALUE_REGEX: Lazy<Regex> = Lazy::new(|| {
    // key=value / key: value pairs where the key looks secret-bearing;
    // values run to the next whitespace.
    let keys = SENSITIVE_KEY_SUBSTRINGS.join("|");
    let pattern = format!(
        r#"(?i)\b([A-Za-z0-9_.-]*(?:{})[A-Za-z0-9_.-]*)\s*[:=]\s*("[^"]*"|\S+)"#,
        keys
    );
    Regex::new(&pattern).unwrap()
});

static SENSITIVE_VALUE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\bsk-[A-Za-z0-9_-]{10,}\b").unwrap(),
        Regex::new(r"\bAIza[0-9A-Za-z\-_]{10,}\b").unwrap(),
        Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]+=*").unwrap(),
    ]
});

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_SUBSTRINGS.iter().any(|sub| key.contains(sub))
}

/// Redact secret-shaped content from a message before it is logged.
pub fn redact(message: &str) -> String {
    let mut out = KEY_VALUE_REGEX
        .replace_all(message, |caps: &regex::Captures<'_>| {
            debug_assert!(is_sensitive_key(&caps[1]));
            format!("{}={}", &caps[1], REDACTED)
        })
        .into_owned();

    for pattern in SENSITIVE_VALUE_PATTERNS.iter() {
        out = pattern.replace_all(&out, REDACTED).into_owned();
    }
    out
}

/// Render an error chain for logging, redacted.
pub fn redact_error(err: &anyhow::Error) -> String {
    redact(&format!("{:#}", err))
}
