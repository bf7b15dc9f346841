//! Message sanitization.
//!
//! Strips credential-like substrings and long opaque tokens from failure
//! messages before they are logged, stored in analytics or surfaced.

use regex::Regex;

use crate::{RampartError, Result};

/// Longest sanitized message kept, in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

const REDACTED: &str = "[REDACTED]";

/// Ordered `(pattern, replacement)` pairs; earlier patterns run first.
const PATTERNS: &[(&str, &str)] = &[
    // user:password@host in URLs
    (r"(?i)([a-z][a-z0-9+.-]*://)[^/\s:@]+:[^/\s@]+@", "${1}[REDACTED]@"),
    // Authorization header schemes
    (r"(?i)\b(bearer|basic|token)\s+[a-z0-9\-._~+/]+=*", "$1 [REDACTED]"),
    // key=value / key: value credentials
    (
        r#"(?i)\b(api[_-]?key|access[_-]?token|refresh[_-]?token|client[_-]?secret|secret|password|passwd|pwd|auth|authorization|token)(["']?\s*[:=]\s*["']?)[^\s"'&,;]+"#,
        "$1$2[REDACTED]",
    ),
    // GitHub personal access tokens and similar prefixed tokens
    (r"\b(gh[pousr]_[A-Za-z0-9]{20,}|xox[abpr]-[A-Za-z0-9-]{10,})\b", REDACTED),
    // long opaque tokens (hex digests, base64 blobs, JWT segments)
    (r"\b[A-Za-z0-9_\-]{32,}\b", REDACTED),
];

/// Compiled sanitization rules.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    rules: Vec<(Regex, &'static str)>,
    max_chars: usize,
}

impl Sanitizer {
    /// Compile the built-in rules.
    pub fn new() -> Result<Self> {
        let rules = PATTERNS
            .iter()
            .map(|(pattern, replacement)| {
                Regex::new(pattern)
                    .map(|re| (re, *replacement))
                    .map_err(|e| {
                        RampartError::configuration(format!("invalid sanitizer pattern: {e}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            max_chars: MAX_MESSAGE_CHARS,
        })
    }

    /// Override the maximum message length.
    pub fn max_chars(mut self, n: usize) -> Self {
        self.max_chars = n;
        self
    }

    /// Return `message` with secrets removed and length bounded.
    pub fn sanitize(&self, message: &str) -> String {
        let mut out = message.to_owned();
        for (re, replacement) in &self.rules {
            if re.is_match(&out) {
                out = re.replace_all(&out, *replacement).into_owned();
            }
        }
        if out.chars().count() > self.max_chars {
            let mut truncated: String = out.chars().take(self.max_chars).collect();
            truncated.push('…');
            out = truncated;
        }
        out
    }
}
