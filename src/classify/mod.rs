//! Error classification.
//!
//! Raw failures are mapped to an [`ErrorKind`] by an ordered table of
//! [`Rule`]s evaluated top-to-bottom; the first rule with a matching
//! predicate wins and [`ErrorKind::Unknown`] is the fallback. The table is
//! plain data: new patterns are added with [`Classifier::push_rule`] or
//! [`Classifier::prepend_rule`] without touching the dispatch in
//! [`Classifier::classify`].

pub mod sanitize;

pub use sanitize::Sanitizer;

use std::time::Duration;

use regex::Regex;

use crate::error::{ErrorKind, Failure, RawError};
use crate::{RampartError, Result};

/// A single predicate over a raw failure.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// HTTP status within an inclusive range.
    Status { min: u16, max: u16 },
    /// Case-insensitive substring of the message.
    Contains(Vec<String>),
    /// Regular expression over the message.
    Pattern(Regex),
    /// Status code quoted in the message; only consulted when the failure
    /// carries no HTTP status of its own.
    StatusInMessage(Regex),
}

impl Matcher {
    fn matches(&self, raw: &RawError, lowered: &str) -> bool {
        match self {
            Matcher::Status { min, max } => raw.status.is_some_and(|s| (*min..=*max).contains(&s)),
            Matcher::Contains(needles) => needles.iter().any(|n| lowered.contains(n.as_str())),
            Matcher::Pattern(re) => re.is_match(&raw.message),
            Matcher::StatusInMessage(re) => raw.status.is_none() && re.is_match(&raw.message),
        }
    }
}

/// Maps failures matching any of its predicates to `kind`.
#[derive(Debug, Clone)]
pub struct Rule {
    kind: ErrorKind,
    matchers: Vec<Matcher>,
}

impl Rule {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            matchers: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Match an exact HTTP status.
    pub fn status(self, status: u16) -> Self {
        self.status_range(status, status)
    }

    /// Match an inclusive HTTP status range.
    pub fn status_range(mut self, min: u16, max: u16) -> Self {
        self.matchers.push(Matcher::Status { min, max });
        self
    }

    /// Match any of `needles` as a case-insensitive substring.
    pub fn contains(mut self, needles: &[&str]) -> Self {
        self.matchers.push(Matcher::Contains(
            needles.iter().map(|n| n.to_lowercase()).collect(),
        ));
        self
    }

    /// Match a regular expression against the raw message.
    pub fn pattern(mut self, pattern: &str) -> Result<Self> {
        self.matchers.push(Matcher::Pattern(compile(pattern)?));
        Ok(self)
    }

    /// Match a status code quoted in the message of a status-less failure.
    pub fn status_in_message(mut self, pattern: &str) -> Result<Self> {
        self.matchers.push(Matcher::StatusInMessage(compile(pattern)?));
        Ok(self)
    }

    fn matches(&self, raw: &RawError, lowered: &str) -> bool {
        self.matchers.iter().any(|m| m.matches(raw, lowered))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        RampartError::configuration(format!("invalid classifier pattern {pattern:?}: {e}"))
    })
}

/// Built-in classification table, in evaluation order.
fn default_rules() -> Result<Vec<Rule>> {
    Ok(vec![
        Rule::new(ErrorKind::Network).contains(&[
            "econnrefused",
            "connection refused",
            "enotfound",
            "econnreset",
            "connection reset",
            "getaddrinfo",
            "dns error",
            "network error",
            "socket hang up",
        ]),
        Rule::new(ErrorKind::Authentication)
            .status(401)
            .status_in_message(r"\b401\b")?
            .contains(&[
                "unauthorized",
                "unauthenticated",
                "invalid credentials",
                "invalid api key",
                "invalid token",
                "authentication failed",
            ]),
        Rule::new(ErrorKind::Authorization)
            .status(403)
            .status_in_message(r"\b403\b")?
            .contains(&["forbidden", "permission denied", "insufficient permissions", "access denied"]),
        Rule::new(ErrorKind::RateLimit)
            .status(429)
            .status_in_message(r"\b429\b")?
            .contains(&["rate limit", "too many requests", "quota exceeded"]),
        Rule::new(ErrorKind::Validation)
            .status(400)
            .status(422)
            .status_in_message(r"\b(400|422)\b")?
            .contains(&["bad request", "validation failed", "invalid parameter", "invalid input"]),
        Rule::new(ErrorKind::Server)
            .status_range(500, 599)
            .status_in_message(r"\b5\d\d\b")?
            .contains(&["internal server error", "bad gateway", "service unavailable"]),
        Rule::new(ErrorKind::Timeout)
            .status(408)
            .contains(&["timeout", "timed out", "etimedout"]),
        Rule::new(ErrorKind::Security).contains(&[
            "csrf",
            "xss",
            "injection",
            "security violation",
            "signature mismatch",
        ]),
        Rule::new(ErrorKind::Configuration).contains(&[
            "not configured",
            "missing configuration",
            "configuration error",
            "invalid configuration",
            "missing environment variable",
        ]),
        Rule::new(ErrorKind::Cache).contains(&["cache", "redis"]),
        Rule::new(ErrorKind::ReportGeneration).contains(&[
            "report generation",
            "template render",
            "failed to render",
        ]),
    ])
}

/// Ordered, data-driven failure classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
    sanitizer: Sanitizer,
    retry_after_hint: Regex,
}

impl Classifier {
    /// Classifier with the built-in rule table.
    pub fn new() -> Result<Self> {
        Ok(Self {
            rules: default_rules()?,
            sanitizer: Sanitizer::new()?,
            retry_after_hint: Regex::new(r"(?i)retry[- ]after[:=\s]+(\d+)").map_err(|e| {
                RampartError::configuration(format!("invalid retry-after pattern: {e}"))
            })?,
        })
    }

    /// Append a rule (evaluated after existing rules).
    pub fn push_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Insert a rule ahead of all existing rules.
    pub fn prepend_rule(&mut self, rule: Rule) {
        self.rules.insert(0, rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// First matching kind, or [`ErrorKind::Unknown`].
    pub fn classify(&self, raw: &RawError) -> ErrorKind {
        let lowered = raw.message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(raw, &lowered))
            .map(Rule::kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// Turn a raw failure into a typed, sanitized error.
    pub fn enhance(&self, raw: &RawError, tool: &str, operation: &str) -> RampartError {
        let kind = self.classify(raw);
        let mut err = RampartError::new(kind, self.sanitizer.sanitize(&raw.message))
            .with_operation(tool, operation);
        err.context.status = raw.status;
        if kind == ErrorKind::RateLimit {
            err.retry_after = raw.retry_after.or_else(|| self.parse_retry_after(&raw.message));
        }
        err
    }

    /// Resolve any [`Failure`] to a typed error.
    ///
    /// Raw failures are classified; typed errors keep their kind and only
    /// get their message sanitized and missing context filled in.
    pub fn resolve(&self, failure: Failure, tool: &str, operation: &str) -> RampartError {
        match failure {
            Failure::Raw(raw) => self.enhance(&raw, tool, operation),
            Failure::Typed(mut err) => {
                err.message = self.sanitizer.sanitize(&err.message);
                if err.context.tool.is_none() {
                    err.context.tool = Some(tool.to_owned());
                }
                if err.context.operation.is_none() {
                    err.context.operation = Some(operation.to_owned());
                }
                err
            }
        }
    }

    fn parse_retry_after(&self, message: &str) -> Option<Duration> {
        self.retry_after_hint
            .captures(message)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}
