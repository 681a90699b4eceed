//! URL trigger patterns.
//!
//! A snippet's `urlPattern` decides whether it fires automatically for a
//! location. Patterns come in four flavours:
//!
//! - empty, `*` or `.*`: match everything
//! - `*.example.com`: wildcard domain (substring of the normalized location)
//! - anything containing `\ ^ $ [ ]`: case-insensitive regex against the raw location
//! - everything else: case-insensitive substring of the normalized location
//!
//! Matching never fails; a malformed regex is simply a non-match.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

static PROTOCOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://").unwrap());

const REGEX_METACHARS: &[char] = &['\\', '^', '$', '[', ']'];

/// How a pattern will be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    MatchAll,
    WildcardDomain,
    Regex,
    Substring,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MatchAll => "match-all",
            Self::WildcardDomain => "wildcard-domain",
            Self::Regex => "regex",
            Self::Substring => "substring",
        }
    }
}

/// Strip a leading protocol and `www.`, then lower-case.
pub fn normalize(location: &str) -> String {
    let trimmed = location.trim();
    let without_protocol = PROTOCOL_RE.replace(trimmed, "");
    let lowered = without_protocol.to_lowercase();
    match lowered.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lowered,
    }
}

/// Classify a trigger pattern.
pub fn classify(pattern: &str) -> PatternKind {
    let pattern = pattern.trim();
    if pattern.is_empty() || pattern == "*" || pattern == ".*" {
        return PatternKind::MatchAll;
    }
    if normalize(pattern).starts_with("*.") {
        return PatternKind::WildcardDomain;
    }
    if pattern.contains(REGEX_METACHARS) {
        return PatternKind::Regex;
    }
    PatternKind::Substring
}

/// Decide whether `location` matches a snippet trigger `pattern`.
pub fn matches(location: &str, pattern: &str) -> bool {
    match classify(pattern) {
        PatternKind::MatchAll => true,
        PatternKind::WildcardDomain => {
            let normalized = normalize(pattern);
            let domain = normalized.trim_start_matches("*.");
            normalize(location).contains(domain)
        }
        PatternKind::Regex => match RegexBuilder::new(pattern.trim())
            .case_insensitive(true)
            .build()
        {
            Ok(re) => re.is_match(location),
            Err(e) => {
                tracing::debug!(pattern = %pattern, error = %e, "Invalid URL pattern, treating as non-match");
                false
            }
        },
        PatternKind::Substring => normalize(location).contains(&normalize(pattern)),
    }
}
