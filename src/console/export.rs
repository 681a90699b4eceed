use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{categorize, ConsoleMessage, ErrorLog, RECENT_ERRORS};

/// Stack lines included per error in the text report.
const STACK_EXCERPT_LINES: usize = 5;

/// Key used for errors without a snippet id or a matching suggestion.
const UNKNOWN: &str = "unknown";

/// Aggregate view over the error history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub by_snippet: BTreeMap<String, usize>,
    /// Keyed by the category of each error's first matching suggestion
    pub by_category: BTreeMap<String, usize>,
    /// Most recent errors, oldest first
    pub recent_errors: Vec<ErrorLog>,
}

impl ErrorStatistics {
    pub(crate) fn collect<'a, I>(errors: I) -> Self
    where
        I: DoubleEndedIterator<Item = &'a ErrorLog> + ExactSizeIterator,
    {
        let mut stats = Self {
            total_errors: errors.len(),
            ..Self::default()
        };

        let mut recent = Vec::with_capacity(RECENT_ERRORS);
        for error in errors.rev() {
            let snippet = error.snippet_id.as_deref().unwrap_or(UNKNOWN);
            *stats.by_snippet.entry(snippet.to_string()).or_default() += 1;

            let category = categorize(&error.message)
                .map(|c| c.as_str())
                .unwrap_or(UNKNOWN);
            *stats.by_category.entry(category.to_string()).or_default() += 1;

            if recent.len() < RECENT_ERRORS {
                recent.push(error.clone());
            }
        }
        recent.reverse();
        stats.recent_errors = recent;
        stats
    }
}

/// Structured export of the console history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub exported_at: DateTime<Utc>,
    pub messages: Vec<ConsoleMessage>,
    pub errors: Vec<ErrorLog>,
    pub statistics: ErrorStatistics,
}

pub(crate) fn render_text<'a>(
    messages: impl Iterator<Item = &'a ConsoleMessage>,
    errors: impl Iterator<Item = &'a ErrorLog>,
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== Console Messages ===");
    for message in messages {
        let _ = writeln!(
            out,
            "[{}] [{}] [{}] {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            message.origin.as_str(),
            message.level.as_str().to_uppercase(),
            message.text
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "=== Errors ===");
    for error in errors {
        let who = match (&error.snippet_name, &error.snippet_id) {
            (Some(name), Some(id)) => format!("{} ({})", name, id),
            (Some(name), None) => name.clone(),
            (None, Some(id)) => id.clone(),
            (None, None) => UNKNOWN.to_string(),
        };
        let _ = writeln!(
            out,
            "[{}] {}: {}",
            error.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            who,
            error.message
        );
        if let Some(location) = &error.location {
            let _ = writeln!(out, "  Location: {}", location);
        }
        if let Some(line) = error.line {
            let _ = writeln!(out, "  Line: {}, Column: {}", line, error.column.unwrap_or(0));
        }
        if let Some(stack) = &error.stack {
            let _ = writeln!(out, "  Stack:");
            for frame in stack.lines().take(STACK_EXCERPT_LINES) {
                let _ = writeln!(out, "    {}", frame.trim());
            }
        }
    }

    out
}
