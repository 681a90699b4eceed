//! Console and error sink shared by every execution.
//!
//! One [`ConsoleSink`] is created per process and handed to the sandbox and the
//! auto-run scheduler. It keeps bounded, oldest-first-evicted histories of
//! console messages and error logs and forwards each new message to a single
//! registered listener.

mod export;
mod suggestions;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConsoleConfig;
use crate::sandbox::OutputPort;

pub use export::{ErrorStatistics, ExportReport};
pub use suggestions::{
    categorize, extract_position, get_suggestions, rules, SuggestionCategory, SuggestionRule,
};

/// Number of entries reported as "recent" in statistics.
pub const RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Error,
    Warn,
    Info,
    /// Emitted by automatic execution
    Auto,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Auto => "auto",
        }
    }
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    Snippet,
    Page,
}

impl MessageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snippet => "snippet",
            Self::Page => "page",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub origin: MessageOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<String>,
}

impl ConsoleMessage {
    pub fn new(level: ConsoleLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            timestamp: Utc::now(),
            origin: MessageOrigin::Snippet,
            snippet_id: None,
        }
    }

    pub fn from_page(mut self) -> Self {
        self.origin = MessageOrigin::Page;
        self
    }

    pub fn for_snippet(mut self, snippet_id: Option<&str>) -> Self {
        self.snippet_id = snippet_id.map(str::to_string);
        self
    }
}

/// Detailed record of one failed execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLog {
    pub snippet_id: Option<String>,
    pub snippet_name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Location of the page the snippet ran against
    pub location: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Listener invoked for every appended message.
pub type OutputListener = Arc<dyn Fn(&ConsoleMessage) + Send + Sync>;

struct History {
    messages: VecDeque<ConsoleMessage>,
    errors: VecDeque<ErrorLog>,
    max_messages: usize,
    max_errors: usize,
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

pub struct ConsoleSink {
    history: Mutex<History>,
    listener: Mutex<Option<OutputListener>>,
}

impl ConsoleSink {
    pub fn new(max_messages: usize, max_errors: usize) -> Self {
        Self {
            history: Mutex::new(History {
                messages: VecDeque::new(),
                errors: VecDeque::new(),
                max_messages,
                max_errors,
            }),
            listener: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(config.max_messages, config.max_errors)
    }

    fn history(&self) -> MutexGuard<'_, History> {
        // History stays consistent even if a listener panicked mid-append.
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the listener for new messages, replacing any previous one.
    pub fn set_output_sink<F>(&self, listener: F)
    where
        F: Fn(&ConsoleMessage) + Send + Sync + 'static,
    {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(listener));
    }

    pub fn clear_output_sink(&self) {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Append to history, then notify the listener.
    pub fn add_message(&self, message: ConsoleMessage) {
        {
            let mut history = self.history();
            let max = history.max_messages;
            push_bounded(&mut history.messages, message.clone(), max);
        }

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener(&message);
        }
    }

    /// Shorthand for a snippet-origin message.
    pub fn log(&self, level: ConsoleLevel, text: impl Into<String>, snippet_id: Option<&str>) {
        self.add_message(ConsoleMessage::new(level, text).for_snippet(snippet_id));
    }

    /// Record a failure and emit its error text, position, suggestions and location.
    pub fn log_detailed_error(&self, error: ErrorLog) {
        {
            let mut history = self.history();
            let max = history.max_errors;
            push_bounded(&mut history.errors, error.clone(), max);
        }

        let id = error.snippet_id.as_deref();
        let label = error
            .snippet_name
            .as_deref()
            .or(id)
            .map(|name| format!(" in '{}'", name))
            .unwrap_or_default();

        self.log(
            ConsoleLevel::Error,
            format!("Error{}: {}", label, error.message),
            id,
        );

        if let Some(line) = error.line {
            let position = match error.column {
                Some(column) => format!("  at line {}, column {}", line, column),
                None => format!("  at line {}", line),
            };
            self.log(ConsoleLevel::Error, position, id);
        }

        for rule in get_suggestions(&error.message) {
            self.log(
                ConsoleLevel::Info,
                format!("Suggestion: {}", rule.suggestion),
                id,
            );
        }

        if let Some(location) = &error.location {
            self.log(ConsoleLevel::Info, format!("Location: {}", location), id);
        }
    }

    /// Port that tags output with a snippet origin.
    pub fn snippet_port<'a>(&'a self, snippet_id: Option<&'a str>) -> ConsolePort<'a> {
        ConsolePort {
            sink: self,
            origin: MessageOrigin::Snippet,
            snippet_id,
        }
    }

    /// Port for forwarding the hosted page's own console output.
    pub fn page_port(&self) -> ConsolePort<'_> {
        ConsolePort {
            sink: self,
            origin: MessageOrigin::Page,
            snippet_id: None,
        }
    }

    pub fn messages(&self) -> Vec<ConsoleMessage> {
        self.history().messages.iter().cloned().collect()
    }

    pub fn errors(&self) -> Vec<ErrorLog> {
        self.history().errors.iter().cloned().collect()
    }

    pub fn messages_for(&self, snippet_id: &str) -> Vec<ConsoleMessage> {
        self.history()
            .messages
            .iter()
            .filter(|m| m.snippet_id.as_deref() == Some(snippet_id))
            .cloned()
            .collect()
    }

    pub fn errors_for(&self, snippet_id: &str) -> Vec<ErrorLog> {
        self.history()
            .errors
            .iter()
            .filter(|e| e.snippet_id.as_deref() == Some(snippet_id))
            .cloned()
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.history().messages.len()
    }

    pub fn error_count(&self) -> usize {
        self.history().errors.len()
    }

    pub fn clear(&self) {
        let mut history = self.history();
        history.messages.clear();
        history.errors.clear();
    }

    /// Remove every message and error belonging to one snippet.
    pub fn clear_snippet(&self, snippet_id: &str) {
        let mut history = self.history();
        history
            .messages
            .retain(|m| m.snippet_id.as_deref() != Some(snippet_id));
        history
            .errors
            .retain(|e| e.snippet_id.as_deref() != Some(snippet_id));
    }

    pub fn error_statistics(&self) -> ErrorStatistics {
        let history = self.history();
        ErrorStatistics::collect(history.errors.iter())
    }

    /// Human-readable report of the current history.
    pub fn export_text(&self) -> String {
        let history = self.history();
        export::render_text(history.messages.iter(), history.errors.iter())
    }

    /// Structured report of the current history.
    pub fn export_report(&self) -> ExportReport {
        let history = self.history();
        ExportReport {
            exported_at: Utc::now(),
            messages: history.messages.iter().cloned().collect(),
            errors: history.errors.iter().cloned().collect(),
            statistics: ErrorStatistics::collect(history.errors.iter()),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::from_config(&ConsoleConfig::default())
    }
}

/// [`OutputPort`] writing into a [`ConsoleSink`].
pub struct ConsolePort<'a> {
    sink: &'a ConsoleSink,
    origin: MessageOrigin,
    snippet_id: Option<&'a str>,
}

impl OutputPort for ConsolePort<'_> {
    fn write(&self, level: ConsoleLevel, text: &str) {
        let mut message = ConsoleMessage::new(level, text).for_snippet(self.snippet_id);
        message.origin = self.origin;
        self.sink.add_message(message);
    }
}
