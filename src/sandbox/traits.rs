use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::console::ConsoleLevel;

/// An error thrown by snippet code inside the hosted context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptError {
    /// Error class name (e.g. "TypeError")
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ScriptError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// Destination for console output produced by a snippet.
///
/// Hosts call this explicitly instead of having their console functions
/// patched; an embedder that wants the page's own output captured forwards
/// it to a port as well.
pub trait OutputPort: Send + Sync {
    fn write(&self, level: ConsoleLevel, text: &str);
}

/// Port that drops everything (console capture disabled).
pub struct NullOutput;

impl OutputPort for NullOutput {
    fn write(&self, _level: ConsoleLevel, _text: &str) {}
}

/// Shared structural-change counter handed to a document observer.
#[derive(Debug, Clone, Default)]
pub struct ChangeCounter(Arc<AtomicU64>);

impl ChangeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `n` observed mutations.
    pub fn record(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A live structural-change subscription on a document model.
pub trait ChangeObserver: Send {
    /// Stop observing. Called exactly once by the resource monitor.
    fn disconnect(&mut self);
}

/// A document-like model that can report structural changes
/// (child list, attribute and text mutations anywhere in its subtree).
pub trait DocumentModel: Send + Sync {
    fn observe(&self, counter: ChangeCounter) -> Box<dyn ChangeObserver>;
}

/// Handle to a hosted execution context (an embedded page or script host).
///
/// Contexts are shared between executions: the sandbox adds no isolation,
/// so later snippets see whatever earlier ones left behind.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Returns the host name (e.g., "node", "webview")
    fn name(&self) -> &str;

    /// Evaluate script text as a function body and return its value.
    async fn evaluate(&self, source: &str, output: &dyn OutputPort) -> Result<Value, ScriptError>;

    /// Whether the evaluation entry point is reachable.
    /// Cross-origin or torn-down contexts return false.
    fn can_evaluate(&self) -> bool {
        true
    }

    /// Document model for change counting, if the host has one.
    fn document(&self) -> Option<&dyn DocumentModel> {
        None
    }

    /// Current memory usage in bytes, if the host exposes it.
    fn memory_usage(&self) -> Option<u64> {
        None
    }

    /// Location of the hosted page, if known.
    fn location(&self) -> Option<String> {
        None
    }

    /// Whether the document has finished loading.
    fn is_ready(&self) -> bool {
        true
    }

    /// Resolve once the document is ready. Default resolves immediately.
    async fn ready(&self) {}
}
