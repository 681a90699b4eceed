//! In-memory execution context for driving the sandbox without a real host.
//!
//! Scripts are interpreted one statement per line:
//!
//! - `console.log("text");` (also `warn`, `error`, `info`)
//! - `throw new Error("message");` (any error class name)
//! - `sleep(ms);` waits on the tokio clock
//! - `mutate(n);` records `n` document changes
//! - `alloc(bytes);` grows reported memory usage
//! - `return <json>;`
//!
//! Every line is also valid script, so the validator accepts it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use snipbox::console::ConsoleLevel;
use snipbox::sandbox::{
    ChangeCounter, ChangeObserver, DocumentModel, ExecutionContext, OutputPort, ScriptError,
};

#[derive(Default)]
pub struct FakeDocument {
    observers: Arc<Mutex<Vec<(usize, ChangeCounter)>>>,
    next_observer: AtomicUsize,
    disconnects: Arc<AtomicUsize>,
}

impl FakeDocument {
    fn mutate(&self, n: u64) {
        for (_, counter) in self.observers.lock().unwrap().iter() {
            counter.record(n);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

struct FakeObserver {
    id: usize,
    observers: Arc<Mutex<Vec<(usize, ChangeCounter)>>>,
    disconnects: Arc<AtomicUsize>,
}

impl ChangeObserver for FakeObserver {
    fn disconnect(&mut self) {
        self.observers.lock().unwrap().retain(|(id, _)| *id != self.id);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl DocumentModel for FakeDocument {
    fn observe(&self, counter: ChangeCounter) -> Box<dyn ChangeObserver> {
        let id = self.next_observer.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().unwrap().push((id, counter));
        Box::new(FakeObserver {
            id,
            observers: self.observers.clone(),
            disconnects: self.disconnects.clone(),
        })
    }
}

pub struct FakeContext {
    reachable: bool,
    with_document: bool,
    has_memory: bool,
    location: Option<String>,
    ready: AtomicBool,
    ready_notify: Notify,
    memory: AtomicU64,
    pub document: FakeDocument,
    evaluated: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeContext {
    fn default() -> Self {
        Self {
            reachable: true,
            with_document: true,
            has_memory: true,
            location: None,
            ready: AtomicBool::new(true),
            ready_notify: Notify::new(),
            memory: AtomicU64::new(10 * 1024 * 1024),
            document: FakeDocument::default(),
            evaluated: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose evaluation entry point is blocked.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::default()
        }
    }

    /// A context with neither a document model nor memory introspection.
    pub fn bare() -> Self {
        Self {
            with_document: false,
            has_memory: false,
            ..Self::default()
        }
    }

    pub fn not_ready() -> Self {
        let context = Self::default();
        context.ready.store(false, Ordering::SeqCst);
        context
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.ready_notify.notify_waiters();
    }

    /// Sources passed to `evaluate`, in call order.
    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Inner text of `prefix(...)` on `line`, if the line is such a call.
fn call_arg<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(prefix)?;
    let end = rest.rfind(')')?;
    Some(&rest[..end])
}

fn unquote(text: &str) -> String {
    text.trim().trim_matches('"').trim_matches('\'').to_string()
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionContext for FakeContext {
    fn name(&self) -> &str {
        "fake"
    }

    async fn evaluate(&self, source: &str, output: &dyn OutputPort) -> Result<Value, ScriptError> {
        self.evaluated.lock().unwrap().push(source.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        for (index, raw) in source.lines().enumerate() {
            let line = raw.trim().trim_end_matches(';');
            if line.is_empty() || line.starts_with("//") {
                continue;
            }

            let levels = [
                ("console.log(", ConsoleLevel::Log),
                ("console.info(", ConsoleLevel::Info),
                ("console.warn(", ConsoleLevel::Warn),
                ("console.error(", ConsoleLevel::Error),
            ];
            if let Some((text, level)) = levels
                .iter()
                .find_map(|(prefix, level)| call_arg(line, prefix).map(|arg| (arg, *level)))
            {
                output.write(level, &unquote(text));
            } else if let Some(rest) = line.strip_prefix("throw new ") {
                let open = rest.find('(').unwrap_or(rest.len());
                let name = &rest[..open];
                let message = call_arg(&rest[open..], "(").map(unquote).unwrap_or_default();
                let column = raw.find("throw").unwrap_or(0) + 1;
                let stack = format!(
                    "{}: {}\n    at <anonymous>:{}:{}",
                    name,
                    message,
                    index + 1,
                    column
                );
                return Err(ScriptError::new(name, message).with_stack(stack));
            } else if let Some(ms) = call_arg(line, "sleep(") {
                let ms: u64 = ms.trim().parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            } else if let Some(n) = call_arg(line, "mutate(") {
                self.document.mutate(n.trim().parse().unwrap_or(0));
            } else if let Some(bytes) = call_arg(line, "alloc(") {
                self.memory
                    .fetch_add(bytes.trim().parse().unwrap_or(0), Ordering::SeqCst);
            } else if let Some(value) = line.strip_prefix("return ") {
                let value = value.trim();
                return Ok(serde_json::from_str(value)
                    .unwrap_or_else(|_| Value::String(value.to_string())));
            }
        }
        Ok(Value::Null)
    }

    fn can_evaluate(&self) -> bool {
        self.reachable
    }

    fn document(&self) -> Option<&dyn DocumentModel> {
        if self.with_document {
            Some(&self.document)
        } else {
            None
        }
    }

    fn memory_usage(&self) -> Option<u64> {
        self.has_memory
            .then(|| self.memory.load(Ordering::SeqCst))
    }

    fn location(&self) -> Option<String> {
        self.location.clone()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn ready(&self) {
        loop {
            let notified = self.ready_notify.notified();
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }
}
