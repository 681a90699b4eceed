use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::console::{ConsoleLevel, ConsoleSink, ErrorLog};
use crate::sandbox::monitor::ResourceMonitor;
use crate::sandbox::outcome::{ExecutionError, ExecutionResult, ResourceUsage};
use crate::sandbox::traits::{ChangeCounter, ExecutionContext, NullOutput, OutputPort, ScriptError};
use crate::sandbox::validator::validate_code;
use crate::snippet::Snippet;

/// Per-execution knobs.
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub timeout: Duration,
    pub capture_console: bool,
    /// Soft ceiling in bytes; 0 disables the check
    pub max_memory_bytes: u64,
    pub monitor_resources: bool,
    pub max_code_size: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for SandboxOptions {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            capture_console: config.capture_console,
            max_memory_bytes: config.max_memory_mb.saturating_mul(1024 * 1024),
            monitor_resources: config.monitor_resources,
            max_code_size: config.max_code_size,
        }
    }
}

/// One invocation of the sandbox. Consumed by a single execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionRequest<'a> {
    pub code: &'a str,
    /// Generated when absent
    pub execution_id: Option<&'a str>,
    pub snippet_name: Option<&'a str>,
    /// Overrides the sandbox defaults for this execution
    pub options: Option<&'a SandboxOptions>,
}

/// Lifecycle of one execution, traced at `trace` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Created,
    Validating,
    Blocked,
    Executing,
    Completed,
    Failed,
    TimedOut,
    Aborted,
    Cleaned,
}

struct ActiveEntry {
    seq: u64,
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl ActiveEntry {
    fn cancel(&self, reason: &str) {
        let _ = self.reason.set(reason.to_string());
        self.token.cancel();
    }
}

/// Running executions by id. Overlapping runs may share an id (a manual run
/// of a snippet that is also auto-running), so each id holds a list.
type ActiveMap = Mutex<HashMap<String, Vec<ActiveEntry>>>;

fn lock_active(active: &ActiveMap) -> MutexGuard<'_, HashMap<String, Vec<ActiveEntry>>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes an execution from the active map when it settles or is dropped.
struct ActiveGuard<'a> {
    active: &'a ActiveMap,
    id: String,
    seq: u64,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = lock_active(self.active);
        // An emergency stop may already have drained this entry.
        if let Some(entries) = active.get_mut(&self.id) {
            entries.retain(|e| e.seq != self.seq);
            if entries.is_empty() {
                active.remove(&self.id);
            }
        }
    }
}

/// Validates, runs, times out and reports snippet executions.
///
/// Every call to [`ExecutionSandbox::run`] resolves to an [`ExecutionResult`];
/// failures are classified and logged, never propagated.
///
/// The timeout is a race: the caller stops waiting, but a host that cannot
/// drop an in-flight evaluation keeps running it.
pub struct ExecutionSandbox {
    sink: Arc<ConsoleSink>,
    options: SandboxOptions,
    active: ActiveMap,
    next_seq: AtomicU64,
}

impl ExecutionSandbox {
    pub fn new(sink: Arc<ConsoleSink>, options: SandboxOptions) -> Self {
        Self {
            sink,
            options,
            active: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn sink(&self) -> &Arc<ConsoleSink> {
        &self.sink
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Run `code` in `context`. A missing context is reported as unreachable.
    pub async fn run(
        &self,
        code: &str,
        context: Option<&dyn ExecutionContext>,
        execution_id: Option<&str>,
    ) -> ExecutionResult {
        let request = ExecutionRequest {
            code,
            execution_id,
            ..ExecutionRequest::default()
        };
        self.execute(request, context).await
    }

    /// Run a snippet record, keyed by its id.
    pub async fn run_snippet(
        &self,
        snippet: &Snippet,
        context: Option<&dyn ExecutionContext>,
    ) -> ExecutionResult {
        let request = ExecutionRequest {
            code: &snippet.code,
            execution_id: Some(snippet.id.as_str()),
            snippet_name: Some(snippet.name.as_str()),
            options: None,
        };
        self.execute(request, context).await
    }

    pub async fn execute(
        &self,
        request: ExecutionRequest<'_>,
        context: Option<&dyn ExecutionContext>,
    ) -> ExecutionResult {
        let options = request.options.unwrap_or(&self.options);
        let id = request
            .execution_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("exec-{}", Uuid::new_v4()));

        let (_guard, token, abort_reason) = self.register(&id);
        phase(&id, ExecutionPhase::Created);

        let context = match context {
            Some(ctx) if ctx.can_evaluate() => ctx,
            _ => {
                let error = ExecutionError::UnreachableContext {
                    reason: "cross-origin or unavailable execution context".to_string(),
                };
                phase(&id, ExecutionPhase::Failed);
                let result = self.report_failure(
                    &id,
                    request.snippet_name,
                    None,
                    error,
                    ResourceUsage::default(),
                    Vec::new(),
                );
                phase(&id, ExecutionPhase::Cleaned);
                return result;
            }
        };

        let mut monitor = options
            .monitor_resources
            .then(|| ResourceMonitor::start(context));
        let counter = monitor.as_ref().map(ResourceMonitor::counter);

        let console_port = self.sink.snippet_port(Some(id.as_str()));
        let port: &dyn OutputPort = if options.capture_console {
            &console_port
        } else {
            &NullOutput
        };

        phase(&id, ExecutionPhase::Validating);
        let report = validate_code(request.code, options.max_code_size);
        let mut warnings = report.warnings.clone();
        for warning in &warnings {
            debug!(execution_id = %id, warning = %warning, "Validator warning");
        }

        let outcome = if !report.is_valid {
            phase(&id, ExecutionPhase::Blocked);
            Err(ExecutionError::Validation {
                reason: report.first_error().unwrap_or("invalid code").to_string(),
            })
        } else {
            phase(&id, ExecutionPhase::Executing);
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ExecutionError::Aborted {
                    reason: abort_reason
                        .get()
                        .cloned()
                        .unwrap_or_else(|| "cancelled".to_string()),
                }),
                _ = tokio::time::sleep(options.timeout) => Err(ExecutionError::Timeout {
                    timeout_ms: options.timeout.as_millis() as u64,
                }),
                result = guarded_evaluate(context, request.code, port, counter, &id) => {
                    result.map_err(ExecutionError::Runtime)
                }
            }
        };

        let usage = monitor
            .as_ref()
            .map(|m| m.snapshot(context))
            .unwrap_or_default();

        if options.max_memory_bytes > 0 && usage.memory_delta > options.max_memory_bytes {
            let warning = format!(
                "Memory usage exceeded soft limit: {} MB used (limit {} MB)",
                usage.memory_delta / (1024 * 1024),
                options.max_memory_bytes / (1024 * 1024)
            );
            self.sink
                .log(ConsoleLevel::Warn, warning.clone(), Some(id.as_str()));
            warnings.push(warning);
        }

        let result = match outcome {
            Ok(value) => {
                phase(&id, ExecutionPhase::Completed);
                info!(
                    execution_id = %id,
                    elapsed_ms = usage.elapsed_ms,
                    dom_mutations = usage.dom_mutations,
                    "Snippet executed"
                );
                self.sink.log(
                    ConsoleLevel::Info,
                    format!("Snippet executed successfully in {}ms", usage.elapsed_ms),
                    Some(id.as_str()),
                );
                ExecutionResult::succeeded(id.clone(), value, usage, warnings)
            }
            Err(error) => {
                phase(
                    &id,
                    match &error {
                        ExecutionError::Timeout { .. } => ExecutionPhase::TimedOut,
                        ExecutionError::Aborted { .. } => ExecutionPhase::Aborted,
                        _ => ExecutionPhase::Failed,
                    },
                );
                self.report_failure(
                    &id,
                    request.snippet_name,
                    Some(context),
                    error,
                    usage,
                    warnings,
                )
            }
        };

        if let Some(monitor) = monitor.as_mut() {
            monitor.dispose();
        }
        phase(&id, ExecutionPhase::Cleaned);
        result
    }

    /// Signal every running execution with this id. Returns false if none is active.
    pub fn abort(&self, execution_id: &str) -> bool {
        match lock_active(&self.active).get(execution_id) {
            Some(entries) if !entries.is_empty() => {
                for entry in entries {
                    entry.cancel("aborted by user");
                }
                info!(
                    execution_id = %execution_id,
                    count = entries.len(),
                    "Execution abort requested"
                );
                true
            }
            _ => false,
        }
    }

    /// Abort every running execution and clear the active set.
    pub fn emergency_stop(&self) -> usize {
        let stopped: Vec<ActiveEntry> = {
            let mut active = lock_active(&self.active);
            active.drain().flat_map(|(_, entries)| entries).collect()
        };

        for entry in &stopped {
            entry.cancel("emergency stop");
        }

        warn!(count = stopped.len(), "Emergency stop");
        self.sink.log(
            ConsoleLevel::Warn,
            format!(
                "Emergency stop: aborted {} running execution(s)",
                stopped.len()
            ),
            None,
        );
        stopped.len()
    }

    pub fn active_count(&self) -> usize {
        lock_active(&self.active).values().map(Vec::len).sum()
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_active(&self.active).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn register(&self, id: &str) -> (ActiveGuard<'_>, CancellationToken, Arc<OnceLock<String>>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let reason = Arc::new(OnceLock::new());

        {
            let mut active = lock_active(&self.active);
            let entries = active.entry(id.to_string()).or_default();
            if !entries.is_empty() {
                debug!(execution_id = %id, running = entries.len(), "Execution id reused while still active");
            }
            entries.push(ActiveEntry {
                seq,
                token: token.clone(),
                reason: reason.clone(),
            });
        }

        let guard = ActiveGuard {
            active: &self.active,
            id: id.to_string(),
            seq,
        };
        (guard, token, reason)
    }

    fn report_failure(
        &self,
        id: &str,
        snippet_name: Option<&str>,
        context: Option<&dyn ExecutionContext>,
        error: ExecutionError,
        usage: ResourceUsage,
        warnings: Vec<String>,
    ) -> ExecutionResult {
        let script = error.script_error();

        warn!(
            execution_id = %id,
            kind = error.kind().as_str(),
            error = %error,
            "Snippet execution failed"
        );

        self.sink.log_detailed_error(ErrorLog {
            snippet_id: Some(id.to_string()),
            snippet_name: snippet_name.map(str::to_string),
            message: error.message(),
            stack: script.and_then(|s| s.stack.clone()),
            timestamp: Utc::now(),
            location: context.and_then(|c| c.location()),
            line: script.and_then(|s| s.line),
            column: script.and_then(|s| s.column),
        });
        self.sink.log(
            ConsoleLevel::Error,
            format!(
                "Snippet execution failed ({}): {}",
                error.kind().as_str(),
                error.message()
            ),
            Some(id),
        );

        ExecutionResult::failed(id.to_string(), error, usage, warnings)
    }
}

fn phase(id: &str, phase: ExecutionPhase) {
    trace!(execution_id = %id, phase = ?phase, "Execution phase");
}

/// Evaluate the snippet body and enrich any thrown error with a position.
async fn guarded_evaluate(
    context: &dyn ExecutionContext,
    code: &str,
    port: &dyn OutputPort,
    counter: Option<ChangeCounter>,
    id: &str,
) -> Result<Value, ScriptError> {
    let started = Instant::now();
    let mutations_before = counter.as_ref().map(ChangeCounter::get);

    let result = context.evaluate(code, port).await;

    let mutations = match (counter, mutations_before) {
        (Some(counter), Some(before)) => counter.get().saturating_sub(before),
        _ => 0,
    };
    debug!(
        execution_id = %id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        mutations,
        ok = result.is_ok(),
        "Evaluation settled"
    );

    result.map_err(enrich)
}

fn enrich(mut error: ScriptError) -> ScriptError {
    if error.name.is_empty() {
        error.name = "Error".to_string();
    }
    if error.line.is_none() {
        if let Some((line, column)) = error
            .stack
            .as_deref()
            .and_then(crate::console::extract_position)
        {
            error.line = Some(line);
            error.column = Some(column);
        }
    }
    error
}
