use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::sandbox::traits::ScriptError;

/// Classified failure of a single execution.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    /// Empty code, oversized code or a syntax error. Nothing was executed.
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    /// No usable evaluation entry point (e.g. cross-origin denial).
    #[error("Cannot access execution context: {reason}")]
    UnreachableContext { reason: String },

    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Execution aborted: {reason}")]
    Aborted { reason: String },

    /// The snippet's own code threw.
    #[error("{0}")]
    Runtime(ScriptError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnreachableContext,
    Timeout,
    Aborted,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::UnreachableContext => "unreachable_context",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::Runtime => "runtime",
        }
    }
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::UnreachableContext { .. } => ErrorKind::UnreachableContext,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Aborted { .. } => ErrorKind::Aborted,
            Self::Runtime(_) => ErrorKind::Runtime,
        }
    }

    /// The bare error text: the thrown message for runtime errors,
    /// the full description otherwise.
    pub fn message(&self) -> String {
        match self {
            Self::Runtime(err) => err.message.clone(),
            other => other.to_string(),
        }
    }

    /// Error class name as a script would see it.
    pub fn name(&self) -> &str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::UnreachableContext { .. } => "SecurityError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Aborted { .. } => "AbortError",
            Self::Runtime(err) if !err.name.is_empty() => &err.name,
            Self::Runtime(_) => "Error",
        }
    }

    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            Self::Runtime(err) => Some(err),
            _ => None,
        }
    }
}

/// Resources consumed by one execution. Zeroed when unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    pub elapsed_ms: u64,
    /// Approximate memory growth in bytes (never negative)
    pub memory_delta: u64,
    /// Structural document changes observed during execution
    pub dom_mutations: u64,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub resource_usage: ResourceUsage,
    pub warnings: Vec<String>,
}

impl ExecutionResult {
    pub fn succeeded(
        execution_id: String,
        value: Value,
        resource_usage: ResourceUsage,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            execution_id,
            success: true,
            value: Some(value),
            error: None,
            resource_usage,
            warnings,
        }
    }

    pub fn failed(
        execution_id: String,
        error: ExecutionError,
        resource_usage: ResourceUsage,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            execution_id,
            success: false,
            value: None,
            error: Some(error),
            resource_usage,
            warnings,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(ExecutionError::kind)
    }
}
