use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnipboxConfig {
    pub sandbox: SandboxConfig,
    pub console: ConsoleConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Execution timeout in milliseconds
    pub timeout_ms: u64,
    /// Forward snippet console output to the console sink
    pub capture_console: bool,
    /// Soft memory ceiling in MB (exceeding it only produces a warning)
    pub max_memory_mb: u64,
    /// Sample elapsed time, memory and document mutations per execution
    pub monitor_resources: bool,
    /// Maximum accepted snippet size in bytes
    pub max_code_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            capture_console: true,
            max_memory_mb: 50,
            monitor_resources: true,
            max_code_size: 256 * 1024,
        }
    }
}

/// History limits for the console sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Maximum retained console messages
    pub max_messages: usize,
    /// Maximum retained error logs
    pub max_errors: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_messages: 1000,
            max_errors: 1000,
        }
    }
}

/// Node.js host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Node.js binary name or path
    pub node_binary: String,
    /// Extra arguments passed to node before the script
    pub extra_args: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            extra_args: Vec::new(),
        }
    }
}
