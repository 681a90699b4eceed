use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::console::ConsoleLevel;
use crate::error::{Result, SnipboxError};
use crate::sandbox::{ExecutionContext, OutputPort, ScriptError};

/// Script placed before the snippet body. Routes the process console to
/// stdout as JSON records and reports the body's value or thrown error.
const PRELUDE: &str = r#"const __snipbox = (() => {
  const write = (record) => process.stdout.write(JSON.stringify(record) + "\n");
  const format = (args) => args.map((a) => {
    if (typeof a === "string") return a;
    try { return JSON.stringify(a); } catch (_) { return String(a); }
  }).join(" ");
  for (const [method, level] of [["log", "log"], ["debug", "log"], ["info", "info"], ["warn", "warn"], ["error", "error"]]) {
    console[method] = (...args) => write({ type: "console", level, text: format(args) });
  }
  const result = (value) => {
    try { write({ type: "result", value: value === undefined ? null : value }); }
    catch (_) { write({ type: "result", value: String(value) }); }
  };
  const fail = (err) => {
    const e = err instanceof Error ? err : new Error(String(err));
    write({ type: "error", name: e.name, message: e.message, stack: e.stack || null });
  };
  return { result, fail };
})();
(async () => {
  try {
    const value = await (function () {
"#;

const EPILOGUE: &str = r#"
    })();
    __snipbox.result(value);
  } catch (err) {
    __snipbox.fail(err);
  }
})();
"#;

/// One JSON line written by the prelude.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum HostRecord {
    Console {
        level: ConsoleLevel,
        text: String,
    },
    Result {
        value: Value,
    },
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
}

/// Execution context backed by a Node.js process per evaluation.
///
/// There is no document model and no memory introspection, so resource usage is
/// elapsed time only. The child is killed when an evaluation is dropped,
/// which makes timeouts and aborts real terminations on this host. An
/// evaluation settles on the first result or error record; timers the
/// snippet left scheduled are discarded with the child.
pub struct NodeContext {
    node_binary: String,
    extra_args: Vec<String>,
    location: Option<String>,
}

impl NodeContext {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            node_binary: config.node_binary.clone(),
            extra_args: config.extra_args.clone(),
            location: None,
        }
    }

    /// Report `location` as the page the snippets run against.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Check that the node binary runs, returning its version.
    pub async fn check_available(&self) -> Result<String> {
        let output = Command::new(&self.node_binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                SnipboxError::HostUnavailable(format!(
                    "'{}' could not be started: {}",
                    self.node_binary, e
                ))
            })?;

        if !output.status.success() {
            return Err(SnipboxError::HostUnavailable(format!(
                "'{} --version' exited with {}",
                self.node_binary, output.status
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(version = %version, "Found node");
        Ok(version)
    }
}

/// Wrap a snippet body into a complete script.
fn wrap(source: &str) -> String {
    let mut script = String::with_capacity(PRELUDE.len() + source.len() + EPILOGUE.len());
    script.push_str(PRELUDE);
    script.push_str(source);
    script.push_str(EPILOGUE);
    script
}

/// Lines preceding the snippet body in the wrapped script.
fn prelude_lines() -> u32 {
    PRELUDE.lines().count() as u32
}

/// Convert a wrapped-script line number to a snippet line number.
/// Lines in the prelude or epilogue have no snippet counterpart.
fn snippet_line(script_line: u32, body_lines: u32) -> Option<u32> {
    script_line
        .checked_sub(prelude_lines())
        .filter(|line| *line > 0 && *line <= body_lines)
}

fn body_lines(source: &str) -> u32 {
    source.lines().count().max(1) as u32
}

/// `[eval]:line:column` position of a stack frame in the wrapped script.
static EVAL_FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[eval\]:(\d+):(\d+)").unwrap());

/// Rewrite stack frames into snippet coordinates.
///
/// Frames inside the snippet body are renamed to `<snippet>:line:column`.
/// Frames in the wrapper or in node internals are dropped so that the first
/// remaining position, if any, belongs to the snippet.
fn remap_stack(stack: &str, body_lines: u32) -> String {
    let mut out = Vec::new();
    for line in stack.lines() {
        if !line.trim_start().starts_with("at ") {
            out.push(line.to_string());
            continue;
        }
        let mapped = EVAL_FRAME_RE.captures(line).and_then(|caps| {
            let script_line = caps[1].parse::<u32>().ok()?;
            let snippet = snippet_line(script_line, body_lines)?;
            Some(EVAL_FRAME_RE.replace(line, format!("<snippet>:{}:{}", snippet, &caps[2])))
        });
        if let Some(frame) = mapped {
            out.push(frame.into_owned());
        }
    }
    out.join("\n")
}

fn host_error(message: impl Into<String>) -> ScriptError {
    ScriptError::new("HostError", message)
}

fn script_error(name: String, message: String, stack: Option<String>, body_lines: u32) -> ScriptError {
    let stack = stack.map(|s| remap_stack(&s, body_lines));
    let position = stack.as_deref().and_then(crate::console::extract_position);
    ScriptError {
        name,
        message,
        stack,
        line: position.map(|(line, _)| line),
        column: position.map(|(_, column)| column),
    }
}

#[async_trait]
impl ExecutionContext for NodeContext {
    fn name(&self) -> &str {
        "node"
    }

    async fn evaluate(&self, source: &str, output: &dyn OutputPort) -> std::result::Result<Value, ScriptError> {
        let script = wrap(source);

        let mut cmd = Command::new(&self.node_binary);
        cmd.args(&self.extra_args);
        cmd.arg("-e");
        cmd.arg(&script);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| host_error(format!("Failed to start {}: {}", self.node_binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| host_error("node stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| host_error("node stderr was not captured"))?;

        // Drained concurrently so a chatty stderr cannot block the child.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let lines = body_lines(source);
        let mut outcome = None;
        let mut records = BufReader::new(stdout).lines();
        // Settle on the first result or error; pending timers must not hold the run open.
        while let Some(line) = records
            .next_line()
            .await
            .map_err(|e| host_error(format!("Failed to read node output: {}", e)))?
        {
            match serde_json::from_str::<HostRecord>(&line) {
                Ok(HostRecord::Console { level, text }) => output.write(level, &text),
                Ok(HostRecord::Result { value }) => {
                    outcome = Some(Ok(value));
                    break;
                }
                Ok(HostRecord::Error {
                    name,
                    message,
                    stack,
                }) => {
                    outcome = Some(Err(script_error(name, message, stack, lines)));
                    break;
                }
                // Raw writes to process.stdout
                Err(_) => output.write(ConsoleLevel::Log, &line),
            }
        }

        if outcome.is_some() {
            // Anything still scheduled in the child is discarded.
            let _ = child.start_kill();
        }
        let status = child
            .wait()
            .await
            .map_err(|e| host_error(format!("Failed to wait for node: {}", e)))?;
        let errors = stderr_task.await.unwrap_or_default();

        debug!(status = %status, stderr_len = errors.len(), "node exited");

        match outcome {
            Some(outcome) => {
                if !errors.trim().is_empty() {
                    output.write(ConsoleLevel::Error, errors.trim_end());
                }
                outcome
            }
            None => {
                // Died before reporting: wrapper-level syntax error or process.exit()
                let message = errors
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or("node exited without reporting a result")
                    .trim()
                    .to_string();
                let mut error = host_error(format!("{} ({})", message, status));
                if !errors.is_empty() {
                    error.stack = Some(remap_stack(&errors, lines));
                }
                Err(error)
            }
        }
    }

    fn location(&self) -> Option<String> {
        self.location.clone()
    }
}
