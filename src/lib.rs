pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod host;
pub mod pattern;
pub mod sandbox;
pub mod scheduler;
pub mod snippet;

pub use console::ConsoleSink;
pub use error::{Result, SnipboxError};
pub use sandbox::{ExecutionContext, ExecutionResult, ExecutionSandbox, SandboxOptions};
pub use scheduler::AutoRunScheduler;
pub use snippet::Snippet;
