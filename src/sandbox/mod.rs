mod executor;
mod monitor;
mod outcome;
mod traits;
pub mod validator;

pub use executor::{ExecutionPhase, ExecutionRequest, ExecutionSandbox, SandboxOptions};
pub use monitor::ResourceMonitor;
pub use outcome::{ErrorKind, ExecutionError, ExecutionResult, ResourceUsage};
pub use traits::{
    ChangeCounter, ChangeObserver, DocumentModel, ExecutionContext, NullOutput, OutputPort,
    ScriptError,
};
pub use validator::{validate_code, ValidationReport};
