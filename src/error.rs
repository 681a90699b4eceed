use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnipboxError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    // Snippet supplier errors
    #[error("Snippet file not found: {path}")]
    SnippetFileNotFound { path: String },

    #[error("Invalid snippet file {path}: {reason}")]
    InvalidSnippetFile { path: String, reason: String },

    #[error("No script source given (pass a file or --eval)")]
    MissingSource,

    // Host errors
    #[error("Script host unavailable: {0}")]
    HostUnavailable(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SnipboxError {
    /// Whether the failure is caused by user input rather than the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::SnippetFileNotFound { .. }
                | Self::InvalidSnippetFile { .. }
                | Self::MissingSource
                | Self::TomlParse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SnipboxError>;
