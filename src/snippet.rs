use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SnipboxError};

/// A user-authored script snippet.
///
/// Records are owned by the persistence layer; execution only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    /// Opaque identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Script text
    pub code: String,
    /// Trigger pattern (see [`crate::pattern`])
    #[serde(default)]
    pub url_pattern: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub execute_on_load: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Snippet {
    /// Create an enabled snippet that matches every location.
    pub fn new(id: impl Into<String>, name: impl Into<String>, code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            code: code.into(),
            url_pattern: String::new(),
            enabled: true,
            execute_on_load: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.url_pattern = pattern.into();
        self
    }

    pub fn on_load(mut self, execute_on_load: bool) -> Self {
        self.execute_on_load = execute_on_load;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether this snippet should fire automatically for `location`.
    pub fn fires_on(&self, location: &str) -> bool {
        self.enabled && self.execute_on_load && crate::pattern::matches(location, &self.url_pattern)
    }
}

/// Load an ordered snippet collection from a JSON array file.
pub fn load_snippets(path: &Path) -> Result<Vec<Snippet>> {
    if !path.exists() {
        return Err(SnipboxError::SnippetFileNotFound {
            path: path.display().to_string(),
        });
    }

    let content = std::fs::read_to_string(path)?;
    let snippets: Vec<Snippet> =
        serde_json::from_str(&content).map_err(|e| SnipboxError::InvalidSnippetFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    debug!(path = %path.display(), count = snippets.len(), "Loaded snippets");
    Ok(snippets)
}
