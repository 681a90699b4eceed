use std::path::{Path, PathBuf};

use crate::config::types::SnipboxConfig;
use crate::error::{Result, SnipboxError};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "snipbox", "snipbox") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".snipbox").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values.
///
/// An explicitly requested path must exist; the default path may be absent.
pub fn load_config(config_path: Option<&Path>) -> Result<SnipboxConfig> {
    let path = match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(SnipboxError::ConfigNotFound {
                    path: path.display().to_string(),
                });
            }
            path.to_path_buf()
        }
        None => get_config_path(),
    };

    if !path.exists() {
        return Ok(SnipboxConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: SnipboxConfig =
        toml::from_str(&content).map_err(|e| SnipboxError::TomlParse(e.to_string()))?;

    Ok(config)
}
