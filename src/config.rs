//! Host configuration (`modhost.toml`).
//!
//! ```toml
//! hot_reload = true
//! search_dirs = ["mods", "/opt/host/modules"]
//!
//! [[autorun]]
//! module = "game"
//! entry = "main"
//! own_thread = true
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_ENTRY: &str = "main";

fn default_entry() -> String {
    DEFAULT_ENTRY.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// One module to run automatically at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AutorunEntry {
    /// Logical module name, or an explicit filename.
    pub module: String,
    /// Entry point to invoke; an empty string loads without invoking.
    #[serde(default = "default_entry")]
    pub entry: String,
    /// Run the entry point on a dedicated tracked thread.
    #[serde(default)]
    pub own_thread: bool,
}

/// Host configuration file contents.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Reload modules automatically when their backing file changes.
    pub hot_reload: bool,
    /// Extra module search directories, appended after the defaults.
    pub search_dirs: Vec<PathBuf>,
    /// Modules to run at startup.
    pub autorun: Vec<AutorunEntry>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            hot_reload: true,
            search_dirs: Vec::new(),
            autorun: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the first existing file from `candidates`. `Ok(None)` when none
    /// exists.
    pub fn load_first_found(candidates: &[PathBuf]) -> Result<Option<(PathBuf, Self)>, ConfigError> {
        for candidate in candidates {
            if candidate.is_file() {
                return Self::load(candidate).map(|config| Some((candidate.clone(), config)));
            }
        }
        Ok(None)
    }
}
