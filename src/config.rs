//! Session configuration.
//!
//! A [`Config`] is passed explicitly to [`crate::Session`]; there is no
//! process-wide connection state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Connection parameters for a session over a SQLite backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file. `None` opens a private in-memory database.
    pub database: Option<PathBuf>,
    /// Create the database file when it does not exist.
    pub create_if_missing: bool,
    /// Open the database read-only.
    pub read_only: bool,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Rows fetched per batch when scanning a vertex table.
    pub fetch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            create_if_missing: true,
            read_only: false,
            busy_timeout_ms: 5_000,
            fetch_size: 256,
        }
    }
}

impl Config {
    /// In-memory database with default settings.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed database with default settings.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            database: Some(path.into()),
            ..Self::default()
        }
    }

    /// Overrides the scan batch size.
    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| GraphError::Config {
            path: PathBuf::from("<inline>"),
            reason: err.to_string(),
        })
    }

    /// Reads a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| GraphError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        toml::from_str(&contents).map_err(|err| GraphError::Config {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// Human-readable database location for logs and errors.
    pub fn location(&self) -> String {
        match &self.database {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        }
    }

    pub(crate) fn effective_fetch_size(&self) -> usize {
        self.fetch_size.max(1)
    }
}

/// Default location of the CLI configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("relgraph").join("config.toml"))
}
