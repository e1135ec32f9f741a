use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Top-level configuration, read from a TOML file with `[adder]` and
/// `[cache]` tables. Missing tables and fields take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CafsConfig {
    pub adder: AdderConfig,
    pub cache: CacheConfig,
}

impl CafsConfig {
    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }
}

/// Queue sizes for streaming ingestion sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdderConfig {
    /// Files that may wait in the work queue before `add_file` blocks.
    pub work_queue: usize,
    /// Completion events that may wait unread before ingestion blocks.
    pub event_queue: usize,
}

impl Default for AdderConfig {
    fn default() -> Self {
        Self {
            work_queue: 16,
            event_queue: 64,
        }
    }
}

/// Behaviour of the cache decorator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Mirror every successful put into the secondary store.
    pub full: bool,
    /// Mirror on a detached thread instead of inside `put`.
    pub async_write: bool,
}
