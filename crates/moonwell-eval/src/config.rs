//! Runtime configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Settings for a [`Runtime`](crate::Runtime) instance.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Prefix for coroutine worker thread names; the coroutine id is appended.
    pub worker_name_prefix: String,
    /// Stack size for coroutine workers, in bytes. `None` uses the platform default.
    pub worker_stack_size: Option<usize>,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }

    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_name_prefix: "moonwell-coroutine".to_string(),
            worker_stack_size: None,
            log_filter: "info".to_string(),
        }
    }
}
