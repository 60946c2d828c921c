use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::sqlite::SqliteConfig;

const DEFAULT_THREAD_NAME: &str = "sqlite-boundary";

/// Boundary runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name prefix for the dispatcher and executor threads.
    pub thread_name: String,
    /// Upper bound on a single execution (milliseconds). Exceeding it closes
    /// the boundary.
    pub execute_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            execute_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execute_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn execute_timeout(&self) -> Option<Duration> {
        self.execute_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration for the stdio worker process
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub sqlite: SqliteConfig,
    pub runtime: RuntimeConfig,
}

impl WorkerConfig {
    /// Load a JSON config file; every field is optional.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
