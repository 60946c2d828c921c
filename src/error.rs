use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message used when the engine fails without saying why.
pub const UNKNOWN_EXECUTION_ERROR: &str = "unknown execution error";

/// Failure categories a caller can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// SQL text the engine could not parse, or an undecodable request frame.
    Parse,
    Constraint,
    TypeMismatch,
    /// Any other error raised while the engine ran the statement.
    Runtime,
    /// The handle is closed or is not the one this boundary owns.
    HandleClosed,
    BoundaryClosed,
    /// The in-flight execution exceeded the configured limit.
    Timeout,
    Unknown,
}

/// Structured failure delivered in place of a result set
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Engine result code, when the engine provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(kind: ErrorKind, message: impl Into<String>, code: i32) -> Self {
        Self {
            kind,
            message: message.into(),
            code: Some(code),
        }
    }

    pub fn unknown() -> Self {
        Self::new(ErrorKind::Unknown, UNKNOWN_EXECUTION_ERROR)
    }
}

/// Errors raised while starting or stopping a boundary runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Errors raised while loading worker configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
