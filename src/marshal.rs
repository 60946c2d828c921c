//! Conversion from engine-native output to wire-safe responses.

use rusqlite::ffi;
use rusqlite::types::Value as SqlValue;

use crate::engine::{EngineFailure, NativeOutcome, NativeRowGroup};
use crate::envelope::{ResultSet, Response, RowGroup, Value};
use crate::error::{ErrorKind, ExecutionError};

/// Message fragments SQLite uses when it cannot tokenize or parse input.
const SYNTAX_MARKERS: [&str; 4] = [
    "syntax error",
    "incomplete input",
    "unrecognized token",
    "near \"",
];

/// Build the response for one finished execution.
pub fn to_response(outcome: Result<NativeOutcome, ExecutionError>) -> Response {
    match outcome {
        Ok(groups) => Response::ok(result_set(groups)),
        Err(err) => Response::err(err),
    }
}

pub fn result_set(groups: NativeOutcome) -> ResultSet {
    ResultSet {
        groups: groups.into_iter().map(row_group).collect(),
    }
}

fn row_group(group: NativeRowGroup) -> RowGroup {
    RowGroup {
        columns: group.columns,
        rows: group
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(cell).collect())
            .collect(),
    }
}

fn cell(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(v),
        SqlValue::Real(v) => Value::Real(v),
        SqlValue::Text(v) => Value::Text(v),
        SqlValue::Blob(v) => Value::Blob(v),
    }
}

/// Classify an engine failure and pull out its message.
pub fn execution_error(failure: EngineFailure) -> ExecutionError {
    let err = match failure {
        EngineFailure::Sqlite(err) => sqlite_error(err),
        EngineFailure::Closed => {
            ExecutionError::new(ErrorKind::HandleClosed, "database handle is closed")
        }
        EngineFailure::Message(message) => ExecutionError::new(ErrorKind::Runtime, message),
        EngineFailure::Opaque => ExecutionError::unknown(),
    };
    if err.message.trim().is_empty() {
        return ExecutionError {
            code: err.code,
            ..ExecutionError::unknown()
        };
    }
    err
}

fn sqlite_error(err: rusqlite::Error) -> ExecutionError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.unwrap_or_else(|| failure.to_string());
            let kind = match failure.code {
                ffi::ErrorCode::ConstraintViolation => ErrorKind::Constraint,
                ffi::ErrorCode::TypeMismatch => ErrorKind::TypeMismatch,
                ffi::ErrorCode::Unknown if is_syntax_error(&message) => ErrorKind::Parse,
                _ => ErrorKind::Runtime,
            };
            ExecutionError::with_code(kind, message, failure.extended_code)
        }
        err @ (rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::ToSqlConversionFailure(_)) => {
            ExecutionError::new(ErrorKind::TypeMismatch, err.to_string())
        }
        rusqlite::Error::Utf8Error(err) => ExecutionError::new(ErrorKind::Parse, err.to_string()),
        rusqlite::Error::NulError(err) => ExecutionError::new(ErrorKind::Parse, err.to_string()),
        err => ExecutionError::new(ErrorKind::Runtime, err.to_string()),
    }
}

fn is_syntax_error(message: &str) -> bool {
    SYNTAX_MARKERS.iter().any(|marker| message.contains(marker))
}
