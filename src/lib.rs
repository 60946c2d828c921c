//! Embedded SQLite execution behind a single-worker isolation boundary.
//!
//! # Intention
//!
//! - Accept SQL requests as plain messages and answer each with exactly one
//!   response, in arrival order.
//! - Keep the engine handle owned by one worker so no two statements ever
//!   run against it at the same time.
//! - Turn engine failures into classified, serializable errors instead of
//!   letting them escape.
//!
//! # Architectural Boundaries
//!
//! - `envelope`: wire shapes only, no engine types.
//! - `engine` / `sqlite`: the black-box engine contract and its SQLite
//!   implementation.
//! - `gateway` / `marshal`: one execution, and the translation of its outcome.
//! - `runtime`: queueing, ordering, lifecycle.

pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod marshal;
pub mod runtime;
pub mod sqlite;

pub use config::{RuntimeConfig, WorkerConfig};
pub use engine::{
    DatabaseHandle, EngineFailure, HandleId, Interrupter, NativeOutcome, NativeRowGroup, SqlEngine,
};
pub use envelope::{Request, Response, ResultSet, RowGroup, Value};
pub use error::{ConfigError, ErrorKind, ExecutionError, RuntimeError, UNKNOWN_EXECUTION_ERROR};
pub use gateway::ExecutionGateway;
pub use runtime::{BoundaryClient, BoundaryRuntime, RuntimeState, SqlExecutor};
pub use sqlite::{SqliteConfig, SqliteEngine};
