//! The black-box engine seam and the handle that owns one engine instance.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::envelope::Value;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an open engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for HandleId {
    fn from(value: u64) -> Self {
        HandleId(value)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rows produced by one statement, in the engine's own cell representation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeRowGroup {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<rusqlite::types::Value>>,
}

/// Everything one `execute` call produced
pub type NativeOutcome = Vec<NativeRowGroup>;

/// Failure raised by an engine
#[derive(Debug)]
pub enum EngineFailure {
    Sqlite(rusqlite::Error),
    /// The engine instance was closed before the call.
    Closed,
    /// A failure the engine described only in prose.
    Message(String),
    /// A failure carrying nothing a caller could read.
    Opaque,
}

impl From<rusqlite::Error> for EngineFailure {
    fn from(err: rusqlite::Error) -> Self {
        EngineFailure::Sqlite(err)
    }
}

/// Aborts whatever statement the engine is running when invoked.
pub struct Interrupter(Box<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(interrupt: impl Fn() + Send + Sync + 'static) -> Self {
        Interrupter(Box::new(interrupt))
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

/// An in-process SQL engine.
///
/// Implementations need not be safe for concurrent use: callers reach the
/// engine only through `&mut`, one call at a time.
pub trait SqlEngine: Send {
    /// Run `sql` with positional `params` and return the rows it produced.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<NativeOutcome, EngineFailure>;

    /// Release the engine's resources. Later `execute` calls must fail with
    /// [`EngineFailure::Closed`].
    fn close(&mut self) -> Result<(), EngineFailure> {
        Ok(())
    }

    /// Handle that can abort a running `execute` from another thread.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

/// One open engine instance and its identity
#[derive(Debug)]
pub struct DatabaseHandle<E> {
    id: HandleId,
    engine: E,
    closed: bool,
}

impl<E: SqlEngine> DatabaseHandle<E> {
    pub fn new(engine: E) -> Self {
        Self {
            id: HandleId::next(),
            engine,
            closed: false,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<NativeOutcome, EngineFailure> {
        if self.closed {
            return Err(EngineFailure::Closed);
        }
        self.engine.execute(sql, params)
    }

    pub fn interrupter(&self) -> Option<Interrupter> {
        self.engine.interrupter()
    }

    /// Close the engine. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), EngineFailure> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.engine.close()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}
