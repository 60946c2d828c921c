use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Batch, Connection, OpenFlags, ToSql};
use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::{EngineFailure, Interrupter, NativeOutcome, NativeRowGroup, SqlEngine};
use crate::envelope::Value;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

/// SQLite engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the SQLite database file. `None` opens a private in-memory database.
    pub db_path: Option<PathBuf>,
    /// Open without write access and reject writes with `query_only`.
    pub read_only: bool,
    /// How long a statement waits on a locked database (milliseconds).
    pub busy_timeout_ms: u64,
    /// Enforce foreign key constraints.
    pub foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            read_only: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    /// Create a config for a file-backed database
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(db_path.into()),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    fn flags(&self) -> OpenFlags {
        if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        }
    }
}

/// SQLite behind the [`SqlEngine`] contract.
///
/// `execute` follows the classic `exec(sql, params)` shape: the text may hold
/// several statements, the same parameters bind to every one of them, and
/// each statement that yields rows contributes one row group. A statement
/// whose placeholder count differs from `params.len()` fails the whole call;
/// statements before it have already run.
pub struct SqliteEngine {
    conn: Option<Connection>,
}

impl SqliteEngine {
    pub fn open(config: &SqliteConfig) -> Result<Self, rusqlite::Error> {
        let conn = match &config.db_path {
            Some(path) => Connection::open_with_flags(path, config.flags())?,
            None => Connection::open_in_memory_with_flags(config.flags())?,
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        if config.read_only {
            conn.pragma_update(None, "query_only", true)?;
        }
        info!(
            path = %config.db_path.as_deref().map_or("<memory>".into(), |p| p.display().to_string()),
            read_only = config.read_only,
            "opened sqlite database"
        );
        Ok(Self { conn: Some(conn) })
    }

    pub fn open_path(path: &Path) -> Result<Self, rusqlite::Error> {
        Self::open(&SqliteConfig::new(path))
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(&SqliteConfig::in_memory())
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }
}

impl SqlEngine for SqliteEngine {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<NativeOutcome, EngineFailure> {
        let conn = self.conn.as_ref().ok_or(EngineFailure::Closed)?;
        let mut groups = Vec::new();
        let mut batch = Batch::new(conn, sql);
        while let Some(mut stmt) = batch.next()? {
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let width = columns.len();
            let mut rows = stmt.query(params_from_iter(params.iter()))?;

            let mut group = NativeRowGroup {
                columns,
                rows: Vec::new(),
            };
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(width);
                for idx in 0..width {
                    cells.push(row.get::<_, SqlValue>(idx)?);
                }
                group.rows.push(cells);
            }
            if !group.rows.is_empty() {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    fn close(&mut self) -> Result<(), EngineFailure> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, err)| EngineFailure::Sqlite(err))?;
            debug!("closed sqlite database");
        }
        Ok(())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let handle = self.conn.as_ref()?.get_interrupt_handle();
        Some(Interrupter::new(move || handle.interrupt()))
    }
}
