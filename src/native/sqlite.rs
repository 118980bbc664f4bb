/// SQLite Native Driver
///
/// Implements the native driver traits on top of rusqlite so that the
/// bridge has a real engine to talk to. Recognized connection-string keys:
///
/// - `Data Source`: database file; empty or `:memory:` opens an in-memory database
/// - `Mode`: `ReadOnly`, `ReadWrite` or `ReadWriteCreate` (default)
/// - `Foreign Keys`: boolean, applied as `PRAGMA foreign_keys`
/// - `Journal Mode`: applied as `PRAGMA journal_mode`
///
/// Other keys (`Initial Catalog`, `User ID`, `Integrated Security`, ...) are
/// accepted and ignored.

use super::{Driver, NativeCommand, NativeConnection, NativeError, NativeReader, NativeResult, NativeValue};
use crate::config::ConnectionString;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use tracing::debug;

const VERSION_QUERY: &str = "SELECT sqlite_version()";

impl From<rusqlite::Error> for NativeError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _) => NativeError::with_code(code.extended_code, err.to_string()),
            _ => NativeError::new(err.to_string()),
        }
    }
}

impl From<ValueRef<'_>> for NativeValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => NativeValue::Null,
            ValueRef::Integer(i) => NativeValue::Integer(i),
            ValueRef::Real(f) => NativeValue::Real(f),
            ValueRef::Text(t) => NativeValue::Text(t.to_vec()),
            ValueRef::Blob(b) => NativeValue::Binary(b.to_vec()),
        }
    }
}

/// The rusqlite-backed driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteClient;

impl SqliteClient {
    pub fn new() -> Self {
        SqliteClient
    }
}

fn open_flags(mode: Option<&str>) -> NativeResult<OpenFlags> {
    let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    match mode.map(|m| m.to_ascii_lowercase()).as_deref() {
        None | Some("readwritecreate") => Ok(OpenFlags::default()),
        Some("readwrite") => Ok(base | OpenFlags::SQLITE_OPEN_READ_WRITE),
        Some("readonly") => Ok(base | OpenFlags::SQLITE_OPEN_READ_ONLY),
        Some(other) => Err(NativeError::new(format!("invalid Mode {:?} in connection string", other))),
    }
}

impl Driver for SqliteClient {
    type Connection = SqliteConnection;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn open(&self, connection_string: &str) -> NativeResult<SqliteConnection> {
        let parsed = ConnectionString::parse(connection_string).map_err(NativeError::new)?;
        let flags = open_flags(parsed.get("mode"))?;
        let source = parsed.get("data source").unwrap_or_default();

        let conn = if source.is_empty() || source == ":memory:" {
            Connection::open_in_memory_with_flags(flags)?
        } else {
            Connection::open_with_flags(source, flags)?
        };

        if let Some(enabled) = parsed.get_bool("foreign keys").map_err(NativeError::new)? {
            conn.pragma_update(None, "foreign_keys", enabled)?;
        }
        if let Some(mode) = parsed.get("journal mode") {
            // journal_mode reports the resulting mode as a row
            conn.query_row(&format!("PRAGMA journal_mode = {}", mode), [], |_| Ok(()))?;
        }

        let busy_ms: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
        let busy_timeout = Duration::from_millis(busy_ms.max(0) as u64);

        debug!(source, ?busy_timeout, "sqlite connection opened");
        Ok(SqliteConnection {
            conn: Some(conn),
            source: source.to_string(),
            busy_timeout,
        })
    }

    fn version_query(&self) -> &'static str {
        VERSION_QUERY
    }
}

/// An open rusqlite connection.
pub struct SqliteConnection {
    conn: Option<Connection>,
    source: String,
    busy_timeout: Duration,
}

impl SqliteConnection {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Borrows the connection for `command`.
    ///
    /// The busy timeout is connection-wide in SQLite, so every command sets
    /// it: its own timeout, or the one the connection opened with.
    fn prepare_command(&self, command: &NativeCommand) -> NativeResult<&Connection> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| NativeError::new("connection is closed"))?;
        conn.busy_timeout(command.timeout.unwrap_or(self.busy_timeout))?;
        Ok(conn)
    }
}

impl NativeConnection for SqliteConnection {
    fn close(&mut self) -> NativeResult<()> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| NativeError::from(e)),
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn execute_non_query(&mut self, command: &NativeCommand) -> NativeResult<u64> {
        let sql = command.sql()?;
        let conn = self.prepare_command(command)?;
        let mut stmt = conn.prepare(sql)?;
        if stmt.column_count() > 0 {
            let mut rows = stmt.query([])?;
            while rows.next()?.is_some() {}
            return Ok(0);
        }
        Ok(stmt.execute([])? as u64)
    }

    fn execute_scalar(&mut self, command: &NativeCommand) -> NativeResult<NativeValue> {
        let sql = command.sql()?;
        let conn = self.prepare_command(command)?;
        let mut stmt = conn.prepare(sql)?;
        if stmt.column_count() == 0 {
            stmt.execute([])?;
            return Ok(NativeValue::Null);
        }
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(NativeValue::from(row.get_ref(0)?)),
            None => Ok(NativeValue::Null),
        }
    }

    fn execute_reader(
        &mut self,
        command: &NativeCommand,
        consumer: &mut dyn FnMut(&mut dyn NativeReader),
    ) -> NativeResult<()> {
        let sql = command.sql()?;
        let conn = self.prepare_command(command)?;
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<Vec<u8>> = stmt
            .column_names()
            .into_iter()
            .map(|name| name.as_bytes().to_vec())
            .collect();

        // statements without result columns run now, like ExecuteReader would
        let rows = if names.is_empty() {
            stmt.execute([])?;
            None
        } else {
            Some(stmt.query([])?)
        };
        let mut reader = SqliteReader {
            rows,
            names,
            current: Vec::new(),
            closed: false,
        };
        consumer(&mut reader);
        Ok(())
    }
}

/// Forward-only reader over a rusqlite statement.
///
/// The current row is copied out on `read` so that `get_value` can be
/// called by index afterwards.
struct SqliteReader<'s> {
    rows: Option<rusqlite::Rows<'s>>,
    names: Vec<Vec<u8>>,
    current: Vec<NativeValue>,
    closed: bool,
}

impl NativeReader for SqliteReader<'_> {
    fn read(&mut self) -> NativeResult<bool> {
        if self.closed {
            return Err(NativeError::new("Invalid attempt to read when the reader is closed"));
        }
        self.current.clear();
        let Some(rows) = self.rows.as_mut() else {
            return Ok(false);
        };
        match rows.next()? {
            Some(row) => {
                for index in 0..self.names.len() {
                    self.current.push(NativeValue::from(row.get_ref(index)?));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn field_count(&self) -> usize {
        self.names.len()
    }

    fn get_name(&self, index: usize) -> NativeResult<Vec<u8>> {
        self.names
            .get(index)
            .cloned()
            .ok_or_else(|| NativeError::new(format!("column index {} out of range", index)))
    }

    fn get_value(&self, index: usize) -> NativeResult<NativeValue> {
        self.current
            .get(index)
            .cloned()
            .ok_or_else(|| NativeError::new(format!("no value at column {} of the current row", index)))
    }

    fn close(&mut self) {
        self.closed = true;
        self.rows = None;
        self.current.clear();
    }
}
