/// Connection Management Module
///
/// A `ConnectionHandle` owns exactly one open native connection together
/// with the text codec chosen for it. It is opened once, reused for every
/// command, and closed exactly once (explicitly or on drop).

use super::codec::TextCodec;
use super::cursor::RowCursor;
use super::value::{marshal, Row, Value};
use crate::config::ConnectionOptions;
use crate::core::{raise_error, ErrorStage, Result, SqlBridgeError};
use crate::native::{
    CommandType, Driver, NativeCommand, NativeConnection, NativeError, NativeReader, NativeResult, NativeValue,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Execution mode for [`ConnectionHandle::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteMode {
    /// Statement without result rows; yields the affected-row count
    NonQuery,
    /// Row-returning query; the rows are materialized
    Reader,
    /// First column of the first row
    Scalar,
}

/// A fully read result set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// What [`ConnectionHandle::execute`] produced, per mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    Affected(u64),
    Rows(ResultSet),
    Scalar(Value),
}

/// A single SQL command bound to a borrowed connection.
///
/// Executing consumes the command; it is disposed right after, whatever the mode.
pub struct Command<'c, C: NativeConnection + ?Sized> {
    connection: &'c mut C,
    native: NativeCommand,
}

impl<'c, C: NativeConnection + ?Sized> Command<'c, C> {
    /// Encodes `sql` with the connection's codec and applies the timeout.
    pub fn new(connection: &'c mut C, sql: &str, codec: TextCodec, timeout: Option<Duration>) -> Self {
        Command {
            connection,
            native: NativeCommand {
                text: codec.encode(sql),
                command_type: CommandType::Text,
                timeout,
            },
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.native.timeout
    }

    pub fn execute_non_query(self) -> NativeResult<u64> {
        self.connection.execute_non_query(&self.native)
    }

    pub fn execute_scalar(self) -> NativeResult<NativeValue> {
        self.connection.execute_scalar(&self.native)
    }

    pub fn execute_reader(self, consumer: &mut dyn FnMut(&mut dyn NativeReader)) -> NativeResult<()> {
        self.connection.execute_reader(&self.native, consumer)
    }
}

impl<C: NativeConnection + ?Sized> Drop for Command<'_, C> {
    fn drop(&mut self) {
        debug!(bytes = self.native.text.len(), "command disposed");
    }
}

/// One open native connection and its codec.
pub struct ConnectionHandle<C: NativeConnection> {
    native: Option<C>,
    server: String,
    codec: TextCodec,
    command_timeout: Option<Duration>,
}

impl<C: NativeConnection> ConnectionHandle<C> {
    /// Opens a native connection for `server` from its resolved options.
    ///
    /// # Errors
    ///
    /// Returns `SqlBridgeError::Connection` if the driver cannot open the
    /// connection (unreachable host, rejected login, malformed string).
    pub fn open<D>(driver: &D, server: &str, options: &ConnectionOptions) -> Result<Self>
    where
        D: Driver<Connection = C>,
    {
        let connection_string = options.connection_string();
        debug!(driver = driver.name(), server, "opening connection");
        let native = driver
            .open(&connection_string)
            .map_err(|e| raise_error(ErrorStage::Connect, e))?;

        Ok(ConnectionHandle {
            native: Some(native),
            server: server.to_string(),
            codec: TextCodec::from_utf8_flag(options.utf8.unwrap_or(false)),
            command_timeout: options.command_timeout(),
        })
    }

    /// Wraps an already open native connection.
    pub fn from_native(native: C, server: &str, codec: TextCodec, command_timeout: Option<Duration>) -> Self {
        ConnectionHandle {
            native: Some(native),
            server: server.to_string(),
            codec,
            command_timeout,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn codec(&self) -> TextCodec {
        self.codec
    }

    /// Timeout configured for the server, used when a call does not set one.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    pub fn state(&self) -> ConnectionState {
        match &self.native {
            Some(native) if !native.is_closed() => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn native_mut(&mut self) -> NativeResult<&mut C> {
        self.native
            .as_mut()
            .ok_or_else(|| NativeError::new("connection is closed"))
    }

    /// Builds a command for `sql` on this connection.
    pub fn command(&mut self, sql: &str, timeout: Option<Duration>) -> NativeResult<Command<'_, C>> {
        let codec = self.codec;
        let timeout = timeout.or(self.command_timeout);
        Ok(Command::new(self.native_mut()?, sql, codec, timeout))
    }

    pub fn execute_non_query(&mut self, sql: &str, timeout: Option<Duration>) -> NativeResult<u64> {
        self.command(sql, timeout)?.execute_non_query()
    }

    /// Runs `sql` in scalar mode. The native result is still raw; see
    /// [`marshal`] for the conversion.
    pub fn execute_scalar(&mut self, sql: &str, timeout: Option<Duration>) -> NativeResult<NativeValue> {
        self.command(sql, timeout)?.execute_scalar()
    }

    /// Runs `sql` in reader mode and hands a cursor to `f`.
    ///
    /// The outer result carries native failures to open the reader; the
    /// inner one is whatever `f` returned. The cursor is closed before this
    /// returns on every path.
    pub fn with_reader<T, F>(&mut self, sql: &str, timeout: Option<Duration>, f: F) -> NativeResult<Result<T>>
    where
        F: FnOnce(&mut RowCursor<'_>) -> Result<T>,
    {
        let codec = self.codec;
        let command = self.command(sql, timeout)?;

        let mut f = Some(f);
        let mut outcome = None;
        command.execute_reader(&mut |reader: &mut dyn NativeReader| {
            let mut cursor = RowCursor::new(reader, codec);
            if let Some(f) = f.take() {
                outcome = Some(f(&mut cursor));
            }
            cursor.close();
        })?;

        Ok(outcome.unwrap_or_else(|| {
            Err(SqlBridgeError::Command("driver returned without opening a reader".to_string()))
        }))
    }

    /// Executes `sql` in the given mode, translating native failures.
    pub fn execute(&mut self, sql: &str, timeout: Option<Duration>, mode: ExecuteMode) -> Result<ExecuteOutcome> {
        let translate = |e: NativeError| raise_error(ErrorStage::Command, e);
        match mode {
            ExecuteMode::NonQuery => self
                .execute_non_query(sql, timeout)
                .map(ExecuteOutcome::Affected)
                .map_err(translate),
            ExecuteMode::Scalar => {
                let value = self.execute_scalar(sql, timeout).map_err(translate)?;
                marshal(value, self.codec).map(ExecuteOutcome::Scalar)
            }
            ExecuteMode::Reader => self
                .with_reader(sql, timeout, |cursor| {
                    let columns = cursor.columns()?.to_vec();
                    let rows = cursor.materialize()?;
                    Ok(ExecuteOutcome::Rows(ResultSet { columns, rows }))
                })
                .map_err(translate)?,
        }
    }

    /// Releases the native connection. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut native) = self.native.take() {
            match native.close() {
                Ok(()) => debug!(server = %self.server, "connection closed"),
                Err(e) => warn!(server = %self.server, error = %e, "failed to close connection"),
            }
        }
    }
}

impl<C: NativeConnection> Drop for ConnectionHandle<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: NativeConnection> std::fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("server", &self.server)
            .field("codec", &self.codec)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedDriver, ScriptedResult};

    fn open_handle(driver: &ScriptedDriver) -> ConnectionHandle<crate::test_utils::ScriptedConnection> {
        let options = ConnectionOptions {
            host: Some("scripted".into()),
            utf8: Some(true),
            ..Default::default()
        };
        ConnectionHandle::open(driver, "default", &options).unwrap()
    }

    #[test]
    fn test_open_builds_connection_string() {
        let driver = ScriptedDriver::new();
        let handle = open_handle(&driver);

        assert!(handle.is_open());
        assert_eq!(handle.codec(), TextCodec::Utf8);
        assert_eq!(
            driver.log().connection_strings(),
            vec!["Data Source=scripted;Initial Catalog=;Integrated Security=True".to_string()]
        );
    }

    #[test]
    fn test_open_failure_is_connection_error() {
        let driver = ScriptedDriver::new();
        let options = ConnectionOptions {
            conn_string: Some("Data Source=unreachable".into()),
            ..Default::default()
        };
        match ConnectionHandle::open(&driver, "default", &options) {
            Err(SqlBridgeError::Connection(msg)) => assert!(msg.contains("unreachable")),
            other => panic!("Expected Connection error, got {other:?}"),
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let driver = ScriptedDriver::new();
        let mut handle = open_handle(&driver);

        handle.close();
        handle.close();
        drop(handle);

        assert_eq!(driver.log().connection_closes(), 1);
    }

    #[test]
    fn test_execute_modes() {
        let driver = ScriptedDriver::new()
            .script("UPDATE t SET x = 1", ScriptedResult::affected(3))
            .script("SELECT COUNT(*) FROM t", ScriptedResult::scalar(NativeValue::Integer(2)))
            .script(
                "SELECT id, name FROM t",
                ScriptedResult::rows(
                    &["id", "name"],
                    vec![
                        vec![NativeValue::Integer(1), NativeValue::Text("Ann".into())],
                        vec![NativeValue::Integer(2), NativeValue::Null],
                    ],
                ),
            );
        let mut handle = open_handle(&driver);

        let affected = handle.execute("UPDATE t SET x = 1", None, ExecuteMode::NonQuery).unwrap();
        assert_eq!(affected, ExecuteOutcome::Affected(3));

        let scalar = handle.execute("SELECT COUNT(*) FROM t", None, ExecuteMode::Scalar).unwrap();
        assert_eq!(scalar, ExecuteOutcome::Scalar(Value::Integer(2)));

        match handle.execute("SELECT id, name FROM t", None, ExecuteMode::Reader).unwrap() {
            ExecuteOutcome::Rows(set) => {
                assert_eq!(set.columns, vec!["id", "name"]);
                assert_eq!(set.rows[0], vec![Value::Integer(1), Value::Text("Ann".into())]);
                assert_eq!(set.rows[1], vec![Value::Integer(2), Value::Null]);
            }
            other => panic!("Expected rows, got {other:?}"),
        }
        assert_eq!(driver.log().reader_closes(), 1);
    }

    #[test]
    fn test_command_applies_timeout_and_encoding() {
        let driver = ScriptedDriver::new();
        let mut handle = ConnectionHandle::from_native(
            driver.open("Data Source=x").unwrap(),
            "default",
            TextCodec::Utf8,
            Some(Duration::from_secs(30)),
        );

        let command = handle.command("SELECT 1", None).unwrap();
        assert_eq!(command.timeout(), Some(Duration::from_secs(30)));
        drop(command);

        let command = handle.command("SELECT 1", Some(Duration::from_secs(5))).unwrap();
        assert_eq!(command.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_execute_on_closed_handle_fails() {
        let driver = ScriptedDriver::new();
        let mut handle = open_handle(&driver);
        handle.close();

        assert_eq!(handle.state(), ConnectionState::Closed);
        let err = handle.execute("SELECT 1", None, ExecuteMode::Scalar).unwrap_err();
        assert!(matches!(err, SqlBridgeError::Command(_)));
    }
}
