/// Native Driver Module
///
/// The ADO-style relational client the bridge sits on top of, expressed as
/// traits. A driver opens connections from a connection string; a
/// connection runs commands in non-query, scalar or reader mode; a reader
/// is a forward-only cursor addressed by column index.
///
/// Native strings are raw byte sequences. Converting them into canonical
/// text is the bridge's job (see `core::db::codec`), not the driver's.
pub mod sqlite;

pub use sqlite::{SqliteClient, SqliteConnection};

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a native driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct NativeError {
    /// Vendor error code, when the driver has one
    pub code: Option<i32>,
    /// Driver message, passed on verbatim
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        NativeError {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        NativeError {
            code: Some(code),
            message: message.into(),
        }
    }
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// A value as the native driver hands it out.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    /// The driver's null sentinel
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    /// A string in the driver's own encoding
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

/// How a command's text is interpreted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandType {
    #[default]
    Text,
}

/// The native form of a command: already-encoded SQL plus execution settings.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeCommand {
    pub text: Vec<u8>,
    pub command_type: CommandType,
    pub timeout: Option<Duration>,
}

impl NativeCommand {
    /// The command text as UTF-8, for drivers whose engine takes `&str`.
    pub fn sql(&self) -> NativeResult<&str> {
        std::str::from_utf8(&self.text)
            .map_err(|e| NativeError::new(format!("command text is not valid UTF-8: {}", e)))
    }
}

/// Entry point of a native client library.
pub trait Driver: Send + Sync {
    type Connection: NativeConnection + Send;

    /// Short driver name used in logs
    fn name(&self) -> &'static str;

    /// Opens a connection described by `connection_string`.
    fn open(&self, connection_string: &str) -> NativeResult<Self::Connection>;

    /// The fixed introspection query whose single value is the server
    /// version as `major.minor.patch[...]`.
    fn version_query(&self) -> &'static str;
}

/// One open native connection.
///
/// A connection allows one active reader at a time. `execute_reader` hands
/// the open reader to `consumer` and returns once the consumer is done; a
/// consumer that does not close the reader leaves it open on the connection.
pub trait NativeConnection {
    /// Releases the connection. Calling it on a closed connection is a no-op.
    fn close(&mut self) -> NativeResult<()>;

    fn is_closed(&self) -> bool;

    fn execute_non_query(&mut self, command: &NativeCommand) -> NativeResult<u64>;

    /// First column of the first row, or [`NativeValue::Null`] when there are no rows.
    fn execute_scalar(&mut self, command: &NativeCommand) -> NativeResult<NativeValue>;

    fn execute_reader(
        &mut self,
        command: &NativeCommand,
        consumer: &mut dyn FnMut(&mut dyn NativeReader),
    ) -> NativeResult<()>;
}

/// Forward-only native result cursor.
pub trait NativeReader {
    /// Advances to the next row; `false` once the rows are exhausted.
    fn read(&mut self) -> NativeResult<bool>;

    fn is_closed(&self) -> bool;

    fn field_count(&self) -> usize;

    fn get_name(&self, index: usize) -> NativeResult<Vec<u8>>;

    /// Value of column `index` in the current row.
    fn get_value(&self, index: usize) -> NativeResult<NativeValue>;

    fn close(&mut self);
}
