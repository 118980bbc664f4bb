/// SQLBridge Error Module
///
/// This module defines the error types surfaced to callers of the bridge.
/// Native driver failures never escape as-is: they pass through
/// [`raise_error`] exactly once and come out as a uniform database error
/// that still carries the driver's message.
use crate::native::NativeError;
use thiserror::Error;

/// Error type for every fallible bridge operation.
///
/// The first three variants are the database errors proper:
/// - `Connection` when the native open or authentication fails
/// - `Command` when the native driver rejects or aborts a statement
/// - `Decoding` when a native string cannot be converted to canonical text
#[derive(Error, Debug)]
pub enum SqlBridgeError {
    /// Native open/auth failure, including malformed connection strings
    #[error("Connection error: {0}")]
    Connection(String),

    /// Native execution failure (bad SQL, constraint violation, timeout)
    #[error("Command error: {0}")]
    Command(String),

    /// Malformed byte sequence in a native string value or column name
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The current thread already holds the connection for this server
    #[error("Connection busy: server '{0}' is already executing on this thread")]
    Busy(String),

    /// The version probe returned something other than `major.minor.patch`
    #[error("Unexpected server version string: {0:?}")]
    ServerVersion(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic application errors for unexpected conditions
    #[error("Application error: {0}")]
    App(String),
}

impl SqlBridgeError {
    /// True for the errors that originate in the database itself.
    pub fn is_database_error(&self) -> bool {
        matches!(
            self,
            SqlBridgeError::Connection(_) | SqlBridgeError::Command(_) | SqlBridgeError::Decoding(_)
        )
    }
}

/// Type alias for Result to use SqlBridgeError as the error type.
pub type Result<T> = std::result::Result<T, SqlBridgeError>;

/// Where a native failure was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// Opening the native connection
    Connect,
    /// Creating or running a command, or reading its results
    Command,
}

/// Translates a native driver failure into the uniform error type.
///
/// Every native error crossing into bridge code goes through here.
pub fn raise_error(stage: ErrorStage, err: NativeError) -> SqlBridgeError {
    let message = match err.code {
        Some(code) => format!("{} (code {})", err.message, code),
        None => err.message,
    };
    match stage {
        ErrorStage::Connect => SqlBridgeError::Connection(message),
        ErrorStage::Command => SqlBridgeError::Command(message),
    }
}
