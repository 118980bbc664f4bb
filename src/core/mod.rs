/// Core Module for SQLBridge
///
/// Result marshaling and connection lifecycle: the text codec, value
/// classification, connection handles, commands and row cursors, plus the
/// shared error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{raise_error, ErrorStage, Result, SqlBridgeError};
