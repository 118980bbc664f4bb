// Core infrastructure modules
pub mod core;
pub mod native;

// Facade and configuration
pub mod config;
pub mod database;
pub mod dataset;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::core::db::{RowCursor, TextCodec, Value};
pub use crate::core::{Result, SqlBridgeError};
pub use config::{load_config, ConnectionOptions, DatabaseConfig, IdentifierCase};
pub use database::{Database, ExecuteOptions};
pub use dataset::{Dataset, FieldRow};
pub use native::SqliteClient;
