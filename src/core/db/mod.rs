/// Database Module
///
/// The layer between the native driver traits and the facade.
///
/// ## Architecture
///
/// - **Text Codec** (`codec.rs`): native string bytes to canonical text and back
/// - **Values** (`value.rs`): classification of native values and the canonical `Value`
/// - **Connection Handle** (`connection.rs`): one open native connection and its commands
/// - **Row Cursor** (`cursor.rs`): forward-only, close-once streaming over a native reader
///
/// ## Error Handling
///
/// Native failures are converted with `core::raise_error`; everything here
/// returns the standardized `SqlBridgeError`.
pub mod codec;
pub mod connection;
pub mod cursor;
pub mod value;

pub use codec::*;
pub use connection::*;
pub use cursor::*;
pub use value::*;
