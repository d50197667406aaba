//! Database access layer.
//!
//! This module provides database access functionality:
//! - Connection string assembly
//! - Connection pool management with liveness retry
//! - Statement execution
//! - Row mapping and decoding
//! - Schema introspection

pub mod decode;
pub mod dsn;
pub mod executor;
#[macro_use]
pub mod macros;
pub(crate) mod params;
pub mod pool;
pub mod retry;
pub mod schema;
pub mod types;

pub use decode::{DecodeOptions, decode_row, decode_rows};
pub use executor::StatementExecutor;
pub use pool::PoolManager;
pub use schema::has_table;
pub use types::{BinaryFormat, Location, RowFormat, RowToMap};
