//! MySQL client library.
//!
//! A thin layer over `sqlx` for MySQL: a pool that is pinged and rebuilt on
//! liveness failure, parameterized statements with rows mapped to generic
//! maps or caller types, and checksum-tracked schema migrations.

pub mod client;
pub mod config;
pub mod db;
pub mod duration;
pub mod error;
pub mod migrate;
pub mod models;

pub use client::MysqlClient;
pub use config::{ClientConfig, ClientConfigBuilder, TimeLayout};
pub use db::DecodeOptions;
pub use error::{DbError, DbResult};
pub use models::{MigrationReport, QueryParam, RowMap, SchemaVersion};
