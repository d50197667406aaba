//! Data models for the MySQL client.
//!
//! This module re-exports all model types used throughout the crate.

pub mod migration;
pub mod query;

pub use migration::{MigrationReport, MigrationStatus, SchemaVersion};
pub use query::{QueryParam, RowMap};
