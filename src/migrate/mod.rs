//! Lightweight schema migrations.
//!
//! Every regular file of the migration directory is one script, identified
//! by its file name and applied at most once. Outcomes are appended to the
//! `schema_version` table; an ERROR row blocks later runs until repaired.

pub mod checksum;
pub mod runner;
pub mod store;

pub use checksum::checksum;
pub use runner::{MigrationFile, MigrationRunner, MigrationState, list_migration_files};
pub use store::{SCHEMA_VERSION_DDL, SCHEMA_VERSION_TABLE};
