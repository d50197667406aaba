//! Error types for the MySQL client.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants follow the lifecycle of a call: connecting, acquiring a live pool,
//! preparing and executing statements, decoding rows and applying migrations.

use crate::duration::format_duration;
use std::time::Duration;
use thiserror::Error;

/// MySQL error number for "Table '%s' doesn't exist".
pub const ER_NO_SUCH_TABLE: &str = "1146";

/// SQLSTATE reported alongside `ER_NO_SUCH_TABLE`.
pub const SQLSTATE_NO_SUCH_TABLE: &str = "42S02";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Pool unavailable after {attempts} attempt(s): {message}")]
    PoolUnavailable { attempts: u32, message: String },

    #[error("Prepare failed: {message}")]
    Prepare {
        message: String,
        /// e.g., "42000" for a syntax error
        sql_state: Option<String>,
    },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        sql_state: Option<String>,
        /// MySQL error number, e.g. "1062" for a duplicate key
        code: Option<String>,
        suggestion: String,
    },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("DDL failed in '{script}': {message}")]
    Ddl { script: String, message: String },

    #[error(
        "Schema version '{script}' is in ERROR state. Resolve the failed migration manually before running further migrations."
    )]
    InconsistentMigrationState { script: String, checksum: String },

    #[error(
        "Migration file '{script}' has been changed since it was applied (recorded checksum {recorded}, current {computed})"
    )]
    MigrationFileChanged {
        script: String,
        recorded: String,
        computed: String,
    },

    #[error("Migration lock '{lock}' not acquired within {timeout_secs}s")]
    MigrationLocked { lock: String, timeout_secs: u64 },

    #[error("Cannot read migration source '{path}': {source}")]
    MigrationSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout: {operation} exceeded {}", format_duration(*.limit))]
    Timeout { operation: String, limit: Duration },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a pool unavailable error.
    pub fn pool_unavailable(attempts: u32, message: impl Into<String>) -> Self {
        Self::PoolUnavailable {
            attempts,
            message: message.into(),
        }
    }

    pub fn prepare(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Prepare {
            message: message.into(),
            sql_state,
        }
    }

    /// Create an execution error with optional SQL state and error number.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        code: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
            code,
            suggestion: suggestion.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a DDL error for a migration script.
    pub fn ddl(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Ddl {
            script: script.into(),
            message: message.into(),
        }
    }

    pub fn inconsistent_migration_state(
        script: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self::InconsistentMigrationState {
            script: script.into(),
            checksum: checksum.into(),
        }
    }

    pub fn migration_file_changed(
        script: impl Into<String>,
        recorded: impl Into<String>,
        computed: impl Into<String>,
    ) -> Self {
        Self::MigrationFileChanged {
            script: script.into(),
            recorded: recorded.into(),
            computed: computed.into(),
        }
    }

    pub fn migration_locked(lock: impl Into<String>, timeout_secs: u64) -> Self {
        Self::MigrationLocked {
            lock: lock.into(),
            timeout_secs,
        }
    }

    pub fn migration_source(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::MigrationSource {
            path: path.into(),
            source,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Execution { suggestion, .. } => Some(suggestion),
            Self::PoolUnavailable { .. } => {
                Some("Check that the MySQL server is reachable or raise the retry budget")
            }
            Self::InconsistentMigrationState { .. } => Some(
                "Fix the failed script forward or repair the database, then remove the ERROR row from schema_version",
            ),
            Self::MigrationFileChanged { .. } => {
                Some("Restore the applied script and put the change in a new migration file")
            }
            _ => None,
        }
    }

    /// MySQL error number reported by the server, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Execution { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Prepare { sql_state, .. } | Self::Execution { sql_state, .. } => {
                sql_state.as_deref()
            }
            _ => None,
        }
    }

    /// Re-tag a statement error as a prepare failure.
    pub(crate) fn into_prepare(self) -> Self {
        match self {
            Self::Execution {
                message, sql_state, ..
            } => Self::Prepare { message, sql_state },
            other => other,
        }
    }
}

/// True when the error reports a missing table (ER_NO_SUCH_TABLE / 42S02).
pub fn is_missing_table(err: &DbError) -> bool {
    err.code() == Some(ER_NO_SUCH_TABLE) || err.sql_state() == Some(SQLSTATE_NO_SUCH_TABLE)
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection options and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .and_then(|e| e.code().map(String::from));
                let code = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number().to_string())
                    .or_else(|| db_err.code().map(|c| c.to_string()));
                DbError::execution(
                    db_err.message(),
                    sql_state,
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::execution(
                "No rows returned",
                None,
                None,
                "Verify the query conditions match existing data",
            ),
            // The acquire limit is only known to the pool; `PoolManager` reports it.
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Check that the MySQL server is reachable or raise max_open_conns",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::decode(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::decode(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::decode(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
