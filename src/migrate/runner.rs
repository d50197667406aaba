//! Checksum-tracked application of migration scripts.
//!
//! A run walks `NotStarted -> TableEnsured -> VersionsLoaded -> Validated ->
//! Applying -> Done`, or ends in `Failed` from any step. The whole run holds
//! a MySQL named lock on one connection so concurrent processes apply each
//! script once. A run dropped midway closes that connection instead of
//! returning it to the pool, which frees the lock on the server.

use crate::config::ClientConfig;
use crate::db::executor::StatementExecutor;
use crate::duration::format_short_duration;
use crate::error::{DbError, DbResult};
use crate::migrate::checksum::checksum;
use crate::migrate::store::{self, MAX_SCRIPT_NAME_LEN, SCHEMA_VERSION_TABLE};
use crate::models::{MigrationReport, MigrationStatus, SchemaVersion};
use sqlx::mysql::MySqlConnection;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// MySQL rejects lock names longer than this.
const MAX_LOCK_NAME_LEN: usize = 64;

/// Progress of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotStarted,
    TableEnsured,
    VersionsLoaded,
    Validated,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::TableEnsured => "table_ensured",
            Self::VersionsLoaded => "versions_loaded",
            Self::Validated => "validated",
            Self::Applying => "applying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A migration script on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File name, the identity key in `schema_version`.
    pub script: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct MigrationRunner {
    ddl_path: PathBuf,
    lock_name: String,
    lock_timeout: Duration,
    executor: StatementExecutor,
    state: MigrationState,
}

impl MigrationRunner {
    pub fn new(
        ddl_path: impl Into<PathBuf>,
        schema: &str,
        lock_timeout: Duration,
        executor: StatementExecutor,
    ) -> Self {
        Self {
            ddl_path: ddl_path.into(),
            lock_name: lock_name(schema),
            lock_timeout,
            executor,
            state: MigrationState::NotStarted,
        }
    }

    pub fn from_config(config: &ClientConfig) -> DbResult<Self> {
        let ddl_path = config
            .ddl_path
            .clone()
            .ok_or_else(|| DbError::invalid_input("No ddl_path configured for migrations"))?;
        if !config.driver.multi_statements {
            debug!("multi_statements is off, each script must hold a single statement");
        }
        Ok(Self::new(
            ddl_path,
            &config.schema,
            config.migration_lock_timeout,
            StatementExecutor::from_config(config)?,
        ))
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Apply every script not yet recorded, holding the lock on `conn`.
    pub async fn run(&mut self, conn: PoolConnection<MySql>) -> DbResult<MigrationReport> {
        self.state = MigrationState::NotStarted;
        info!(ddl_path = %self.ddl_path.display(), "Starting migration run");

        let result: DbResult<MigrationReport> = async {
            let mut session = LockSession::new(conn, &self.lock_name);
            if let Err(e) = self.acquire_lock(session.conn()?).await {
                session.unlocked();
                return Err(e);
            }
            let outcome = self.run_locked(session.conn()?).await;
            session.release().await;
            outcome
        }
        .await;

        match &result {
            Ok(report) => {
                self.state = MigrationState::Done;
                info!(
                    applied = report.applied.len(),
                    verified = report.verified.len(),
                    "Migration run finished"
                );
            }
            Err(e) => {
                error!(state = %self.state, error = %e, "Migration run failed");
                self.state = MigrationState::Failed;
            }
        }
        result
    }

    async fn run_locked(&mut self, conn: &mut MySqlConnection) -> DbResult<MigrationReport> {
        store::ensure_table(conn).await?;
        self.state = MigrationState::TableEnsured;

        let versions = store::list(conn).await?;
        self.state = MigrationState::VersionsLoaded;
        debug!(recorded = versions.len(), "Loaded schema versions");

        if let Some(failed) = store::first_error(&versions) {
            return Err(DbError::inconsistent_migration_state(
                &failed.script,
                &failed.checksum,
            ));
        }
        self.state = MigrationState::Validated;

        let files = list_migration_files(&self.ddl_path).await?;
        self.state = MigrationState::Applying;

        let mut report = MigrationReport::default();
        for file in files {
            if self.apply_file(conn, &file, &versions).await? {
                report.applied.push(file.script);
            } else {
                report.verified.push(file.script);
            }
        }
        Ok(report)
    }

    /// Returns true when the script was executed, false when it was already applied.
    async fn apply_file(
        &self,
        conn: &mut MySqlConnection,
        file: &MigrationFile,
        versions: &[SchemaVersion],
    ) -> DbResult<bool> {
        let content = tokio::fs::read(&file.path)
            .await
            .map_err(|e| DbError::migration_source(file.path.display().to_string(), e))?;
        let sum = checksum(&content);

        if let Some(recorded) = store::find_by_script(versions, &file.script) {
            if recorded.checksum != sum {
                return Err(DbError::migration_file_changed(
                    &file.script,
                    &recorded.checksum,
                    sum,
                ));
            }
            debug!(script = %file.script, "Migration already applied");
            return Ok(false);
        }

        let sql = String::from_utf8(content).map_err(|e| {
            DbError::migration_source(
                file.path.display().to_string(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        let start = Instant::now();
        let outcome = if sql.trim().is_empty() {
            Ok(0)
        } else {
            self.executor.execute_raw(conn, &sql).await
        };
        let execution_time = format_short_duration(start.elapsed());

        match outcome {
            Ok(_) => {
                store::record(
                    conn,
                    &file.script,
                    &sum,
                    &execution_time,
                    MigrationStatus::Success,
                )
                .await?;
                info!(
                    script = %file.script,
                    checksum = %sum,
                    execution_time = %execution_time,
                    "Applied migration"
                );
                Ok(true)
            }
            Err(e) => {
                if let Err(record_err) = store::record(
                    conn,
                    &file.script,
                    &sum,
                    &execution_time,
                    MigrationStatus::Error,
                )
                .await
                {
                    warn!(
                        script = %file.script,
                        error = %record_err,
                        "Failed to record migration failure"
                    );
                }
                Err(DbError::ddl(&file.script, e.to_string()))
            }
        }
    }

    async fn acquire_lock(&self, conn: &mut MySqlConnection) -> DbResult<()> {
        let timeout_secs = self.lock_timeout.as_secs();
        let acquired: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, ?)")
            .bind(&self.lock_name)
            .bind(timeout_secs as i64)
            .fetch_one(&mut *conn)
            .await?;
        match acquired {
            Some(1) => {
                debug!(lock = %self.lock_name, "Acquired migration lock");
                Ok(())
            }
            _ => Err(DbError::migration_locked(&self.lock_name, timeout_secs)),
        }
    }
}

/// A pooled connection that may hold the migration lock.
///
/// Dropped before `release()` the session is detached from the pool and
/// closed, so a cancelled run cannot hand a locked session to another caller.
struct LockSession {
    conn: Option<PoolConnection<MySql>>,
    lock: String,
}

impl LockSession {
    fn new(conn: PoolConnection<MySql>, lock: &str) -> Self {
        Self {
            conn: Some(conn),
            lock: lock.to_string(),
        }
    }

    fn conn(&mut self) -> DbResult<&mut MySqlConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DbError::internal("migration lock session already released"))
    }

    /// The lock was never taken; the connection goes back to the pool.
    fn unlocked(mut self) {
        self.conn.take();
    }

    async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            release_lock(conn, &self.lock).await;
        }
    }
}

impl Drop for LockSession {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        warn!(lock = %self.lock, "Migration run interrupted, closing lock session");
        let conn = conn.detach();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        debug!(error = %e, "Closing lock session failed");
                    }
                });
            }
            // Dropping the socket ends the session as well
            Err(_) => drop(conn),
        }
    }
}

/// Release the named lock, or drop the session that holds it.
async fn release_lock(mut conn: PoolConnection<MySql>, lock: &str) {
    let released = sqlx::query_scalar::<_, Option<i64>>("SELECT RELEASE_LOCK(?)")
        .bind(lock)
        .fetch_one(&mut *conn)
        .await;
    match released {
        Ok(Some(1)) => debug!(lock = %lock, "Released migration lock"),
        Ok(other) => warn!(lock = %lock, result = ?other, "Migration lock was not held"),
        Err(e) => {
            warn!(lock = %lock, error = %e, "Failed to release migration lock, closing session");
            if let Err(e) = conn.detach().close().await {
                debug!(error = %e, "Closing lock session failed");
            }
        }
    }
}

/// Named lock guarding `schema_version` of one schema.
fn lock_name(schema: &str) -> String {
    let name = format!("{schema}.{SCHEMA_VERSION_TABLE}");
    if name.len() <= MAX_LOCK_NAME_LEN {
        return name;
    }
    format!("{SCHEMA_VERSION_TABLE}.{}", checksum(schema.as_bytes()))
}

/// Regular files of `dir`, sorted by file name.
pub async fn list_migration_files(dir: &Path) -> DbResult<Vec<MigrationFile>> {
    let source_error = |e| DbError::migration_source(dir.display().to_string(), e);

    let mut entries = tokio::fs::read_dir(dir).await.map_err(source_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(source_error)? {
        let path = entry.path();
        let metadata = tokio::fs::metadata(&path).await.map_err(source_error)?;
        if !metadata.is_file() {
            continue;
        }
        let script = entry.file_name().to_string_lossy().into_owned();
        if script.len() > MAX_SCRIPT_NAME_LEN {
            return Err(DbError::invalid_input(format!(
                "Migration file name '{script}' exceeds {MAX_SCRIPT_NAME_LEN} characters"
            )));
        }
        files.push(MigrationFile { script, path });
    }
    files.sort_by(|a, b| a.script.cmp(&b.script));
    Ok(files)
}
