//! The `schema_version` table.

use crate::db::executor;
use crate::db::schema::has_table;
use crate::error::{DbError, DbResult};
use crate::models::{MigrationStatus, QueryParam, SchemaVersion};
use sqlx::FromRow;
use sqlx::mysql::MySqlConnection;
use tracing::info;

pub const SCHEMA_VERSION_TABLE: &str = "schema_version";

/// Longest script name the `script` column holds.
pub const MAX_SCRIPT_NAME_LEN: usize = 100;

pub const SCHEMA_VERSION_DDL: &str = "
CREATE TABLE IF NOT EXISTS schema_version
(
  id             bigint(48)   NOT NULL AUTO_INCREMENT PRIMARY KEY,
  script         varchar(100) NOT NULL,
  checksum       TEXT         NOT NULL,
  execution_time varchar(50)  NOT NULL,
  status         varchar(10)  NOT NULL,
  created_time   timestamp(3) NOT NULL DEFAULT current_timestamp(3)
) ENGINE = InnoDB DEFAULT CHARSET = utf8mb4
";

const SELECT_VERSIONS_SQL: &str = "SELECT id, script, checksum, execution_time, status, created_time \
     FROM schema_version ORDER BY id";

const INSERT_VERSION_SQL: &str =
    "INSERT INTO schema_version (script, checksum, execution_time, status) VALUES (?, ?, ?, ?)";

/// Create `schema_version` unless it exists. Returns true when it was created.
pub async fn ensure_table(conn: &mut MySqlConnection) -> DbResult<bool> {
    if has_table(&mut *conn, SCHEMA_VERSION_TABLE).await? {
        return Ok(false);
    }
    executor::execute(conn, SCHEMA_VERSION_DDL, &[])
        .await
        .map_err(|e| DbError::ddl(SCHEMA_VERSION_TABLE, e.to_string()))?;
    info!(table = SCHEMA_VERSION_TABLE, "Created schema version table");
    Ok(true)
}

/// Every recorded version, oldest first.
pub async fn list(conn: &mut MySqlConnection) -> DbResult<Vec<SchemaVersion>> {
    let rows = executor::fetch_all(conn, SELECT_VERSIONS_SQL, &[]).await?;
    rows.iter()
        .map(|row| SchemaVersion::from_row(row).map_err(DbError::from))
        .collect()
}

/// Append one outcome row and return its id.
pub async fn record(
    conn: &mut MySqlConnection,
    script: &str,
    checksum: &str,
    execution_time: &str,
    status: MigrationStatus,
) -> DbResult<u64> {
    let params = [
        QueryParam::from(script),
        QueryParam::from(checksum),
        QueryParam::from(execution_time),
        QueryParam::from(status.as_str()),
    ];
    let result = executor::execute(conn, INSERT_VERSION_SQL, &params).await?;
    Ok(result.last_insert_id())
}

/// The first row left in ERROR state, if any.
pub fn first_error(versions: &[SchemaVersion]) -> Option<&SchemaVersion> {
    versions.iter().find(|v| v.is_error())
}

/// The row recorded for `script`, if any.
pub fn find_by_script<'a>(versions: &'a [SchemaVersion], script: &str) -> Option<&'a SchemaVersion> {
    versions.iter().find(|v| v.script == script)
}
