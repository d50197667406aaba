//! Statement execution.
//!
//! The free functions (`execute`, `fetch_all`, `fetch_maps`) run on any
//! `MySqlConnection`, including the one inside a caller's transaction
//! (`&mut **tx`). `StatementExecutor` wraps them with the configured read and
//! write timeouts, the packet size cap, the multi-statement switch and the
//! prepare step mutations go through.

use crate::config::{ClientConfig, TimeLayout};
use crate::db::params::{bind_all, bind_mysql_param};
use crate::db::types::{BinaryFormat, Location, RowFormat, RowToMap};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, RowMap};
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnection, MySqlQueryResult, MySqlRow};
use sqlx::{Executor, MySql, MySqlPool, Row, Statement, Transaction};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Execute a statement with positional parameters.
///
/// Without parameters the SQL is sent as text, which also allows statements
/// that cannot be prepared (`CREATE PROCEDURE`, multi-statement DDL).
pub async fn execute(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<MySqlQueryResult> {
    let result = if params.is_empty() {
        conn.execute(sql).await?
    } else {
        bind_all(sqlx::query(sql), params).execute(&mut *conn).await?
    };
    Ok(result)
}

/// Fetch every row of a query.
pub async fn fetch_all(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<Vec<MySqlRow>> {
    let rows = if params.is_empty() {
        conn.fetch_all(sql).await?
    } else {
        bind_all(sqlx::query(sql), params).fetch_all(&mut *conn).await?
    };
    Ok(rows)
}

/// Fetch every row of a query as column-name keyed maps.
pub async fn fetch_maps(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
    format: &RowFormat,
) -> DbResult<Vec<RowMap>> {
    let rows = fetch_all(conn, sql, params).await?;
    Ok(rows.iter().map(|row| row.to_row_map(format)).collect())
}

/// Fetch at most one row as a map.
pub async fn fetch_first_map(
    conn: &mut MySqlConnection,
    sql: &str,
    params: &[QueryParam],
    format: &RowFormat,
) -> DbResult<Option<RowMap>> {
    let row = if params.is_empty() {
        conn.fetch_optional(sql).await?
    } else {
        bind_all(sqlx::query(sql), params)
            .fetch_optional(&mut *conn)
            .await?
    };
    Ok(row.map(|r| r.to_row_map(format)))
}

/// Executes statements with the configured driver options.
#[derive(Debug, Clone)]
pub struct StatementExecutor {
    read_timeout: Duration,
    write_timeout: Duration,
    /// 0 disables the size check.
    max_allowed_packet: usize,
    multi_statements: bool,
    loc: Location,
    parse_time: bool,
}

impl StatementExecutor {
    pub fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
            max_allowed_packet: 0,
            multi_statements: false,
            loc: Location::default(),
            parse_time: true,
        }
    }

    pub fn from_config(config: &ClientConfig) -> DbResult<Self> {
        let driver = &config.driver;
        Ok(Self {
            max_allowed_packet: usize::try_from(driver.max_allowed_packet)
                .map_err(|_| DbError::invalid_input("max_allowed_packet cannot be negative"))?,
            multi_statements: driver.multi_statements,
            loc: config.location()?,
            parse_time: driver.parse_time,
            ..Self::new(driver.read_timeout, driver.write_timeout)
        })
    }

    /// Row rendering for this connection's `loc` and `parseTime` settings.
    pub fn row_format(&self, layout: TimeLayout, binary: BinaryFormat) -> RowFormat {
        RowFormat {
            layout,
            loc: self.loc,
            parse_time: self.parse_time,
            binary,
        }
    }

    /// Reject statements the server would refuse as larger than `max_allowed_packet`.
    fn check_packet(&self, sql: &str, params: &[QueryParam]) -> DbResult<()> {
        if self.max_allowed_packet == 0 {
            return Ok(());
        }
        let size = sql.len() + params.iter().map(payload_len).sum::<usize>();
        if size > self.max_allowed_packet {
            return Err(DbError::invalid_input(format!(
                "packet for query is too large ({size} > {} bytes); raise max_allowed_packet",
                self.max_allowed_packet
            )));
        }
        Ok(())
    }

    /// Prepare `sql` on the connection, then execute it with `params`.
    ///
    /// Prepare failures surface as `DbError::Prepare`, execution failures as
    /// `DbError::Execution`.
    pub async fn prepare_execute(
        &self,
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<MySqlQueryResult> {
        self.check_packet(sql, params)?;
        let start = Instant::now();
        debug!(
            sql = %sql,
            param_types = ?params.iter().map(QueryParam::type_name).collect::<Vec<_>>(),
            "Preparing statement"
        );

        let statement = with_timeout(self.write_timeout, "prepare", (&mut *conn).prepare(sql))
            .await
            .map_err(DbError::into_prepare)?;

        let mut query = statement.query();
        for param in params {
            query = bind_mysql_param(query, param);
        }
        let result =
            with_timeout(self.write_timeout, "write operation", query.execute(&mut *conn)).await?;

        debug!(
            rows_affected = result.rows_affected(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Statement executed"
        );
        Ok(result)
    }

    /// Run raw SQL under the write timeout.
    ///
    /// With `multi_statements` the text is sent as-is and may hold several
    /// statements. Otherwise it goes through an unnamed prepared statement,
    /// which the server rejects when it holds more than one.
    pub async fn execute_raw(&self, conn: &mut MySqlConnection, sql: &str) -> DbResult<u64> {
        self.check_packet(sql, &[])?;
        let start = Instant::now();
        let run = async {
            if self.multi_statements {
                execute(&mut *conn, sql, &[]).await
            } else {
                Ok(sqlx::query(sql).persistent(false).execute(&mut *conn).await?)
            }
        };
        let result = match timeout(self.write_timeout, run).await {
            Ok(r) => r?,
            Err(_) => return Err(timeout_error("DDL execution", self.write_timeout)),
        };
        debug!(
            sql = %sql,
            multi_statements = self.multi_statements,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executed raw SQL"
        );
        Ok(result.rows_affected())
    }

    pub async fn fetch_maps(
        &self,
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        format: &RowFormat,
    ) -> DbResult<Vec<RowMap>> {
        self.check_packet(sql, params)?;
        debug!(sql = %sql, params = params.len(), "Executing query");
        match timeout(self.read_timeout, fetch_maps(conn, sql, params, format)).await {
            Ok(r) => r,
            Err(_) => Err(timeout_error("query execution", self.read_timeout)),
        }
    }

    pub async fn fetch_first_map(
        &self,
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
        format: &RowFormat,
    ) -> DbResult<Option<RowMap>> {
        self.check_packet(sql, params)?;
        debug!(sql = %sql, params = params.len(), "Executing query for first row");
        match timeout(self.read_timeout, fetch_first_map(conn, sql, params, format)).await {
            Ok(r) => r,
            Err(_) => Err(timeout_error("query execution", self.read_timeout)),
        }
    }

    /// Read the first column of the first row as an integer.
    pub async fn fetch_count(
        &self,
        conn: &mut MySqlConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<i64> {
        self.check_packet(sql, params)?;
        debug!(sql = %sql, params = params.len(), "Executing count");
        let rows = match timeout(self.read_timeout, fetch_all(conn, sql, params)).await {
            Ok(r) => r?,
            Err(_) => return Err(timeout_error("count", self.read_timeout)),
        };
        let row = rows.first().ok_or(sqlx::Error::RowNotFound)?;
        first_column_i64(row)
    }

    /// Fetch rows decoded with `sqlx::FromRow`.
    pub async fn fetch_as<T>(
        &self,
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<T>>
    where
        T: for<'r> sqlx::FromRow<'r, MySqlRow> + Send + Unpin,
    {
        self.check_packet(sql, params)?;
        debug!(sql = %sql, params = params.len(), "Executing typed query");
        let mut query = sqlx::query_as::<_, T>(sql);
        for param in params {
            query = bind_query_as(query, param);
        }
        match timeout(self.read_timeout, query.fetch_all(pool)).await {
            Ok(r) => Ok(r?),
            Err(_) => Err(timeout_error("query execution", self.read_timeout)),
        }
    }

    /// Stream rows to `on_row` without buffering the result set.
    pub async fn for_each_row<F>(
        &self,
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
        mut on_row: F,
    ) -> DbResult<u64>
    where
        F: FnMut(&MySqlRow) -> DbResult<()>,
    {
        self.check_packet(sql, params)?;
        debug!(sql = %sql, params = params.len(), "Streaming query");
        let stream_rows = async {
            let mut seen = 0u64;
            let mut rows = bind_all(sqlx::query(sql), params).fetch(pool);
            while let Some(row) = rows.try_next().await? {
                on_row(&row)?;
                seen += 1;
            }
            Ok::<_, DbError>(seen)
        };
        match timeout(self.read_timeout, stream_rows).await {
            Ok(r) => r,
            Err(_) => Err(timeout_error("query execution", self.read_timeout)),
        }
    }
}

/// Commit a read transaction whatever the read produced.
///
/// The read error wins over a commit error.
pub(crate) async fn finish_read<T>(
    tx: Transaction<'static, MySql>,
    result: DbResult<T>,
) -> DbResult<T> {
    let commit = tx.commit().await;
    let value = result?;
    if let Err(e) = commit {
        warn!(error = %e, "Failed to commit read transaction");
        return Err(e.into());
    }
    Ok(value)
}

fn bind_query_as<'q, T>(
    query: sqlx::query::QueryAs<'q, MySql, T, sqlx::mysql::MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::QueryAs<'q, MySql, T, sqlx::mysql::MySqlArguments> {
    use sqlx::types::Json;

    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::UInt(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Date(v) => query.bind(*v),
        QueryParam::DateTime(v) => query.bind(*v),
        QueryParam::Timestamp(v) => query.bind(*v),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Approximate bytes a bound parameter adds to the statement packet.
fn payload_len(param: &QueryParam) -> usize {
    match param {
        QueryParam::Null => 0,
        QueryParam::String(v) => v.len(),
        QueryParam::Bytes(v) => v.len(),
        QueryParam::Json(v) => v.to_string().len(),
        _ => 8,
    }
}

fn first_column_i64(row: &MySqlRow) -> DbResult<i64> {
    if let Ok(v) = row.try_get::<i64, _>(0) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(0) {
        return i64::try_from(v).map_err(|_| DbError::decode(format!("count {v} overflows i64")));
    }
    // SUM() and friends come back as DECIMAL
    let text = row
        .try_get::<crate::db::types::RawDecimal, _>(0)
        .map_err(DbError::from)?
        .0;
    text.parse::<f64>()
        .map(|f| f.trunc() as i64)
        .map_err(|_| DbError::decode(format!("'{text}' is not a count")))
}

async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(limit, fut).await {
        Ok(r) => r.map_err(DbError::from),
        Err(_) => Err(timeout_error(operation, limit)),
    }
}

fn timeout_error(operation: &str, limit: Duration) -> DbError {
    DbError::timeout(operation, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_from_config() {
        let config = ClientConfig::builder()
            .read_timeout(Duration::from_secs(5))
            .write_timeout(Duration::from_secs(7))
            .multi_statements(true)
            .parse_time(false)
            .build()
            .unwrap();
        let executor = StatementExecutor::from_config(&config).unwrap();
        assert_eq!(executor.read_timeout, Duration::from_secs(5));
        assert_eq!(executor.write_timeout, Duration::from_secs(7));
        assert!(executor.multi_statements);
        assert_eq!(executor.max_allowed_packet, 4 * 1024 * 1024);

        let format = executor.row_format(TimeLayout::Rfc3339, BinaryFormat::ByteArray);
        assert_eq!(format.loc.to_string(), "Asia/Singapore");
        assert!(!format.parse_time);
    }

    #[test]
    fn test_oversized_statement_rejected() {
        let config = ClientConfig::builder()
            .max_allowed_packet(32)
            .build()
            .unwrap();
        let executor = StatementExecutor::from_config(&config).unwrap();

        executor.check_packet("SELECT 1", &[]).unwrap();
        let blob = QueryParam::Bytes(vec![0; 64]);
        let err = executor
            .check_packet("INSERT INTO t (b) VALUES (?)", &[blob])
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(err.to_string().contains("too large"));

        let unlimited = StatementExecutor::new(Duration::from_secs(1), Duration::from_secs(1));
        unlimited.check_packet(&"x".repeat(1 << 20), &[]).unwrap();
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, sqlx::Error>(())
        };
        let err = with_timeout(Duration::from_millis(10), "ping", slow)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout { .. }));
        assert!(err.to_string().contains("ping"));
    }

    #[tokio::test]
    async fn test_with_timeout_maps_driver_error() {
        let failing = async { Err::<(), _>(sqlx::Error::PoolClosed) };
        let err = with_timeout(Duration::from_secs(1), "write operation", failing)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }
}
