//! The client facade.
//!
//! `MysqlClient` is cheap to clone; clones share one pool. Every operation
//! goes through `live_pool()`, so a dead pool is rebuilt transparently within
//! the configured retry budget. After `close()` every operation fails.

use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::db::decode::{DecodeOptions, decode_row, decode_rows};
use crate::db::executor::{StatementExecutor, finish_read};
use crate::db::pool::PoolManager;
use crate::db::schema;
use crate::db::types::{BinaryFormat, RowFormat};
use crate::error::{DbError, DbResult};
use crate::migrate::{MigrationRunner, store};
use crate::models::{MigrationReport, QueryParam, RowMap, SchemaVersion};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, Transaction};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ClientInner {
    config: Arc<ClientConfig>,
    pools: PoolManager,
    executor: StatementExecutor,
}

#[derive(Debug, Clone)]
pub struct MysqlClient {
    inner: Arc<ClientInner>,
}

impl MysqlClient {
    /// Open the pool, verify the server answers, and run migrations when
    /// `flyway` is enabled.
    pub async fn connect(config: ClientConfig) -> DbResult<Self> {
        let executor = StatementExecutor::from_config(&config)?;
        let config = Arc::new(config);
        let client = Self {
            inner: Arc::new(ClientInner {
                pools: PoolManager::open(Arc::clone(&config)),
                executor,
                config,
            }),
        };

        if let Err(e) = client.inner.pools.ping().await {
            client.close().await;
            return Err(match e {
                DbError::Connection { .. } => e,
                other => DbError::connection(
                    other.to_string(),
                    "Check that the MySQL server is reachable",
                ),
            });
        }
        info!(
            host = %client.inner.config.host,
            port = client.inner.config.port,
            schema = %client.inner.config.schema,
            "Connected"
        );

        if client.inner.config.flyway {
            if let Err(e) = client.migrate().await {
                client.close().await;
                return Err(e);
            }
        }
        Ok(client)
    }

    /// Parse a `mysql://` URL and connect.
    pub async fn connect_url(url: &str) -> DbResult<Self> {
        let config = ClientConfigBuilder::from_url(url)
            .map_err(DbError::invalid_input)?
            .build()?;
        Self::connect(config).await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Options used by `find_list`/`find_first`.
    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions::default().with_time_layout(self.inner.config.time_layout)
    }

    pub async fn ping(&self) -> DbResult<()> {
        self.inner.pools.ping().await
    }

    /// A pool that answered a ping; rebuilt and retried when it does not.
    pub async fn live_pool(&self) -> DbResult<MySqlPool> {
        self.inner.pools.live_pool().await
    }

    /// Begin a transaction on a live pool.
    pub async fn begin(&self) -> DbResult<Transaction<'static, MySql>> {
        self.inner.pools.begin().await
    }

    /// Execute raw DDL. Returns rows affected.
    ///
    /// Several `;`-separated statements need `multi_statements` enabled.
    pub async fn exec_ddl(&self, ddl: &str) -> DbResult<u64> {
        let mut conn = self.inner.pools.acquire().await?;
        let start = Instant::now();
        let rows_affected = self.inner.executor.execute_raw(&mut conn, ddl).await?;
        info!(
            rows_affected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executed DDL"
        );
        Ok(rows_affected)
    }

    /// Insert and return the generated id.
    pub async fn insert(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let result = self.prepare_execute(sql, params).await?;
        Ok(result.last_insert_id())
    }

    /// Update and return the number of affected rows.
    pub async fn update(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let result = self.prepare_execute(sql, params).await?;
        Ok(result.rows_affected())
    }

    /// Delete and return the number of affected rows.
    pub async fn delete(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let result = self.prepare_execute(sql, params).await?;
        Ok(result.rows_affected())
    }

    async fn prepare_execute(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<sqlx::mysql::MySqlQueryResult> {
        let mut conn = self.inner.pools.acquire().await?;
        self.inner
            .executor
            .prepare_execute(&mut conn, sql, params)
            .await
    }

    /// First column of the first row as an integer, e.g. `SELECT COUNT(*) ...`.
    pub async fn count(&self, sql: &str, params: &[QueryParam]) -> DbResult<i64> {
        let mut tx = self.begin().await?;
        let result = self.inner.executor.fetch_count(&mut tx, sql, params).await;
        finish_read(tx, result).await
    }

    /// Stream rows to `on_row`. Returns the number of rows seen.
    pub async fn find_custom<F>(&self, sql: &str, params: &[QueryParam], on_row: F) -> DbResult<u64>
    where
        F: FnMut(&MySqlRow) -> DbResult<()>,
    {
        let pool = self.live_pool().await?;
        self.inner
            .executor
            .for_each_row(&pool, sql, params, on_row)
            .await
    }

    /// Rows decoded through `sqlx::FromRow`.
    pub async fn find_as<T>(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<T>>
    where
        T: for<'r> sqlx::FromRow<'r, MySqlRow> + Send + Unpin,
    {
        let pool = self.live_pool().await?;
        self.inner.executor.fetch_as(&pool, sql, params).await
    }

    pub async fn find_map_list(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<RowMap>> {
        self.find_map_list_with(sql, params, &self.decode_options())
            .await
    }

    /// Like `find_map_list`, rendering timestamps with `options.time_layout`.
    ///
    /// Binary columns come back as base64 text.
    pub async fn find_map_list_with(
        &self,
        sql: &str,
        params: &[QueryParam],
        options: &DecodeOptions,
    ) -> DbResult<Vec<RowMap>> {
        self.fetch_maps(sql, params, self.row_format(options, BinaryFormat::Base64))
            .await
    }

    pub async fn find_map_first(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<RowMap>> {
        self.find_map_first_with(sql, params, &self.decode_options())
            .await
    }

    pub async fn find_map_first_with(
        &self,
        sql: &str,
        params: &[QueryParam],
        options: &DecodeOptions,
    ) -> DbResult<Option<RowMap>> {
        self.fetch_first_map(sql, params, self.row_format(options, BinaryFormat::Base64))
            .await
    }

    fn row_format(&self, options: &DecodeOptions, binary: BinaryFormat) -> RowFormat {
        self.inner.executor.row_format(options.time_layout, binary)
    }

    async fn fetch_maps(
        &self,
        sql: &str,
        params: &[QueryParam],
        format: RowFormat,
    ) -> DbResult<Vec<RowMap>> {
        let mut tx = self.begin().await?;
        let result = self
            .inner
            .executor
            .fetch_maps(&mut tx, sql, params, &format)
            .await;
        finish_read(tx, result).await
    }

    async fn fetch_first_map(
        &self,
        sql: &str,
        params: &[QueryParam],
        format: RowFormat,
    ) -> DbResult<Option<RowMap>> {
        let mut tx = self.begin().await?;
        let result = self
            .inner
            .executor
            .fetch_first_map(&mut tx, sql, params, &format)
            .await;
        finish_read(tx, result).await
    }

    /// Every row decoded into `T`.
    pub async fn find_list<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<T>> {
        self.find_list_with(sql, params, &self.decode_options())
            .await
    }

    pub async fn find_list_with<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[QueryParam],
        options: &DecodeOptions,
    ) -> DbResult<Vec<T>> {
        let rows = self
            .fetch_maps(sql, params, self.row_format(options, BinaryFormat::ByteArray))
            .await?;
        decode_rows(rows, options)
    }

    /// The first row decoded into `T`, `None` when the query matched nothing.
    pub async fn find_first<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<T>> {
        self.find_first_with(sql, params, &self.decode_options())
            .await
    }

    pub async fn find_first_with<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[QueryParam],
        options: &DecodeOptions,
    ) -> DbResult<Option<T>> {
        self.fetch_first_map(sql, params, self.row_format(options, BinaryFormat::ByteArray))
            .await?
            .map(|row| decode_row(row, options))
            .transpose()
    }

    /// Run `callback` in a transaction.
    ///
    /// Commits when the callback succeeds. On failure the transaction is
    /// rolled back once and the callback's error is returned; a failing
    /// rollback is only logged.
    ///
    /// ```ignore
    /// client
    ///     .transaction(|tx| {
    ///         Box::pin(async move {
    ///             executor::execute(&mut **tx, "INSERT INTO t (v) VALUES (?)", &params![1]).await?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, callback: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'static, MySql>) -> BoxFuture<'c, DbResult<T>>,
    {
        let mut tx = self.begin().await?;
        match callback(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                debug!("Transaction committed");
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                } else {
                    debug!(error = %e, "Transaction rolled back");
                }
                Err(e)
            }
        }
    }

    /// Whether `table` exists in the configured schema.
    pub async fn has_table(&self, table: &str) -> DbResult<bool> {
        let pool = self.live_pool().await?;
        schema::has_table(&pool, table).await
    }

    /// Recorded migrations, oldest first. Empty when nothing was ever migrated.
    pub async fn schema_versions(&self) -> DbResult<Vec<SchemaVersion>> {
        let mut conn = self.inner.pools.acquire().await?;
        if !schema::has_table(&mut *conn, store::SCHEMA_VERSION_TABLE).await? {
            return Ok(Vec::new());
        }
        store::list(&mut conn).await
    }

    /// Apply pending scripts from the configured migration directory.
    pub async fn migrate(&self) -> DbResult<MigrationReport> {
        let mut runner = MigrationRunner::from_config(&self.inner.config)?;
        let conn = self.inner.pools.acquire().await?;
        runner.run(conn).await
    }

    /// Build a new client from this one's configuration with changes applied.
    ///
    /// This client stays untouched and keeps its pool.
    pub async fn reconfigure<F>(&self, change: F) -> DbResult<MysqlClient>
    where
        F: FnOnce(ClientConfigBuilder) -> ClientConfigBuilder,
    {
        let config = change(self.inner.config.to_builder()).build()?;
        Self::connect(config).await
    }

    /// Close the pool. Clones of this client share it and are closed too.
    pub async fn close(&self) {
        self.inner.pools.close().await;
    }
}
