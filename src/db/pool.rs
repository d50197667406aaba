//! Connection pool management.
//!
//! `PoolManager` owns the one `MySqlPool` a client works with. The pool is
//! opened lazily, checked with a ping before being handed out, and replaced
//! wholesale when the ping fails. Once closed it stays closed.

use crate::config::ClientConfig;
use crate::db::dsn;
use crate::db::retry::retry;
use crate::duration::format_duration;
use crate::error::{DbError, DbResult};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, MySqlPool, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct PoolState {
    /// Bumped on every rebuild so concurrent failures replace the pool once.
    generation: u64,
    pool: MySqlPool,
    /// Set by `close()`; no rebuild happens afterwards.
    closed: bool,
}

#[derive(Debug)]
pub struct PoolManager {
    config: Arc<ClientConfig>,
    state: RwLock<PoolState>,
}

impl PoolManager {
    /// Open the pool without validating connectivity.
    pub fn open(config: Arc<ClientConfig>) -> Self {
        info!(
            dsn = %dsn::redacted_dsn(&config),
            max_open_conns = config.pool.max_open_conns,
            max_idle_conns = config.pool.max_idle_conns,
            "Opening connection pool"
        );
        let pool = create_pool(&config);
        Self {
            config,
            state: RwLock::new(PoolState {
                generation: 0,
                pool,
                closed: false,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Acquire a connection and round-trip a ping on it.
    pub async fn ping(&self) -> DbResult<()> {
        let pool = {
            let state = self.state.read().await;
            if state.closed {
                return Err(closed_error());
            }
            state.pool.clone()
        };
        ping_pool(&pool, self.ping_timeout(), self.config.driver.timeout).await
    }

    /// A pool that answered a ping, rebuilt and retried on failure.
    ///
    /// Fails straight away, without retrying, once the manager is closed.
    pub async fn live_pool(&self) -> DbResult<MySqlPool> {
        if self.state.read().await.closed {
            return Err(closed_error());
        }
        retry(
            &self.config.retry,
            self.config.retry_observer(),
            "live pool",
            |attempt| async move {
                let (generation, pool) = {
                    let state = self.state.read().await;
                    if state.closed {
                        return Err(closed_error());
                    }
                    (state.generation, state.pool.clone())
                };
                match ping_pool(&pool, self.ping_timeout(), self.config.driver.timeout).await {
                    Ok(()) => {
                        debug!(attempt, generation, "Pool is live");
                        Ok(pool)
                    }
                    Err(e) => {
                        self.rebuild(generation).await;
                        Err(e)
                    }
                }
            },
        )
        .await
    }

    /// A connection from a live pool.
    pub async fn acquire(&self) -> DbResult<PoolConnection<MySql>> {
        let pool = self.live_pool().await?;
        pool.acquire().await.map_err(|e| self.acquire_error(e))
    }

    /// Begin a transaction on a live pool.
    pub async fn begin(&self) -> DbResult<Transaction<'static, MySql>> {
        let pool = self.live_pool().await?;
        pool.begin().await.map_err(|e| self.acquire_error(e))
    }

    /// Report an exhausted acquire wait with the configured limit.
    fn acquire_error(&self, error: sqlx::Error) -> DbError {
        match error {
            sqlx::Error::PoolTimedOut => {
                DbError::timeout("connection pool acquire", self.config.driver.timeout)
            }
            other => other.into(),
        }
    }

    /// Replace the pool if it is still the one that failed the ping.
    async fn rebuild(&self, failed_generation: u64) {
        let stale = {
            let mut state = self.state.write().await;
            if state.closed || state.generation != failed_generation {
                return;
            }
            let fresh = create_pool(&self.config);
            state.generation += 1;
            info!(generation = state.generation, "Rebuilt connection pool");
            std::mem::replace(&mut state.pool, fresh)
        };
        // Closing waits for checked-out connections, so do it off the caller's path.
        tokio::spawn(async move {
            stale.close().await;
        });
    }

    /// Close the pool; further use fails with a connection error.
    pub async fn close(&self) {
        let pool = {
            let mut state = self.state.write().await;
            state.closed = true;
            state.pool.clone()
        };
        pool.close().await;
        info!("Connection pool closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    fn ping_timeout(&self) -> Duration {
        self.config.driver.timeout + self.config.driver.read_timeout
    }
}

/// Build a lazily connecting pool for the configuration.
fn create_pool(config: &ClientConfig) -> MySqlPool {
    let pool_opts = &config.pool;
    // sqlx keeps `min_connections` warm, the closest match to an idle cap.
    MySqlPoolOptions::new()
        .max_connections(pool_opts.max_open_conns)
        .min_connections(pool_opts.max_idle_conns.min(pool_opts.max_open_conns))
        .max_lifetime(Some(pool_opts.conn_max_lifetime))
        .acquire_timeout(config.driver.timeout)
        .test_before_acquire(true)
        .connect_lazy_with(dsn::connect_options(config))
}

fn closed_error() -> DbError {
    DbError::connection(
        "Connection pool is closed",
        "Reconnect with a new client; a closed client is not reopened",
    )
}

async fn ping_pool(pool: &MySqlPool, limit: Duration, acquire_timeout: Duration) -> DbResult<()> {
    let check = async {
        let mut conn = pool.acquire().await?;
        conn.ping().await?;
        Ok::<_, sqlx::Error>(())
    };
    match tokio::time::timeout(limit, check).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(connection_error(e, acquire_timeout)),
        Err(_) => {
            warn!(timeout = %format_duration(limit), "Ping timed out");
            Err(DbError::timeout("ping", limit))
        }
    }
}

/// Wrap a connect failure with a helpful suggestion.
///
/// The pool retries refused connects until `acquire_timeout`, so a timed out
/// acquire usually means the server is unreachable.
fn connection_error(error: sqlx::Error, acquire_timeout: Duration) -> DbError {
    if matches!(error, sqlx::Error::PoolTimedOut) {
        return DbError::connection(
            format!(
                "Timed out after {} acquiring a connection",
                format_duration(acquire_timeout)
            ),
            "Check that the MySQL server is running and accessible",
        );
    }
    let suggestion = connection_suggestion(&error);
    match DbError::from(error) {
        DbError::Connection { message, .. } | DbError::Execution { message, .. } => {
            DbError::connection(message, suggestion)
        }
        other => other,
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the MySQL server is running and accessible".to_string();
    }
    if error_str.contains("access denied") || error_str.contains("password") {
        return "Verify the user name and password".to_string();
    }
    if error_str.contains("unknown database") {
        return "Check that the schema exists".to_string();
    }
    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }
    "Verify host, port and credentials".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_suggestion() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "Connection refused (os error 111)",
        ));
        assert!(connection_suggestion(&err).contains("running"));

        let err = sqlx::Error::Protocol("unexpected packet".into());
        assert_eq!(connection_suggestion(&err), "Verify host, port and credentials");
    }

    #[test]
    fn test_connection_error_keeps_message() {
        let err = connection_error(sqlx::Error::PoolClosed, Duration::from_secs(30));
        match err {
            DbError::Connection { message, .. } => assert!(message.contains("closed")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_acquire_timeout_reports_configured_limit() {
        let err = connection_error(sqlx::Error::PoolTimedOut, Duration::from_millis(1500));
        match err {
            DbError::Connection {
                message,
                suggestion,
            } => {
                assert!(message.contains("1.5s"), "{message}");
                assert!(suggestion.contains("running"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let config = ClientConfig::builder()
            .timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        let manager = PoolManager::open(Arc::new(config));
        let err = manager.acquire_error(sqlx::Error::PoolTimedOut);
        assert_eq!(
            err.to_string(),
            "Timeout: connection pool acquire exceeded 250ms"
        );
    }

    #[tokio::test]
    async fn test_closed_manager_is_not_rebuilt() {
        let config = ClientConfig::builder()
            .host("127.0.0.1")
            .port(1)
            .attempts(3)
            .delay(Duration::from_millis(1))
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let manager = PoolManager::open(Arc::new(config));
        manager.close().await;
        assert!(manager.is_closed().await);

        let err = manager.live_pool().await.unwrap_err();
        assert!(err.to_string().contains("Connection pool is closed"), "{err}");
        assert!(manager.ping().await.is_err());
        assert!(manager.acquire().await.is_err());

        let state = manager.state.read().await;
        assert_eq!(state.generation, 0);
        assert!(state.pool.is_closed());
    }

    #[tokio::test]
    async fn test_unreachable_server_exhausts_retries() {
        let config = ClientConfig::builder()
            .host("127.0.0.1")
            .port(1)
            .attempts(2)
            .delay(Duration::from_millis(1))
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let manager = PoolManager::open(Arc::new(config));

        let err = manager.live_pool().await.unwrap_err();
        assert!(matches!(err, DbError::PoolUnavailable { attempts: 2, .. }));
        assert_eq!(manager.state.read().await.generation, 2);
    }
}
