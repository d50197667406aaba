//! Schema introspection.

use crate::error::{DbError, DbResult};
use sqlx::MySql;
use tracing::debug;

const TABLE_EXISTS_QUERY: &str = "SELECT COUNT(*) FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_name = ?";

/// Check whether `table` exists in the connection's current schema.
///
/// Asks the catalog instead of probing the table, so a failing query is an
/// error and never read as "exists".
pub async fn has_table<'e, E>(executor: E, table: &str) -> DbResult<bool>
where
    E: sqlx::Executor<'e, Database = MySql>,
{
    if table.is_empty() {
        return Err(DbError::invalid_input("Table name cannot be empty"));
    }
    let count: i64 = sqlx::query_scalar(TABLE_EXISTS_QUERY)
        .bind(table)
        .fetch_one(executor)
        .await?;
    debug!(table = %table, exists = count > 0, "Checked table existence");
    Ok(count > 0)
}
