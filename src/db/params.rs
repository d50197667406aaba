//! Parameter binding utilities for MySQL statements.
//!
//! Binds `QueryParam` values onto sqlx queries, whether built from SQL text
//! or from a prepared statement.

use crate::models::QueryParam;
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::types::Json;

pub(crate) type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

/// Bind one parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(query: MySqlQuery<'q>, param: &'q QueryParam) -> MySqlQuery<'q> {
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

/// Bind all parameters in order.
pub(crate) fn bind_all<'q>(mut query: MySqlQuery<'q>, params: &'q [QueryParam]) -> MySqlQuery<'q> {
    for param in params {
        query = bind_mysql_param(query, param);
    }
    query
}
