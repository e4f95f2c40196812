//! Read-only statement execution for PostgreSQL.
//!
//! Rows are serialized server-side with `row_to_json`, so every Postgres type
//! arrives as JSON without a per-type decode table.

use crate::connectors::helpers::classify_query_error;
use crate::error::DataGateError;
use crate::models::{FieldInfo, QueryOptions, QueryResult};
use crate::Result;
use futures::TryStreamExt;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::PgConnection;
use sqlx::{Column, Connection, Executor, Statement, TypeInfo};
use std::time::Duration;
use tracing::debug;

/// Wraps `sql` so each row comes back as one JSON object.
pub fn wrap_row_to_json(sql: &str) -> String {
    let inner = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    format!("SELECT row_to_json(q.*) AS row_data FROM (\n{}\n) q", inner)
}

/// `SET LOCAL` statement bounding the current transaction.
pub fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET LOCAL statement_timeout = {}", timeout.as_millis().max(1))
}

/// Runs `sql` in a read-only transaction with a transaction-scoped
/// `statement_timeout`.
///
/// # Errors
/// Returns [`DataGateError::Timeout`] when the server cancels the statement
/// and a query error for any other failure
pub async fn execute(
    conn: &mut PgConnection,
    sql: &str,
    options: &QueryOptions,
) -> Result<QueryResult> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| DataGateError::query_error("Failed to begin transaction", e))?;

    match run(&mut tx, sql, options).await {
        Ok(result) => {
            tx.commit()
                .await
                .map_err(|e| classify_query_error(e, options.timeout))?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                debug!(error = %rollback, "Ignoring rollback failure");
            }
            Err(classify_query_error(e, options.timeout))
        }
    }
}

async fn run(
    conn: &mut PgConnection,
    sql: &str,
    options: &QueryOptions,
) -> std::result::Result<QueryResult, sqlx::Error> {
    (&mut *conn)
        .execute(sqlx::raw_sql("SET TRANSACTION READ ONLY"))
        .await?;
    let timeout_sql = statement_timeout_sql(options.timeout);
    (&mut *conn).execute(sqlx::raw_sql(&timeout_sql)).await?;

    let statement = (&mut *conn).prepare(sql).await?;
    let fields: Vec<FieldInfo> = statement
        .columns()
        .iter()
        .map(|column| FieldInfo {
            name: column.name().to_string(),
            data_type: column.type_info().name().to_string(),
        })
        .collect();

    let mut rows = Vec::new();
    if options.limit_rows == Some(0) {
        return Ok(QueryResult::new(fields, rows));
    }

    let wrapped = wrap_row_to_json(sql);
    let mut stream = sqlx::query_scalar::<_, JsonValue>(&wrapped).fetch(&mut *conn);
    while let Some(value) = stream.try_next().await? {
        rows.push(match value {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        });
        if options.limit_rows.is_some_and(|max| rows.len() >= max) {
            break;
        }
    }

    Ok(QueryResult::new(fields, rows))
}
