//! Read-only statement execution and row conversion for MySQL.

use crate::connectors::helpers::classify_query_error;
use crate::error::DataGateError;
use crate::models::{FieldInfo, QueryOptions, QueryResult};
use crate::Result;
use futures::TryStreamExt;
use serde_json::{Map, Value as JsonValue};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo};
use std::time::Duration;
use tracing::debug;

/// Session statement bounding subsequent `SELECT`s.
pub fn max_execution_time_sql(timeout: Duration) -> String {
    format!(
        "SET SESSION MAX_EXECUTION_TIME = {}",
        timeout.as_millis().max(1)
    )
}

const RESET_MAX_EXECUTION_TIME: &str = "SET SESSION MAX_EXECUTION_TIME = DEFAULT";

/// Runs `sql` in a read-only transaction bounded by `MAX_EXECUTION_TIME`.
///
/// The session timeout is restored to the server default afterwards so the
/// connection carries no leftover state.
///
/// # Errors
/// Returns [`DataGateError::Timeout`] when the server interrupts the
/// statement and a query error for any other failure
pub async fn execute(
    conn: &mut MySqlConnection,
    sql: &str,
    options: &QueryOptions,
) -> Result<QueryResult> {
    let outcome = execute_bounded(conn, sql, options).await;

    if let Err(e) = (&mut *conn)
        .execute(sqlx::raw_sql(RESET_MAX_EXECUTION_TIME))
        .await
    {
        debug!(error = %e, "Ignoring failure to reset MAX_EXECUTION_TIME");
    }

    outcome
}

async fn execute_bounded(
    conn: &mut MySqlConnection,
    sql: &str,
    options: &QueryOptions,
) -> Result<QueryResult> {
    let limit_sql = max_execution_time_sql(options.timeout);
    (&mut *conn)
        .execute(sqlx::raw_sql(&limit_sql))
        .await
        .map_err(|e| DataGateError::query_error("Failed to set MAX_EXECUTION_TIME", e))?;
    (&mut *conn)
        .execute(sqlx::raw_sql("SET TRANSACTION READ ONLY"))
        .await
        .map_err(|e| DataGateError::query_error("Failed to mark transaction read-only", e))?;

    let mut tx = conn
        .begin()
        .await
        .map_err(|e| DataGateError::query_error("Failed to begin transaction", e))?;

    match run(&mut tx, sql, options.limit_rows).await {
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
    conn: &mut MySqlConnection,
    sql: &str,
    limit: Option<usize>,
) -> std::result::Result<QueryResult, sqlx::Error> {
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
    if limit == Some(0) {
        return Ok(QueryResult::new(fields, rows));
    }

    let mut stream = sqlx::query(sql).fetch(&mut *conn);
    while let Some(row) = stream.try_next().await? {
        rows.push(row_to_map(&row));
        if limit.is_some_and(|max| rows.len() >= max) {
            break;
        }
    }

    Ok(QueryResult::new(fields, rows))
}

fn row_to_map(row: &MySqlRow) -> Map<String, JsonValue> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let declared = column.type_info().name();
        map.insert(column.name().to_string(), extract_value(row, index, declared));
    }
    map
}

/// Extracts a column value as JSON, trying types in order of likelihood.
fn extract_value(row: &MySqlRow, index: usize, declared: &str) -> JsonValue {
    if declared == "BOOLEAN" {
        if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            return v.map_or(JsonValue::Null, JsonValue::Bool);
        }
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()));
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
        return v.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
        return v
            .and_then(|f| serde_json::Number::from_f64(f64::from(f)))
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return v.map_or(JsonValue::Null, |d| JsonValue::String(d.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(index) {
        return v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<JsonValue>, _>(index) {
        return v.unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map_or(JsonValue::Null, |bytes| {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            JsonValue::String(format!("base64:{}", encoded))
        });
    }

    // DECIMAL and other text-encoded types
    row.try_get_unchecked::<Option<String>, _>(index)
        .ok()
        .flatten()
        .map_or(JsonValue::Null, JsonValue::String)
}
