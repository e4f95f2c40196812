//! Read-only statement execution and row conversion for SQLite.

use crate::connectors::helpers::classify_query_error;
use crate::error::DataGateError;
use crate::models::{FieldInfo, QueryOptions, QueryResult};
use crate::Result;
use futures::TryStreamExt;
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Executor, Row, Statement, TypeInfo};
use std::time::{Duration, Instant};
use tracing::debug;

/// Virtual machine instructions between deadline checks.
const DEADLINE_CHECK_OPS: i32 = 1000;

/// Interrupts any statement on `conn` still running once `timeout` has
/// elapsed from now. The interrupted statement fails with `SQLITE_INTERRUPT`.
///
/// # Errors
/// Returns a query error if the connection handle cannot be locked
pub async fn set_deadline(conn: &mut SqliteConnection, timeout: Duration) -> Result<()> {
    let deadline = Instant::now().checked_add(timeout);
    let mut handle = conn
        .lock_handle()
        .await
        .map_err(|e| DataGateError::query_error("Failed to install statement deadline", e))?;
    handle.set_progress_handler(DEADLINE_CHECK_OPS, move || {
        deadline.is_none_or(|deadline| Instant::now() < deadline)
    });
    Ok(())
}

/// Removes a deadline installed by [`set_deadline`].
pub async fn clear_deadline(conn: &mut SqliteConnection) {
    match conn.lock_handle().await {
        Ok(mut handle) => handle.remove_progress_handler(),
        Err(e) => debug!(error = %e, "Ignoring failure to clear statement deadline"),
    }
}

/// Runs `sql` inside a transaction, reading at most `options.limit_rows` rows.
///
/// The transaction commits on success and rolls back on error; rollback
/// failures are ignored.
///
/// # Errors
/// Returns a timeout or query error classified from the driver error
pub async fn execute(
    conn: &mut SqliteConnection,
    sql: &str,
    options: &QueryOptions,
) -> Result<QueryResult> {
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
    conn: &mut SqliteConnection,
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
        rows.push(row_to_map(&row, &fields));
        if limit.is_some_and(|max| rows.len() >= max) {
            break;
        }
    }

    Ok(QueryResult::new(fields, rows))
}

/// Converts a row to an ordered JSON object keyed by column name.
pub fn row_to_map(row: &SqliteRow, fields: &[FieldInfo]) -> Map<String, JsonValue> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let declared = fields
            .get(index)
            .map_or_else(|| column.type_info().name(), |f| f.data_type.as_str());
        map.insert(column.name().to_string(), extract_value(row, index, declared));
    }
    map
}

/// Extracts one value. SQLite is dynamically typed, so storage classes are
/// tried in turn.
fn extract_value(row: &SqliteRow, index: usize, declared: &str) -> JsonValue {
    if declared.eq_ignore_ascii_case("BOOLEAN") {
        if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            return v.map_or(JsonValue::Null, JsonValue::Bool);
        }
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(JsonValue::Null, |n| JsonValue::Number(n.into()));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map_or(JsonValue::Null, |bytes| {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            JsonValue::String(format!("base64:{}", encoded))
        });
    }

    row.try_get_unchecked::<Option<String>, _>(index)
        .ok()
        .flatten()
        .map_or(JsonValue::Null, JsonValue::String)
}
