//! Loads parsed upload records into a private in-memory SQLite database.

use super::headers::{normalize_headers, quote_identifier};
use super::inference::{CellValue, ColumnType, coerce, infer_column_types};
use crate::connectors::helpers::connect_with_deadline;
use crate::error::DataGateError;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Table layout derived from an upload: normalized column names, inferred
/// types, and the data rows.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: String,
    pub columns: Vec<(String, ColumnType)>,
    pub rows: Vec<Vec<String>>,
}

impl TablePlan {
    /// Builds a plan from records whose first entry is the header row.
    ///
    /// # Errors
    /// Returns a materialization error for an empty upload or an empty
    /// header row
    pub fn from_records(table: impl Into<String>, mut records: Vec<Vec<String>>) -> Result<Self> {
        if records.is_empty() {
            return Err(DataGateError::materialization("Uploaded file is empty"));
        }
        let header = records.remove(0);
        if header.iter().all(|h| h.trim().is_empty()) {
            return Err(DataGateError::materialization("Header row is empty"));
        }

        let width = records
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or_default();
        let names = normalize_headers(&header, width);
        let types = infer_column_types(&records, width);

        Ok(Self {
            table: table.into(),
            columns: names.into_iter().zip(types).collect(),
            rows: records,
        })
    }

    /// `CREATE TABLE` statement for this plan.
    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_identifier(name), ty.sql_name()))
            .collect();
        format!(
            "CREATE TABLE {} ({})",
            quote_identifier(&self.table),
            columns.join(", ")
        )
    }

    /// Parameterized `INSERT` statement for one row.
    pub fn insert_sql(&self) -> String {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {} VALUES ({})",
            quote_identifier(&self.table),
            placeholders
        )
    }
}

/// Opens a fresh in-memory database, loads `plan` into it, and switches the
/// connection to `query_only`.
///
/// # Errors
/// Returns a materialization error if the database cannot be created or
/// loaded; a failed load leaves no table behind.
pub async fn open_materialized(plan: &TablePlan, connect_timeout: Duration) -> Result<SqliteConnection> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| DataGateError::materialization_failed("Invalid in-memory database options", e))?;
    let mut conn = connect_with_deadline(connect_timeout, options.connect()).await?;

    let started = Instant::now();
    load(&mut conn, plan).await?;

    (&mut conn)
        .execute(sqlx::raw_sql("PRAGMA query_only = ON"))
        .await
        .map_err(|e| DataGateError::materialization_failed("Failed to lock materialized database", e))?;

    debug!(
        table = %plan.table,
        columns = plan.columns.len(),
        rows = plan.rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Materialized upload"
    );
    Ok(conn)
}

async fn load(conn: &mut SqliteConnection, plan: &TablePlan) -> Result<()> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| DataGateError::materialization_failed("Failed to begin load", e))?;

    match insert_all(&mut tx, plan).await {
        Ok(()) => tx
            .commit()
            .await
            .map_err(|e| DataGateError::materialization_failed("Failed to commit load", e)),
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                debug!(error = %rollback, "Ignoring rollback failure");
            }
            Err(DataGateError::materialization_failed(
                format!("Failed to load table {}", plan.table),
                e,
            ))
        }
    }
}

async fn insert_all(
    conn: &mut SqliteConnection,
    plan: &TablePlan,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(&plan.create_table_sql())
        .execute(&mut *conn)
        .await?;

    let insert = plan.insert_sql();
    for row in &plan.rows {
        let mut query = sqlx::query(&insert);
        for (index, (_, column_type)) in plan.columns.iter().enumerate() {
            let raw = row.get(index).map_or("", String::as_str);
            query = match coerce(raw, *column_type) {
                CellValue::Null => query.bind(None::<String>),
                CellValue::Integer(v) => query.bind(v),
                CellValue::Real(v) => query.bind(v),
                CellValue::Text(v) => query.bind(v),
            };
        }
        query.execute(&mut *conn).await?;
    }

    Ok(())
}
