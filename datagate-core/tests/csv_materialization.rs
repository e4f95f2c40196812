//! End-to-end tests for uploaded spreadsheet sources.
//!
//! Uploads are materialized into in-memory SQLite databases, so these tests
//! need no external services.

#![cfg(feature = "csv")]

use base64::Engine;
use datagate_core::connectors::ConnectorContext;
use datagate_core::connectors::csv::CsvFactory;
use datagate_core::connectors::csv::source::ObjectStore;
use datagate_core::{
    ConnectorClient, ConnectorFactory, DataGateError, DataSource, DataSourceType, Dialect,
    QueryOptions, SchemaCache, SchemaRequest, parse_schema,
};
use serde_json::{Value, json};
use std::sync::Arc;

fn context() -> ConnectorContext {
    ConnectorContext::default().with_cache(Arc::new(SchemaCache::default()))
}

fn inline_upload(csv: &str, table: &str) -> DataSource {
    DataSource::new(DataSourceType::Csv).with_metadata(json!({
        "storage": "inline_base64",
        "table_name": table,
        "inline_data": base64::engine::general_purpose::STANDARD.encode(csv),
    }))
}

// =============================================================================
// Inline uploads
// =============================================================================

#[tokio::test]
async fn test_sales_total() {
    let source = inline_upload("order_id,amount\n1,199.95\n2,10.50\n", "sales_data");
    let client = CsvFactory::new(context()).create_client(&source).await.unwrap();

    let result = client
        .execute_query(
            "SELECT SUM(amount) AS total FROM sales_data",
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    let total = result.rows[0]["total"].as_f64().unwrap();
    assert!((total - 210.45).abs() < 1e-9, "unexpected total {total}");
    client.disconnect().await;
}

#[tokio::test]
async fn test_inferred_schema_parses() {
    let csv = "Region,Units,Unit Price,Active,Launched,Notes\n\
               north,3,1.25,yes,2026-01-01T00:00:00Z,first\n\
               south,,2,no,2026-01-02T00:00:00Z,\n";
    let source = inline_upload(csv, "Launch Plan");
    let client = CsvFactory::new(context()).create_client(&source).await.unwrap();
    assert_eq!(client.dialect(), Dialect::Sqlite);

    let schema = client.get_schema(&SchemaRequest::default()).await.unwrap();
    let tables = parse_schema(&schema);
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "launch_plan");

    let types: Vec<(&str, &str)> = tables[0]
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.data_type.as_str()))
        .collect();
    assert_eq!(
        types,
        vec![
            ("region", "TEXT"),
            ("units", "INTEGER"),
            ("unit_price", "REAL"),
            ("active", "BOOLEAN"),
            ("launched", "DATETIME"),
            ("notes", "TEXT"),
        ]
    );
    assert_eq!(tables[0].numeric_columns().count(), 2);
    assert_eq!(tables[0].temporal_columns().count(), 1);
    client.disconnect().await;
}

#[tokio::test]
async fn test_empty_cells_and_failed_coercions_are_null() {
    let mut csv = String::from("qty,label\n");
    for i in 0..500 {
        csv.push_str(&format!("{i},row {i}\n"));
    }
    csv.push_str("lots,\n");

    let client = CsvFactory::new(context())
        .create_client(&inline_upload(&csv, "stock"))
        .await
        .unwrap();
    let result = client
        .execute_query(
            "SELECT qty, label FROM stock WHERE qty IS NULL",
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["qty"], Value::Null);
    assert_eq!(result.rows[0]["label"], Value::Null);
    client.disconnect().await;
}

#[tokio::test]
async fn test_tab_delimited_with_duplicate_headers() {
    let source = DataSource::new(DataSourceType::Csv).with_metadata(json!({
        "storage": "inline_base64",
        "delimiter": "\\t",
        "file_name": "exports/Weekly Report.tsv",
        "inline_data": base64::engine::general_purpose::STANDARD.encode("a\tA\t\n1\t2\t3\t4\n"),
    }));
    let client = CsvFactory::new(context()).create_client(&source).await.unwrap();

    let result = client
        .execute_query("SELECT * FROM weekly_report", &QueryOptions::default())
        .await
        .unwrap();
    let names: Vec<&str> = result.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a", "a_2", "column_3", "column_4"]);
    assert_eq!(result.rows[0]["column_4"], json!(4));
    client.disconnect().await;
}

#[tokio::test]
async fn test_uploaded_table_is_read_only() {
    let client = CsvFactory::new(context())
        .create_client(&inline_upload("id\n1\n", "t"))
        .await
        .unwrap();

    let err = client
        .execute_query("DELETE FROM t", &QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DataGateError::QueryExecution { .. }));
    client.disconnect().await;
}

#[tokio::test]
async fn test_header_only_upload_yields_empty_table() {
    let client = CsvFactory::new(context())
        .create_client(&inline_upload("id,name\n", "people"))
        .await
        .unwrap();

    let result = client
        .execute_query("SELECT * FROM people", &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.row_count, 0);
    assert_eq!(client.get_allowed_tables(None).await.unwrap(), vec!["people"]);
    client.disconnect().await;
}

#[tokio::test]
async fn test_empty_header_fails_before_table_creation() {
    let client = CsvFactory::new(context())
        .create_client(&inline_upload(",,\n1,2,3\n", "t"))
        .await
        .unwrap();

    let err = client.get_allowed_tables(None).await.unwrap_err();
    assert!(matches!(err, DataGateError::Materialization { .. }));
    client.disconnect().await;
}

// =============================================================================
// Filesystem and object-store uploads
// =============================================================================

#[tokio::test]
async fn test_filesystem_upload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cities.csv");
    std::fs::write(&path, "\u{feff}city;population\nOslo;709000\nBergen;291000\n").unwrap();

    let source = DataSource::new(DataSourceType::Csv).with_metadata(json!({
        "storage": "filesystem",
        "delimiter": ";",
        "file_name": "cities.csv",
        "path": path,
    }));
    let client = CsvFactory::new(context()).create_client(&source).await.unwrap();

    let result = client
        .execute_query(
            "SELECT city FROM cities ORDER BY population DESC",
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.rows[0]["city"], json!("Oslo"));
    client.disconnect().await;
}

#[derive(Debug)]
struct FixedStore;

#[async_trait::async_trait]
impl ObjectStore for FixedStore {
    async fn get(&self, bucket: Option<&str>, key: &str) -> datagate_core::Result<Vec<u8>> {
        assert_eq!(bucket, Some("uploads"));
        assert_eq!(key, "org-1/metrics.csv");
        Ok(b"day,visits\n2026-03-01,10\n2026-03-02,12\n".to_vec())
    }
}

#[tokio::test]
async fn test_object_store_upload() {
    let source = DataSource::new(DataSourceType::Csv).with_metadata(json!({
        "storage": "object_store",
        "bucket": "uploads",
        "object_key": "org-1/metrics.csv",
        "file_name": "metrics.csv",
    }));
    let client = CsvFactory::new(context())
        .with_object_store(Arc::new(FixedStore))
        .create_client(&source)
        .await
        .unwrap();

    let result = client
        .execute_query("SELECT SUM(visits) AS v FROM metrics", &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.rows[0]["v"], json!(22));
    client.disconnect().await;
}
