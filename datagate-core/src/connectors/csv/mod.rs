//! Virtual connector for uploaded spreadsheets.
//!
//! An upload is turned into a private in-memory SQLite database on first use
//! and then served by the SQLite client, so schema reads and query execution
//! behave exactly as for a SQLite file.
//!
//! # Module Structure
//! - `source`: loading bytes from inline, filesystem, or object storage;
//!   delimited-text parsing
//! - `headers`: column and table name normalization
//! - `inference`: sampled column type inference and cell coercion
//! - `materialize`: table creation and bulk load
//! - `spreadsheet`: Excel workbooks (`excel` feature)
//! - `object_store`: S3 uploads (`object-store` feature)

pub mod headers;
pub mod inference;
pub mod materialize;
pub mod source;

#[cfg(feature = "excel")]
pub mod spreadsheet;

#[cfg(feature = "object-store")]
pub mod object_store;

use super::sqlite::{SqliteClient, SqliteOpener};
use super::{ConnectorClient, ConnectorContext, ConnectorFactory};
use crate::error::DataGateError;
use crate::models::{CsvMetadata, DataSource, DataSourceType, Dialect, SourceFormat};
use crate::Result;
use async_trait::async_trait;
use materialize::TablePlan;
use source::ObjectStore;
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::debug;

/// Opens a connection by materializing the upload of one data source.
#[derive(Debug)]
pub struct CsvOpener {
    data_source: DataSource,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl CsvOpener {
    pub fn new(data_source: DataSource, object_store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            data_source,
            object_store,
        }
    }

    /// Loads and parses the upload into a table plan.
    ///
    /// # Errors
    /// Returns a materialization error for an unreadable or empty upload
    pub async fn plan(&self) -> Result<TablePlan> {
        let metadata = CsvMetadata::from_data_source(&self.data_source)?;
        let delimiter = metadata.delimiter_byte()?;
        let bytes = source::load_bytes(&metadata, self.object_store.as_deref()).await?;

        let records = match metadata.format {
            SourceFormat::Csv => source::parse_delimited(&bytes, delimiter)?,
            SourceFormat::Excel => read_workbook(bytes)?,
        };

        let table = headers::table_name(
            metadata.table_name.as_deref(),
            metadata.file_name.as_deref(),
        );
        TablePlan::from_records(table, records)
    }
}

#[cfg(feature = "excel")]
fn read_workbook(bytes: Vec<u8>) -> Result<Vec<Vec<String>>> {
    spreadsheet::read_first_sheet(bytes)
}

#[cfg(not(feature = "excel"))]
fn read_workbook(_bytes: Vec<u8>) -> Result<Vec<Vec<String>>> {
    Err(DataGateError::unsupported_feature(
        "Excel uploads (enable the `excel` feature)",
        "csv",
    ))
}

#[async_trait]
impl SqliteOpener for CsvOpener {
    async fn open(&self, context: &ConnectorContext) -> Result<SqliteConnection> {
        let plan = self.plan().await?;
        debug!(source = %self.data_source.id, table = %plan.table, "Materializing upload");
        materialize::open_materialized(&plan, context.settings.connect_timeout).await
    }
}

/// Factory for uploaded-file sources.
#[derive(Debug, Clone)]
pub struct CsvFactory {
    context: ConnectorContext,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl CsvFactory {
    pub fn new(context: ConnectorContext) -> Self {
        Self {
            context,
            object_store: None,
        }
    }

    /// Builder method to serve `object_store` uploads from `store`.
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }
}

#[async_trait]
impl ConnectorFactory for CsvFactory {
    fn type_tag(&self) -> &str {
        DataSourceType::Csv.tag()
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn create_client(&self, data_source: &DataSource) -> Result<Box<dyn ConnectorClient>> {
        if data_source.source_type != DataSourceType::Csv {
            return Err(DataGateError::configuration(format!(
                "CSV connector cannot serve a {} data source",
                data_source.source_type
            )));
        }
        CsvMetadata::from_data_source(data_source)?.delimiter_byte()?;

        Ok(Box::new(SqliteClient::new(
            CsvOpener::new(data_source.clone(), self.object_store.clone()),
            self.context.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueryOptions, SchemaRequest};
    use base64::Engine;
    use serde_json::json;

    fn upload(csv: &str, table: &str) -> DataSource {
        DataSource::new(DataSourceType::Csv).with_metadata(json!({
            "storage": "inline_base64",
            "table_name": table,
            "inline_data": base64::engine::general_purpose::STANDARD.encode(csv),
        }))
    }

    fn factory() -> CsvFactory {
        let context = ConnectorContext::default()
            .with_cache(Arc::new(crate::cache::SchemaCache::default()));
        CsvFactory::new(context)
    }

    #[tokio::test]
    async fn test_schema_of_materialized_upload() {
        let client = factory()
            .create_client(&upload("id,price,active,seen\n1,2.5,yes,2026-01-01\n", "items"))
            .await
            .unwrap();

        let schema = client.get_schema(&SchemaRequest::default()).await.unwrap();
        assert_eq!(
            schema,
            "items.id INTEGER\nitems.price REAL\nitems.active BOOLEAN\nitems.seen DATETIME"
        );
        assert_eq!(client.dialect(), Dialect::Sqlite);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_booleans_come_back_as_json_booleans() {
        let client = factory()
            .create_client(&upload("flag\ntrue\nno\n\n", "flags"))
            .await
            .unwrap();

        let result = client
            .execute_query("SELECT flag FROM flags", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["flag"], json!(true));
        assert_eq!(result.rows[1]["flag"], json!(false));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_empty_upload_fails_to_materialize() {
        let client = factory().create_client(&upload("", "t")).await.unwrap();
        let err = client
            .execute_query("SELECT 1", &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DataGateError::Materialization { .. }));

        let probe = client.test_connection().await;
        assert!(!probe.ok);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_invalid_delimiter_rejected_at_creation() {
        let source = DataSource::new(DataSourceType::Csv).with_metadata(json!({
            "storage": "inline_base64",
            "delimiter": "||",
            "inline_data": "",
        }));
        assert!(factory().create_client(&source).await.is_err());
    }

    #[cfg(not(feature = "excel"))]
    #[tokio::test]
    async fn test_excel_requires_feature() {
        let source = DataSource::new(DataSourceType::Csv).with_metadata(json!({
            "storage": "inline_base64",
            "format": "excel",
            "inline_data": "AAAA",
        }));
        let opener = CsvOpener::new(source, None);
        assert!(matches!(
            opener.plan().await,
            Err(DataGateError::UnsupportedFeature { .. })
        ));
    }
}
