//! Core data models shared by connectors, the guardrail, and callers.
//!
//! All models are serializable so a [`DataSource`] can be loaded from the
//! application's persisted record (or a JSON descriptor on the CLI) and query
//! results can be handed straight to result rendering.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Data-source type tag as persisted on the data source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceType {
    #[serde(alias = "postgresql")]
    Postgres,
    MySql,
    Sqlite,
    Csv,
}

impl DataSourceType {
    /// Tag used as the connector registry key.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Csv => "csv",
        }
    }
}

impl std::fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DataSourceType {
    type Err = crate::error::DataGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            "csv" => Ok(Self::Csv),
            other => Err(crate::error::DataGateError::unknown_connector(other)),
        }
    }
}

/// SQL dialect spoken by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    PostgreSql,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostgreSql => "postgresql",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Schema that unqualified table names resolve to, if the dialect has one.
    pub fn default_schema(self) -> Option<&'static str> {
        match self {
            Self::PostgreSql => Some("public"),
            Self::MySql | Self::Sqlite => None,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage columns of one encrypted secret.
///
/// The three columns are written together by the vault. Any partially filled
/// triple is treated as corrupt and fails decryption.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretColumns {
    #[serde(default)]
    pub ciphertext: Option<String>,
    #[serde(default)]
    pub iv: Option<String>,
    #[serde(default)]
    pub auth_tag: Option<String>,
}

impl SecretColumns {
    /// True when no part of the secret is stored.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_none() && self.iv.is_none() && self.auth_tag.is_none()
    }
}

/// A user-chosen data source.
///
/// # Security
/// Secrets are only ever present in encrypted form. Use
/// [`crate::security::resolve_connection_url`] to obtain a usable URL at the
/// moment of connecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: Uuid,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: DataSourceType,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: SecretColumns,
    #[serde(default)]
    pub connection_url: SecretColumns,
    /// Dialect-specific settings; for CSV sources see [`CsvMetadata`].
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DataSource {
    /// Creates a data source with only identity and type set.
    pub fn new(source_type: DataSourceType) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: None,
            organization_id: None,
            name: String::new(),
            source_type,
            host: None,
            port: None,
            database: None,
            username: None,
            password: SecretColumns::default(),
            connection_url: SecretColumns::default(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Builder method to set host and port.
    pub fn with_host(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    /// Builder method to set database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Builder method to set username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Builder method to set the metadata blob.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Schema cache key derived from data-source identity.
    pub fn cache_key(&self) -> String {
        format!("schema:{}:{}", self.source_type.tag(), self.id)
    }
}

/// Where an uploaded file's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    InlineBase64,
    Filesystem,
    ObjectStore,
}

/// Format of the uploaded file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Csv,
    Excel,
}

/// Metadata blob of a CSV data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvMetadata {
    pub storage: StorageMode,
    /// Single-character delimiter hint; defaults to `,`.
    #[serde(default)]
    pub delimiter: Option<String>,
    /// Table name the upload is exposed as.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Original upload file name, used when no table name is set.
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub format: SourceFormat,
    /// Base64 payload for `inline_base64` uploads.
    #[serde(default)]
    pub inline_data: Option<String>,
    /// Local path for `filesystem` uploads.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    /// Object key for `object_store` uploads.
    #[serde(default)]
    pub object_key: Option<String>,
}

impl CsvMetadata {
    /// Parses the metadata blob of a CSV data source.
    pub fn from_data_source(data_source: &DataSource) -> crate::Result<Self> {
        serde_json::from_value(data_source.metadata.clone()).map_err(|e| {
            crate::error::DataGateError::materialization_failed(
                "Invalid CSV data source metadata",
                e,
            )
        })
    }

    /// Delimiter byte, validating the hint is a single ASCII character.
    pub fn delimiter_byte(&self) -> crate::Result<u8> {
        match self.delimiter.as_deref() {
            None | Some("") => Ok(b','),
            Some("\\t") | Some("tab") => Ok(b'\t'),
            Some(d) if d.len() == 1 && d.is_ascii() => Ok(d.as_bytes()[0]),
            Some(d) => Err(crate::error::DataGateError::materialization(format!(
                "Unsupported delimiter '{}': expected a single ASCII character",
                d
            ))),
        }
    }
}

/// Request for a compact schema description.
#[derive(Debug, Clone, Default)]
pub struct SchemaRequest {
    pub cache_key: String,
    pub allowed_tables: Option<Vec<String>>,
}

impl SchemaRequest {
    pub fn new(cache_key: impl Into<String>) -> Self {
        Self {
            cache_key: cache_key.into(),
            allowed_tables: None,
        }
    }

    /// Restricts the returned lines to these tables.
    pub fn with_allowed_tables(mut self, tables: Vec<String>) -> Self {
        self.allowed_tables = Some(tables);
        self
    }
}

/// Execution bounds for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub timeout: Duration,
    /// Hard cap on rows read from the cursor.
    pub limit_rows: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            limit_rows: None,
        }
    }
}

impl QueryOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            limit_rows: None,
        }
    }

    pub fn with_limit_rows(mut self, limit: usize) -> Self {
        self.limit_rows = Some(limit);
        self
    }
}

/// Result column description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub data_type: String,
}

/// Rows and fields returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub fields: Vec<FieldInfo>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn new(
        fields: Vec<FieldInfo>,
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        let row_count = rows.len();
        Self {
            fields,
            rows,
            row_count,
        }
    }
}

/// Outcome of a connectivity probe. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub ok: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionTestResult {
    pub fn success(elapsed: Duration) -> Self {
        Self {
            ok: true,
            elapsed_ms: duration_millis(elapsed),
            error: None,
        }
    }

    pub fn failure(elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            elapsed_ms: duration_millis(elapsed),
            error: Some(error.into()),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_type_tags() {
        assert_eq!(DataSourceType::Postgres.tag(), "postgres");
        assert_eq!("postgresql".parse::<DataSourceType>().unwrap(), DataSourceType::Postgres);
        assert_eq!("CSV".parse::<DataSourceType>().unwrap(), DataSourceType::Csv);
        assert!("oracle".parse::<DataSourceType>().is_err());
    }

    #[test]
    fn test_dialect_default_schema() {
        assert_eq!(Dialect::PostgreSql.default_schema(), Some("public"));
        assert_eq!(Dialect::MySql.default_schema(), None);
        assert_eq!(Dialect::Sqlite.to_string(), "sqlite");
    }

    #[test]
    fn test_data_source_deserializes_from_record() {
        let json = serde_json::json!({
            "id": "4a1c9f36-1d0e-4a5b-9d5e-2b8f6e1c0a11",
            "type": "postgresql",
            "host": "db.internal",
            "port": 5432,
            "database": "analytics",
            "username": "reader",
            "password": {"ciphertext": "abc", "iv": "def", "auth_tag": "ghi"}
        });

        let source: DataSource = serde_json::from_value(json).unwrap();
        assert_eq!(source.source_type, DataSourceType::Postgres);
        assert_eq!(source.port, Some(5432));
        assert!(!source.password.is_empty());
        assert!(source.connection_url.is_empty());
        assert!(source.cache_key().starts_with("schema:postgres:"));
    }

    #[test]
    fn test_csv_metadata_delimiter() {
        let source = DataSource::new(DataSourceType::Csv).with_metadata(serde_json::json!({
            "storage": "inline_base64",
            "delimiter": ";",
            "inline_data": ""
        }));
        let metadata = CsvMetadata::from_data_source(&source).unwrap();
        assert_eq!(metadata.storage, StorageMode::InlineBase64);
        assert_eq!(metadata.delimiter_byte().unwrap(), b';');

        let tab = CsvMetadata {
            delimiter: Some("\\t".to_string()),
            ..metadata.clone()
        };
        assert_eq!(tab.delimiter_byte().unwrap(), b'\t');

        let bad = CsvMetadata {
            delimiter: Some("||".to_string()),
            ..metadata
        };
        assert!(bad.delimiter_byte().is_err());
    }

    #[test]
    fn test_connection_test_result_serialization() {
        let ok = ConnectionTestResult::success(Duration::from_millis(12));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "elapsed_ms": 12}));

        let failed = ConnectionTestResult::failure(Duration::from_millis(3), "refused");
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("refused"));
    }
}
