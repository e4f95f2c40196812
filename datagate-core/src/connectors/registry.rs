//! Type-tag to connector factory lookup.

use super::{ConnectorClient, ConnectorContext, ConnectorFactory};
use crate::error::DataGateError;
use crate::models::DataSource;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maps data-source type tags to factories.
///
/// New dialects are added by registering another factory; nothing upstream
/// of the registry changes.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    factories: HashMap<String, Arc<dyn ConnectorFactory>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

impl ConnectorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a factory for every dialect compiled into this build.
    #[cfg_attr(
        not(any(
            feature = "postgresql",
            feature = "mysql",
            feature = "sqlite",
            feature = "csv"
        )),
        allow(unused_variables)
    )]
    pub fn with_defaults(context: ConnectorContext) -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "postgresql")]
        registry.register(Arc::new(super::postgres::PostgresFactory::new(context.clone())));

        #[cfg(feature = "mysql")]
        registry.register(Arc::new(super::mysql::MySqlFactory::new(context.clone())));

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(super::sqlite::SqliteFactory::new(context.clone())));

        #[cfg(feature = "csv")]
        {
            #[allow(unused_mut)]
            let mut csv = super::csv::CsvFactory::new(context.clone());
            #[cfg(feature = "object-store")]
            {
                csv = csv.with_object_store(Arc::new(
                    super::csv::object_store::S3ObjectStore::from_env(),
                ));
            }
            registry.register(Arc::new(csv));
        }

        registry
    }

    /// Registers `factory` under its type tag, replacing any previous one.
    pub fn register(&mut self, factory: Arc<dyn ConnectorFactory>) {
        let tag = factory.type_tag().to_ascii_lowercase();
        debug!(tag = %tag, dialect = %factory.dialect(), "Registering connector");
        self.factories.insert(tag, factory);
    }

    /// Looks up the factory for `tag`, case-insensitively.
    ///
    /// # Errors
    /// Returns [`DataGateError::UnknownConnectorType`] if nothing is
    /// registered under `tag`
    pub fn get(&self, tag: &str) -> Result<Arc<dyn ConnectorFactory>> {
        self.factories
            .get(&tag.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| DataGateError::unknown_connector(tag))
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Creates an unconnected client for `data_source` through its factory.
    ///
    /// # Errors
    /// Returns error if the type is unregistered or the factory rejects the
    /// data source
    pub async fn create_client(&self, data_source: &DataSource) -> Result<Box<dyn ConnectorClient>> {
        self.get(data_source.source_type.tag())?
            .create_client(data_source)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ConnectionTestResult, DataSourceType, Dialect, QueryOptions, QueryResult, SchemaRequest,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubClient;

    #[async_trait]
    impl ConnectorClient for StubClient {
        fn dialect(&self) -> Dialect {
            Dialect::PostgreSql
        }

        async fn test_connection(&self) -> ConnectionTestResult {
            ConnectionTestResult::success(Duration::ZERO)
        }

        async fn get_schema(&self, _request: &SchemaRequest) -> Result<String> {
            Ok(String::new())
        }

        async fn get_allowed_tables(&self, _candidates: Option<&[String]>) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn execute_query(&self, _sql: &str, _options: &QueryOptions) -> Result<QueryResult> {
            Ok(QueryResult::new(Vec::new(), Vec::new()))
        }

        async fn disconnect(&self) {}
    }

    struct StubFactory;

    #[async_trait]
    impl ConnectorFactory for StubFactory {
        fn type_tag(&self) -> &str {
            "Postgres"
        }

        fn dialect(&self) -> Dialect {
            Dialect::PostgreSql
        }

        async fn create_client(&self, _data_source: &DataSource) -> Result<Box<dyn ConnectorClient>> {
            Ok(Box::new(StubClient))
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(StubFactory));

        assert_eq!(registry.tags(), vec!["postgres"]);
        assert!(registry.get("POSTGRES").is_ok());

        let client = registry
            .create_client(&DataSource::new(DataSourceType::Postgres))
            .await
            .unwrap();
        assert!(client.test_connection().await.ok);
    }

    #[test]
    fn test_unknown_tag() {
        let registry = ConnectorRegistry::new();
        let Err(err) = registry.get("oracle") else {
            panic!("unregistered tag resolved");
        };
        assert!(matches!(err, DataGateError::UnknownConnectorType { ref tag } if tag == "oracle"));
        assert_eq!(err.to_string(), "Unknown connector type: oracle");
    }

    #[test]
    fn test_defaults_cover_enabled_dialects() {
        let registry = ConnectorRegistry::with_defaults(ConnectorContext::default());
        #[cfg(feature = "sqlite")]
        assert_eq!(registry.get("sqlite").unwrap().dialect(), Dialect::Sqlite);
        #[cfg(feature = "csv")]
        assert_eq!(registry.get("csv").unwrap().dialect(), Dialect::Sqlite);
        #[cfg(feature = "postgresql")]
        assert_eq!(registry.get("postgres").unwrap().dialect(), Dialect::PostgreSql);
        #[cfg(feature = "mysql")]
        assert_eq!(registry.get("mysql").unwrap().type_tag(), "mysql");
    }
}
