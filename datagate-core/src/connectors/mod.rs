//! Connector traits and factory registry for uniform data-source access.
//!
//! Every supported store (PostgreSQL, MySQL, SQLite, and uploaded
//! spreadsheets) is reached through the same [`ConnectorClient`] contract, so
//! the guardrail and callers never need to know which dialect they talk to.
//! Only the connector knows how to quote identifiers and read its catalog.
//!
//! # Module Structure
//! - `registry`: type tag to factory lookup
//! - `helpers`: connection slot, error classification, schema caching
//! - Dialect modules (postgres, mysql, sqlite, csv), each feature-gated
//!
//! # Object Safety
//! Both traits are object-safe; clients are handed out as
//! `Box<dyn ConnectorClient>` and factories are stored as
//! `Arc<dyn ConnectorFactory>`.

use crate::cache::SchemaCache;
use crate::models::{
    ConnectionTestResult, DataSource, Dialect, QueryOptions, QueryResult, SchemaRequest,
};
use crate::security::Vault;
use crate::settings::Settings;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod helpers;
pub mod registry;

#[cfg(feature = "postgresql")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "csv")]
pub mod csv;

pub use registry::ConnectorRegistry;

/// A client bound to one data source.
///
/// Relational clients hold at most one live connection, opened lazily on
/// first use. Use one client per logical request and always finish with
/// [`ConnectorClient::disconnect`].
///
/// # Security Guarantees
/// - Queries run inside read-only transactions bounded by a timeout
/// - Credentials are decrypted only while connecting and never logged
#[async_trait]
pub trait ConnectorClient: Send + Sync {
    /// SQL dialect this client speaks.
    fn dialect(&self) -> Dialect;

    /// Probes connectivity. Failures are reported in the result, never raised.
    async fn test_connection(&self) -> ConnectionTestResult;

    /// Returns compact schema text, one `<table>.<column> <type>` line per
    /// column.
    ///
    /// The unfiltered text is cached under `request.cache_key`; the
    /// allowlist filter is applied after the cache.
    ///
    /// # Errors
    /// Returns error if connecting or the catalog query fails
    async fn get_schema(&self, request: &SchemaRequest) -> Result<String>;

    /// Lists tables visible to the connection, intersected
    /// case-insensitively with `candidates` when given.
    ///
    /// # Errors
    /// Returns error if connecting or the catalog query fails
    async fn get_allowed_tables(&self, candidates: Option<&[String]>) -> Result<Vec<String>>;

    /// Runs `sql` in a read-only transaction bounded by `options.timeout`.
    ///
    /// This does not validate `sql`; callers pass it through the guardrail
    /// first (see [`crate::service::GuardedQuery`]).
    ///
    /// # Errors
    /// Returns [`crate::DataGateError::Timeout`] when the deadline is
    /// exceeded and [`crate::DataGateError::QueryExecution`] for any other
    /// statement failure.
    async fn execute_query(&self, sql: &str, options: &QueryOptions) -> Result<QueryResult>;

    /// Releases the connection. Idempotent; close errors are swallowed.
    async fn disconnect(&self);
}

/// Creates clients for one data-source type.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    /// Registry key, matching [`crate::models::DataSourceType::tag`].
    fn type_tag(&self) -> &str;

    /// SQL dialect of the clients this factory creates.
    fn dialect(&self) -> Dialect;

    /// Creates an unconnected client for `data_source`.
    ///
    /// # Errors
    /// Returns error if the data source is not of this factory's type or its
    /// descriptor is invalid
    async fn create_client(&self, data_source: &DataSource) -> Result<Box<dyn ConnectorClient>>;
}

/// Shared collaborators handed to every factory.
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    pub settings: Settings,
    pub cache: Arc<SchemaCache>,
    /// Injected vault; `None` uses [`Vault::global`] when a secret is needed
    pub vault: Option<Arc<Vault>>,
}

impl ConnectorContext {
    /// Context using the process-wide schema cache and vault.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            cache: SchemaCache::global(),
            vault: None,
        }
    }

    /// Builder method to inject a schema cache.
    pub fn with_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Builder method to inject a vault.
    pub fn with_vault(mut self, vault: Arc<Vault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Resolves the connection URL of `data_source` at connect time.
    pub(crate) fn connection_url(
        &self,
        data_source: &DataSource,
    ) -> Result<zeroize::Zeroizing<String>> {
        crate::security::resolve_connection_url(
            data_source,
            self.vault.as_deref(),
            self.settings.default_database_url.as_deref(),
        )
    }
}

impl Default for ConnectorContext {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
