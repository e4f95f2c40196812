//! Core data-access and safety layer for DataGate.
//!
//! This crate sits between a caller holding candidate SQL (typically produced
//! by a language model) and a user-chosen data source. It provides the
//! connectors that reach each SQL dialect, the guardrail that decides whether
//! a statement may run at all, and the vault that keeps stored credentials
//! encrypted until the moment of connecting.
//!
//! # Security Guarantees
//! - Only single read-only `SELECT`/`WITH` statements over allowlisted tables run
//! - Every execution is bounded by a row limit and a statement timeout
//! - Stored credentials are AES-256-GCM encrypted with random nonces
//! - Decrypted secrets are zeroized on drop and never logged
//!
//! # Architecture
//! - Factory pattern: a [`ConnectorRegistry`] maps a data-source type tag to
//!   a [`ConnectorFactory`] producing [`ConnectorClient`] trait objects
//! - Uploaded spreadsheets are materialized into a private in-memory SQLite
//!   database and then queried like any other SQLite source
//! - One error enum with credential sanitization

pub mod cache;
pub mod connectors;
pub mod error;
pub mod guardrail;
pub mod logging;
pub mod models;
pub mod schema;
pub mod security;
pub mod service;
pub mod settings;
pub mod tables;

// Re-export commonly used types
pub use cache::SchemaCache;
pub use connectors::{ConnectorClient, ConnectorContext, ConnectorFactory, ConnectorRegistry};
pub use error::{DataGateError, Result, redact_database_url};
pub use guardrail::{Guardrail, enforce_limit, validate_sql};
pub use models::{
    ConnectionTestResult, CsvMetadata, DataSource, DataSourceType, Dialect, FieldInfo,
    QueryOptions, QueryResult, SchemaRequest, SecretColumns, SourceFormat, StorageMode,
};
pub use schema::{ColumnInfo, TableInfo, parse_schema};
pub use security::{EncryptedPayload, Vault, resolve_connection_url};
pub use service::{GuardedQuery, QueryRequest, SchemaDescription};
pub use settings::Settings;
pub use tables::AllowList;
