//! Command-line definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use datagate_core::Dialect;
use datagate_core::settings::{
    CONNECT_TIMEOUT_ENV, DEFAULT_DATABASE_URL_ENV, MAX_ROWS_ENV, QUERY_TIMEOUT_ENV,
    SCHEMA_CACHE_TTL_ENV,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "datagate")]
#[command(about = "Guarded read-only SQL over user data sources")]
#[command(version)]
#[command(long_about = "
DataGate - guarded read-only SQL over user data sources

Candidate SQL only reaches a database after it passes the guardrail:
- A single SELECT or WITH statement
- No DML, DDL, or session commands
- Every FROM/JOIN target in the data source's allowlist
- A row limit and a statement timeout on every execution

DATA SOURCES:
- PostgreSQL, MySQL, and SQLite databases
- Uploaded CSV files, materialized into a private in-memory database

A data source is described by a JSON descriptor (--source) or by flags.
Stored credentials in a descriptor are AES-256-GCM encrypted; produce them
with `datagate encrypt` using DATAGATE_ENCRYPTION_KEY.

EXAMPLES:
  datagate validate --sql 'SELECT * FROM orders' --allow public.orders
  datagate schema --type sqlite --database ./sales.db --parsed
  datagate query --type csv --file ./sales_data.csv --sql 'SELECT SUM(amount) FROM sales_data'
  datagate query --source ./warehouse.json --monitored orders --sql 'SELECT * FROM orders'
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check SQL against an allowlist without connecting
    Validate(ValidateArgs),
    /// Test connectivity of a data source
    Test(SourceArgs),
    /// List tables visible to a data source
    Tables(TablesArgs),
    /// Print the compact schema of a data source
    Schema(SchemaArgs),
    /// Run guarded SQL against a data source
    Query(QueryArgs),
    /// Encrypt a secret for a data-source descriptor
    Encrypt(EncryptArgs),
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all logging except errors")]
    pub quiet: bool,
}

/// Tunables mirrored from the `DATAGATE_*` environment.
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Fallback database URL
    #[arg(
        long,
        global = true,
        env = DEFAULT_DATABASE_URL_ENV,
        hide_env_values = true,
        help = "Connection URL for sources without stored credentials (redacted in logs)"
    )]
    pub database_url: Option<String>,

    /// Row cap
    #[arg(long, global = true, env = MAX_ROWS_ENV, help = "Maximum rows a query may return")]
    pub max_rows: Option<usize>,

    /// Statement timeout
    #[arg(long, global = true, env = QUERY_TIMEOUT_ENV, help = "Statement timeout in milliseconds")]
    pub timeout_ms: Option<u64>,

    /// Schema cache TTL
    #[arg(long, global = true, env = SCHEMA_CACHE_TTL_ENV, help = "Schema cache TTL in seconds")]
    pub cache_ttl_secs: Option<u64>,

    /// Connect timeout
    #[arg(long, global = true, env = CONNECT_TIMEOUT_ENV, help = "Connection timeout in seconds")]
    pub connect_timeout_secs: Option<u64>,
}

/// SQL dialect selector for offline validation.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialectArg {
    Postgresql,
    Mysql,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Postgresql => Self::PostgreSql,
            DialectArg::Mysql => Self::MySql,
            DialectArg::Sqlite => Self::Sqlite,
        }
    }
}

/// Data-source type selector for flag-built sources.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceTypeArg {
    Postgres,
    Mysql,
    Sqlite,
    Csv,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// SQL to check
    #[arg(long, help = "Candidate SQL")]
    pub sql: String,

    /// Allowed tables
    #[arg(long, value_delimiter = ',', help = "Comma-separated allowlist")]
    pub allow: Vec<String>,

    /// Dialect
    #[arg(long, value_enum, default_value = "postgresql", help = "Dialect for bare-name resolution")]
    pub dialect: DialectArg,
}

/// How to find the data source: a descriptor file, or flags.
#[derive(Args, Debug, Default)]
pub struct SourceArgs {
    /// Descriptor file
    #[arg(long, help = "JSON data-source descriptor", conflicts_with = "source_type")]
    pub source: Option<PathBuf>,

    /// Source type
    #[arg(long = "type", value_enum, help = "Data-source type when building from flags")]
    pub source_type: Option<SourceTypeArg>,

    #[arg(long, help = "Database host")]
    pub host: Option<String>,

    #[arg(long, help = "Database port")]
    pub port: Option<u16>,

    /// Database name, or file path for SQLite
    #[arg(long, help = "Database name (SQLite: file path)")]
    pub database: Option<String>,

    #[arg(long, help = "Database user")]
    pub username: Option<String>,

    /// CSV file
    #[arg(long, help = "Uploaded file path (csv type)")]
    pub file: Option<PathBuf>,

    /// CSV delimiter
    #[arg(long, help = "Single-character delimiter (csv type)")]
    pub delimiter: Option<String>,

    /// CSV table name
    #[arg(long, help = "Table name for the upload (csv type)")]
    pub table: Option<String>,
}

#[derive(Args, Debug)]
pub struct TablesArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Monitored tables
    #[arg(long, value_delimiter = ',', help = "Restrict to these tables")]
    pub monitored: Option<Vec<String>>,
}

#[derive(Args, Debug)]
pub struct SchemaArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long, value_delimiter = ',', help = "Restrict to these tables")]
    pub monitored: Option<Vec<String>>,

    /// Print parsed JSON instead of compact text
    #[arg(long, help = "Print the parsed table model as JSON")]
    pub parsed: bool,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// SQL to run
    #[arg(long, help = "Candidate SQL")]
    pub sql: String,

    #[arg(long, value_delimiter = ',', help = "Restrict to these tables")]
    pub monitored: Option<Vec<String>>,
}

#[derive(Args, Debug)]
pub struct EncryptArgs {
    /// Read the secret from stdin instead of prompting
    #[arg(long, help = "Read the secret from standard input")]
    pub stdin: bool,
}
