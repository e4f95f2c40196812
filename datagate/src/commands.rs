//! Command handlers.
//!
//! Handlers write their result to the given writer (JSON for structured
//! results) and log progress through `tracing` on stderr, so stdout stays
//! machine-readable.

use crate::cli::{
    Cli, Command, EncryptArgs, QueryArgs, SchemaArgs, SettingsArgs, TablesArgs, ValidateArgs,
};
use crate::descriptor;
use anyhow::{Context, Result, bail};
use datagate_core::{
    ConnectorContext, ConnectorRegistry, DataSource, Dialect, GuardedQuery, Guardrail,
    QueryRequest, Settings, Vault, redact_database_url,
};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::info;
use zeroize::Zeroizing;

/// Runs the parsed command.
///
/// # Errors
/// Returns error if settings are invalid or the command fails
pub async fn execute(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let settings = settings_from(&cli.settings)?;

    match &cli.command {
        Command::Validate(args) => validate(args, &settings, out),
        Command::Test(args) => {
            let source = descriptor::resolve(args)?;
            let result = service(&settings).test_connection(&source).await?;
            if result.ok {
                info!("Connection test successful");
            }
            write_json(out, &result)
        }
        Command::Tables(args) => tables(args, &settings, out).await,
        Command::Schema(args) => schema(args, &settings, out).await,
        Command::Query(args) => query(args, &settings, out).await,
        Command::Encrypt(args) => {
            let secret = read_secret(args)?;
            encrypt_secret(&secret, out)
        }
    }
}

/// Applies command-line overrides to default settings and validates them.
///
/// # Errors
/// Returns error if the resulting settings are invalid
pub fn settings_from(args: &SettingsArgs) -> Result<Settings> {
    let mut settings = Settings::default();
    if let Some(url) = &args.database_url {
        settings = settings.with_default_database_url(url.clone());
    }
    if let Some(max_rows) = args.max_rows {
        settings = settings.with_max_rows(max_rows);
    }
    if let Some(ms) = args.timeout_ms {
        settings = settings.with_query_timeout(Duration::from_millis(ms));
    }
    if let Some(secs) = args.cache_ttl_secs {
        settings = settings.with_schema_cache_ttl(Duration::from_secs(secs));
    }
    if let Some(secs) = args.connect_timeout_secs {
        settings = settings.with_connect_timeout(Duration::from_secs(secs));
    }

    settings.validate()?;
    if let Some(url) = &settings.default_database_url {
        info!("Default database: {}", redact_database_url(url));
    }
    Ok(settings)
}

fn service(settings: &Settings) -> GuardedQuery {
    let context = ConnectorContext::new(settings.clone());
    GuardedQuery::new(ConnectorRegistry::with_defaults(context))
}

fn validate(args: &ValidateArgs, settings: &Settings, out: &mut dyn Write) -> Result<()> {
    let dialect = Dialect::from(args.dialect);
    let bounded = Guardrail::for_dialect(dialect, settings.max_rows).prepare(&args.sql, &args.allow)?;
    writeln!(out, "{}", bounded)?;
    Ok(())
}

async fn tables(args: &TablesArgs, settings: &Settings, out: &mut dyn Write) -> Result<()> {
    let source = descriptor::resolve(&args.source)?;
    let tables = service(settings)
        .allowed_tables(&source, args.monitored.as_deref())
        .await
        .with_context(|| describe_failure("list tables of", &source))?;
    write_json(out, &tables)
}

async fn schema(args: &SchemaArgs, settings: &Settings, out: &mut dyn Write) -> Result<()> {
    let source = descriptor::resolve(&args.source)?;
    let description = service(settings)
        .describe_schema(&source, args.monitored.as_deref())
        .await
        .with_context(|| describe_failure("read the schema of", &source))?;

    if args.parsed {
        write_json(out, &description.tables)
    } else {
        writeln!(out, "{}", description.text)?;
        Ok(())
    }
}

async fn query(args: &QueryArgs, settings: &Settings, out: &mut dyn Write) -> Result<()> {
    let source = descriptor::resolve(&args.source)?;
    let mut request = QueryRequest::from_settings(settings);
    if let Some(monitored) = &args.monitored {
        request = request.with_monitored_tables(monitored.clone());
    }

    let result = service(settings).run(&source, &args.sql, &request).await?;
    info!("Returned {} rows", result.row_count);
    write_json(out, &result)
}

/// Encrypts `secret` with the vault key from the environment and prints the
/// three storage columns.
///
/// # Errors
/// Returns error if the vault key is missing or invalid
pub fn encrypt_secret(secret: &str, out: &mut dyn Write) -> Result<()> {
    if secret.is_empty() {
        bail!("Secret cannot be empty");
    }
    let payload = Vault::from_env()?.encrypt(secret)?;
    write_json(out, &payload)
}

fn read_secret(args: &EncryptArgs) -> Result<Zeroizing<String>> {
    let secret = Zeroizing::new(if args.stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read secret from stdin")?;
        line.trim_end_matches(['\r', '\n']).to_string()
    } else {
        rpassword::prompt_password("Secret to encrypt: ").context("Failed to read secret")?
    });
    Ok(secret)
}

fn describe_failure(action: &str, source: &DataSource) -> String {
    format!("Failed to {} {} data source {}", action, source.source_type, source.id)
}

fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
