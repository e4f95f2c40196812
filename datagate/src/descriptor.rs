//! Data-source resolution from a JSON descriptor or command-line flags.

use crate::cli::{SourceArgs, SourceTypeArg};
use anyhow::{Context, Result, bail};
use datagate_core::{DataSource, DataSourceType};
use serde_json::{Value, json};
use std::path::Path;

/// Builds the data source selected by `args`.
///
/// # Errors
/// Returns error if the descriptor cannot be read or parsed, or if neither a
/// descriptor nor a source type was given
pub fn resolve(args: &SourceArgs) -> Result<DataSource> {
    if let Some(path) = &args.source {
        return load_descriptor(path);
    }

    let Some(source_type) = args.source_type else {
        bail!("A data source is required: pass --source <file> or --type <kind>");
    };
    from_flags(source_type, args)
}

/// Reads a descriptor file; a missing `id` is filled with a fresh one.
///
/// # Errors
/// Returns error if the file is unreadable or not a valid descriptor
pub fn load_descriptor(path: &Path) -> Result<DataSource> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
    parse_descriptor(&text).with_context(|| format!("Invalid descriptor {}", path.display()))
}

/// Parses descriptor JSON.
///
/// # Errors
/// Returns error if the JSON is not an object or does not describe a data
/// source
pub fn parse_descriptor(text: &str) -> Result<DataSource> {
    let mut value: Value = serde_json::from_str(text).context("Descriptor is not valid JSON")?;
    let Some(object) = value.as_object_mut() else {
        bail!("Descriptor must be a JSON object");
    };
    object
        .entry("id")
        .or_insert_with(|| json!(uuid::Uuid::new_v4()));

    Ok(serde_json::from_value(value)?)
}

fn from_flags(source_type: SourceTypeArg, args: &SourceArgs) -> Result<DataSource> {
    let kind = match source_type {
        SourceTypeArg::Postgres => DataSourceType::Postgres,
        SourceTypeArg::Mysql => DataSourceType::MySql,
        SourceTypeArg::Sqlite => DataSourceType::Sqlite,
        SourceTypeArg::Csv => DataSourceType::Csv,
    };
    let mut source = DataSource::new(kind);

    if kind == DataSourceType::Csv {
        let Some(file) = &args.file else {
            bail!("--file is required for csv sources");
        };
        let mut metadata = json!({
            "storage": "filesystem",
            "path": file,
            "file_name": file.file_name().map(|n| n.to_string_lossy().into_owned()),
        });
        if let Some(delimiter) = &args.delimiter {
            metadata["delimiter"] = json!(delimiter);
        }
        if let Some(table) = &args.table {
            metadata["table_name"] = json!(table);
        }
        return Ok(source.with_metadata(metadata));
    }

    if let Some(host) = &args.host {
        source = source.with_host(host.clone(), args.port);
    }
    if let Some(database) = &args.database {
        source = source.with_database(database.clone());
    }
    if let Some(username) = &args.username {
        source = source.with_username(username.clone());
    }
    Ok(source)
}
