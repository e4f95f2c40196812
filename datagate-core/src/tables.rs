//! Case-insensitive table allowlists.
//!
//! Postgres-style sources resolve a bare table name against a default schema
//! (`public`), so `orders` and `public.orders` denote the same table there.
//! Dialects without a default schema compare names as written.

use std::collections::HashSet;

/// Set of table names a query may touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: HashSet<String>,
    default_schema: Option<String>,
}

impl AllowList {
    /// Builds an allowlist from qualified or bare table names.
    pub fn new<I, S>(tables: I, default_schema: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let default_schema = default_schema.map(str::to_lowercase);
        let mut entries = HashSet::new();

        for table in tables {
            let name = table.as_ref().trim().to_lowercase();
            if name.is_empty() {
                continue;
            }
            if let Some(schema) = default_schema.as_deref().filter(|_| !name.contains('.')) {
                entries.insert(format!("{}.{}", schema, name));
            }
            entries.insert(name);
        }

        Self {
            entries,
            default_schema,
        }
    }

    /// True when `name` (qualified or bare, unquoted) is allowed.
    pub fn contains(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if self.entries.contains(&name) {
            return true;
        }
        match self.default_schema.as_deref() {
            Some(schema) if !name.contains('.') => {
                self.entries.contains(&format!("{}.{}", schema, name))
            }
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keeps the compact schema lines whose table portion is allowed.
    ///
    /// A line is `<table path>.<column> <type>`; everything before the last
    /// `.` of the path is the table (possibly `schema.table`).
    pub fn filter_schema(&self, schema_text: &str) -> String {
        schema_text
            .lines()
            .filter(|line| table_of_line(line).is_some_and(|table| self.contains(table)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Table portion of one compact schema line.
pub(crate) fn table_of_line(line: &str) -> Option<&str> {
    let line = line.trim();
    let (path, _ty) = line.rsplit_once(' ')?;
    let (table, _column) = path.trim_end().rsplit_once('.')?;
    (!table.is_empty()).then_some(table)
}

/// Case-insensitive intersection of visible tables with requested ones.
///
/// Returns `available` unchanged (in order) when no candidates are given.
/// Casing of the returned names follows the database.
pub fn intersect_tables(
    available: Vec<String>,
    candidates: Option<&[String]>,
    default_schema: Option<&str>,
) -> Vec<String> {
    match candidates {
        None => available,
        Some(candidates) => {
            let allow = AllowList::new(candidates, default_schema);
            available
                .into_iter()
                .filter(|table| allow.contains(table))
                .collect()
        }
    }
}
