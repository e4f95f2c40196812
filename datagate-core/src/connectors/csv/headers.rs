//! Header and table-name normalization for uploaded files.

use std::collections::HashSet;

/// Lower-cases `raw`, collapses each run of non-alphanumeric characters to
/// `_`, and trims `_` from both ends. Returns `None` when nothing remains.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if out.is_empty() { None } else { Some(out) }
}

/// Builds `width` unique column names from a raw header row.
///
/// Empty headers, and positions past the end of the header row, become
/// `column_N` (1-based). Repeats get a `_2`, `_3`, ... suffix.
pub fn normalize_headers(raw: &[String], width: usize) -> Vec<String> {
    let width = width.max(raw.len());
    let mut seen = HashSet::with_capacity(width);
    let mut names = Vec::with_capacity(width);

    for position in 0..width {
        let base = raw
            .get(position)
            .and_then(|h| normalize_identifier(h))
            .unwrap_or_else(|| format!("column_{}", position.saturating_add(1)));

        let mut name = base.clone();
        let mut suffix: usize = 2;
        while !seen.insert(name.clone()) {
            name = format!("{}_{}", base, suffix);
            suffix = suffix.saturating_add(1);
        }
        names.push(name);
    }

    names
}

/// Table name for an upload: the configured name, else the file name without
/// its extension, else `data`.
pub fn table_name(configured: Option<&str>, file_name: Option<&str>) -> String {
    configured
        .and_then(normalize_identifier)
        .or_else(|| {
            file_name
                .map(|f| f.rsplit(['/', '\\']).next().unwrap_or(f))
                .map(|f| f.rsplit_once('.').map_or(f, |(stem, _)| stem))
                .and_then(normalize_identifier)
        })
        .unwrap_or_else(|| "data".to_string())
}

/// Double-quotes an identifier for SQLite.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(headers: &[&str]) -> Vec<String> {
        headers.iter().map(|h| (*h).to_string()).collect()
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("Order ID").as_deref(), Some("order_id"));
        assert_eq!(normalize_identifier("  Amount ($) ").as_deref(), Some("amount"));
        assert_eq!(normalize_identifier("__a--b__").as_deref(), Some("a_b"));
        assert_eq!(normalize_identifier("2024 Sales").as_deref(), Some("2024_sales"));
        assert_eq!(normalize_identifier("%%%"), None);
        assert_eq!(normalize_identifier(""), None);
    }

    #[test]
    fn test_duplicate_headers_get_suffixes() {
        let names = normalize_headers(&owned(&["Name", "name", "NAME!"]), 3);
        assert_eq!(names, vec!["name", "name_2", "name_3"]);
    }

    #[test]
    fn test_empty_and_missing_headers() {
        let names = normalize_headers(&owned(&["id", "", "  "]), 5);
        assert_eq!(
            names,
            vec!["id", "column_2", "column_3", "column_4", "column_5"]
        );
    }

    #[test]
    fn test_generated_name_collision() {
        let names = normalize_headers(&owned(&["column_2", ""]), 2);
        assert_eq!(names, vec!["column_2", "column_2_2"]);
    }

    #[test]
    fn test_table_name_sources() {
        assert_eq!(table_name(Some("Sales Data"), Some("x.csv")), "sales_data");
        assert_eq!(table_name(None, Some("uploads/Q1 Report.csv")), "q1_report");
        assert_eq!(table_name(Some("!!!"), None), "data");
        assert_eq!(table_name(None, None), "data");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("sales_data"), "\"sales_data\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
