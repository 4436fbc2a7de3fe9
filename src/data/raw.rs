//! Untyped tables as fetched or read by an adapter.

use std::collections::HashMap;

/// A raw table: lowercased headers plus string cells (`None` = empty/null).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers: headers.iter().map(|h| normalize_header_name(h)).collect(),
            rows: Vec::new(),
        }
    }

    /// Push a row, padding short rows with nulls and truncating long ones.
    pub fn push_row(&mut self, mut row: Vec<Option<String>>) {
        row.resize(self.headers.len(), None);
        self.rows.push(row);
    }

    pub fn header_map(&self) -> HashMap<&str, usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect()
    }

    /// Requested columns that are absent, in request order.
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        let map = self.header_map();
        required
            .iter()
            .map(|c| normalize_header_name(c))
            .filter(|c| !map.contains_key(c.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Trim, drop a UTF-8 BOM and lowercase a header name.
pub fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

/// Convert a cell to `None` when it is blank.
pub fn cell(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
