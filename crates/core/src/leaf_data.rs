//! Tabular results produced by leaf runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafDataColumn {
    /// Column name
    pub name: String,

    /// Declared database type, e.g. `TEXT`, `INT8`, `JSONB`
    pub data_type: String,
}

impl LeafDataColumn {
    /// Create a column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    /// Whether the column holds structured JSON.
    pub fn is_json(&self) -> bool {
        self.data_type.eq_ignore_ascii_case("json") || self.data_type.eq_ignore_ascii_case("jsonb")
    }
}

/// The result of a completed leaf run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeafData {
    /// Ordered columns
    pub columns: Vec<LeafDataColumn>,

    /// Ordered rows
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl LeafData {
    /// Create an empty result with the given columns.
    pub fn new(columns: Vec<LeafDataColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row built from `(column, value)` pairs.
    pub fn with_row<K, I>(mut self, cells: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        self.rows
            .push(cells.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&LeafDataColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of the JSON-typed columns.
    pub fn json_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.is_json())
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_columns() {
        let data = LeafData::new(vec![
            LeafDataColumn::new("id", "INT8"),
            LeafDataColumn::new("tags", "jsonb"),
            LeafDataColumn::new("doc", "JSON"),
        ]);
        assert_eq!(data.json_columns(), vec!["tags", "doc"]);
        assert!(data.column("id").is_some());
        assert!(data.column("missing").is_none());
    }

    #[test]
    fn test_deserialize_without_rows() {
        let data: LeafData =
            serde_json::from_value(json!({"columns": [{"name": "a", "data_type": "TEXT"}]})).unwrap();
        assert_eq!(data.columns.len(), 1);
        assert!(data.rows.is_empty());
    }

    #[test]
    fn test_with_row() {
        let data = LeafData::new(vec![LeafDataColumn::new("a", "INT8")])
            .with_row([("a", json!(1))])
            .with_row([("a", json!(2))]);
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.rows[1]["a"], json!(2));
    }
}
