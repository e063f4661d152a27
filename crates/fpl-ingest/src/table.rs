//! Tabular row sets and fetched endpoint payloads

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IngestError, Result};

/// One row: column name to JSON value, in source order
pub type Row = Map<String, Value>;

/// A named, ordered row set derived from one endpoint payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of the column names of every row, in first-seen order
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }

    /// Keep only the rows matching `predicate`
    pub fn filter<P>(&self, mut predicate: P) -> Table
    where
        P: FnMut(&Row) -> bool,
    {
        let rows = self.rows.iter().filter(|row| predicate(row)).cloned().collect();
        Table::new(self.name.clone(), rows)
    }

    /// Project every row onto `columns`; absent columns become `null`
    pub fn select(&self, columns: &[&str]) -> Table {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.to_string(), row.get(*c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();
        Table::new(self.name.clone(), rows)
    }

    /// Integer values of `column`, skipping rows where it is absent or not an integer
    pub fn integer_column(&self, column: &str) -> Vec<u64> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::as_u64))
            .collect()
    }
}

/// Raw result of fetching one endpoint: named sub-collections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    collections: Map<String, Value>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a decoded JSON document; it must be an object of sub-collections
    pub fn from_document(endpoint: &str, document: Value) -> Result<Self> {
        match document {
            Value::Object(collections) => Ok(Self { collections }),
            other => Err(IngestError::fetch_failed(
                endpoint,
                format!("expected a JSON object, got {}", json_type(&other)),
            )),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.collections.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.collections.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}

/// Interpret a sub-collection as rows
///
/// Arrays give one row per element (non-object elements land in a `value`
/// column); an object is a single row; scalars are rejected.
pub fn value_to_rows(name: &str, value: &Value) -> Result<Vec<Row>> {
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .map(|item| match item {
                Value::Object(row) => row.clone(),
                other => {
                    let mut row = Row::new();
                    row.insert("value".to_string(), other.clone());
                    row
                },
            })
            .collect()),
        Value::Object(row) => Ok(vec![row.clone()]),
        _ => Err(IngestError::NotTabular(name.to_string())),
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
