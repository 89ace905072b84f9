//! Tabular Data
//!
//! クエリ結果とアップロード入力の表形式データ

use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column-ordered tabular data.
///
/// Every row has one value per column, in column order. This is the
/// result shape of a query and the input shape of a table upload.
/// Every construction path checks that invariant, deserialization
/// included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataTable")]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// The serialized shape, before the row-arity check.
#[derive(Deserialize)]
struct RawDataTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawDataTable> for DataTable {
    type Error = anyhow::Error;

    fn try_from(raw: RawDataTable) -> anyhow::Result<Self> {
        Self::from_parts(raw.columns, raw.rows)
    }
}

impl DataTable {
    /// Creates an empty table with the given column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Creates a table from pre-built parts. Every row must match the
    /// column count.
    pub fn from_parts(columns: Vec<String>, rows: Vec<Vec<Value>>) -> anyhow::Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                bail!(
                    "row {} has {} values but the table has {} columns",
                    i,
                    row.len(),
                    columns.len()
                );
            }
        }
        Ok(Self { columns, rows })
    }

    /// Builds a table from JSON objects. Columns are the union of all
    /// keys in first-appearance order; missing keys become null.
    pub fn from_objects(objects: &[Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for object in objects {
            for key in object.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = objects
            .iter()
            .map(|object| {
                columns
                    .iter()
                    .map(|c| object.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Appends a row. Fails when the value count does not match the
    /// column count.
    pub fn push_row(&mut self, row: Vec<Value>) -> anyhow::Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "row has {} values but the table has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value at `(row, column)`, by column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Re-materializes each row as a JSON object keyed by column name.
    pub fn to_objects(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}
