//! Table References
//!
//! テーブル参照文字列の解析

use std::fmt;

use anyhow::bail;

/// A fully qualified table address.
///
/// Built from a `dataset.table` or `project.dataset.table` string; the
/// two-part form borrows the project the helper is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableId {
    /// Creates a table id from its three components.
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// Parses a table reference, filling in `default_project` when the
    /// reference carries only `dataset.table`.
    pub fn parse(reference: &str, default_project: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = reference.split('.').collect();
        let id = match parts.as_slice() {
            [dataset, table] => Self::new(default_project, *dataset, *table),
            [project, dataset, table] => Self::new(*project, *dataset, *table),
            _ => bail!(
                "invalid table reference '{reference}': expected dataset.table or project.dataset.table"
            ),
        };
        if id.project_id.is_empty() || id.dataset_id.is_empty() || id.table_id.is_empty() {
            bail!("invalid table reference '{reference}': empty component");
        }
        Ok(id)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}
