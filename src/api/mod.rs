//! BigQuery API Boundary
//!
//! SDK呼び出しの抽象化（テストではモック実装を差し替え）

pub mod decode;
pub mod gcp;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use thiserror::Error;

use crate::schema::TableSchema;
use crate::table_ref::TableId;

pub use gcp::RealBigQueryApi;

/// Failures at the SDK boundary, before they are classified into the
/// public error taxonomy. `NotFound` is split out because callers
/// branch on it.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// One completed query job, fully drained.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    /// Projection schema of the result. Empty for statements that
    /// return no rows.
    pub schema: TableSchema,
    /// Decoded result rows, in column order.
    pub rows: Vec<Vec<Value>>,
    /// Rows affected, reported for DML statements only.
    pub affected_rows: Option<u64>,
}

/// One row rejected by a streaming insert. The request as a whole
/// succeeded; this row did not land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Zero-based index into the submitted row slice.
    pub index: usize,
    /// Reasons reported by the service.
    pub messages: Vec<String>,
}

/// The SDK calls the helper needs, behind one seam so tests can mock
/// the service and alternative transports stay possible.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BigQueryApi: Send + Sync {
    /// Runs a statement to completion and materializes every result
    /// page.
    async fn run_query(
        &self,
        project_id: &str,
        sql: &str,
        location: Option<String>,
    ) -> ApiResult<QueryOutput>;

    /// Streaming insert of JSON rows. Per-row rejections come back as
    /// data, a failed request as an error.
    async fn insert_all(&self, table: &TableId, rows: Vec<Value>) -> ApiResult<Vec<RowError>>;

    /// Fetches the table's current schema.
    async fn get_table_schema(&self, table: &TableId) -> ApiResult<TableSchema>;

    /// Creates a table with the given schema.
    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> ApiResult<()>;

    /// Deletes a table.
    async fn delete_table(&self, table: &TableId) -> ApiResult<()>;
}
