//! Error Types
//!
//! 操作カテゴリごとのエラー型定義

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by [`crate::BigQueryHelper`], one variant per
/// operation category. Each variant wraps the underlying failure
/// unchanged; nothing is retried or translated locally.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials were missing, unreadable or rejected when the
    /// helper was constructed.
    #[error("authentication failed: {0}")]
    Authentication(#[source] anyhow::Error),

    /// A query job could not be started or drained.
    #[error("query failed: {0}")]
    Query(#[source] anyhow::Error),

    /// A streaming insert request failed as a whole. Per-row
    /// rejections are not an error; they come back as data.
    #[error("insert failed: {0}")]
    Insert(#[source] anyhow::Error),

    /// A table upload failed: existence policy violated, table
    /// management call failed, or rows were rejected while loading.
    #[error("load failed: {0}")]
    Load(#[source] anyhow::Error),

    /// A batch column update could not be rendered or executed.
    #[error("update failed: {0}")]
    Update(#[source] anyhow::Error),

    /// The referenced table does not exist or the reference itself
    /// does not resolve.
    #[error("table not found: {0}")]
    NotFound(String),
}
