//! # bqhelper
//!
//! Google BigQuery 操作のヘルパーライブラリ
//!
//! プロジェクトと認証情報に束縛された [`BigQueryHelper`] が、クエリ実行・
//! ストリーミング挿入・テーブルアップロード・一括カラム更新・スキーマ取得を
//! 提供します。各操作は単一のブロッキング呼び出しで完結し、リトライや
//! キャッシュ、コネクションプーリングは行いません。
//!
//! ## Quick Start
//!
//! ```no_run
//! use bqhelper::{BigQueryHelper, Credentials};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let helper = BigQueryHelper::new(
//!         "my-project",
//!         Credentials::file("~/keys/service-account.json"),
//!     )
//!     .await?;
//!
//!     let result = helper
//!         .query_to_table("SELECT name, state FROM `my-project.ds.users`")
//!         .await?;
//!     for row in result.rows() {
//!         println!("{:?}", row);
//!     }
//!     Ok(())
//! }
//! ```

// coverage_nightly cfg が設定されている場合のみ coverage_attribute を有効化
// カバレッジ計測時に外部サービス依存コードを除外するために使用
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
pub mod credentials;
pub mod data;
pub mod error;
pub mod helper;
pub mod schema;
pub mod sql;
pub mod table_ref;

pub use api::{ApiError, ApiResult, BigQueryApi, QueryOutput, RealBigQueryApi, RowError};
pub use credentials::Credentials;
pub use data::DataTable;
pub use error::{Error, Result};
pub use helper::{BigQueryHelper, IfExists, INSERT_BATCH_SIZE};
pub use schema::{Field, FieldMode, FieldType, TableSchema};
pub use table_ref::TableId;
