//! BigQuery Helper Facade
//!
//! BigQuery操作のファサード

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::api::{ApiError, BigQueryApi, RealBigQueryApi, RowError};
use crate::credentials::Credentials;
use crate::data::DataTable;
use crate::error::{Error, Result};
use crate::schema::{conform_to_schema, infer_schema, Field, FieldType, TableSchema};
use crate::sql::build_update_statement;
use crate::table_ref::TableId;

/// Rows per streaming insert request. Larger inputs are split into
/// consecutive requests of this size.
pub const INSERT_BATCH_SIZE: usize = 500;

/// What to do when an upload targets a table that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IfExists {
    /// Error out and leave the existing table untouched.
    Fail,
    /// Delete the table and recreate it with the upload's schema.
    Replace,
    /// Add rows to the existing table, creating it when missing.
    #[default]
    Append,
}

impl FromStr for IfExists {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            other => Err(anyhow!("unknown if_exists policy '{other}'")),
        }
    }
}

impl fmt::Display for IfExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fail => "fail",
            Self::Replace => "replace",
            Self::Append => "append",
        };
        f.write_str(s)
    }
}

/// A stateful BigQuery facade bound to one project and one set of
/// credentials.
///
/// Every operation is a single blocking exchange with the service:
/// when a call returns, the work is done or has failed. Nothing is
/// retried, cached or pooled here; transient faults surface to the
/// caller unchanged.
///
/// Table references are `dataset.table` or `project.dataset.table`;
/// the two-part form uses the bound project.
pub struct BigQueryHelper {
    project_id: String,
    location: Option<String>,
    api: Arc<dyn BigQueryApi>,
}

impl BigQueryHelper {
    /// Authenticates and binds the helper to `project_id`.
    ///
    /// Fails with [`Error::Authentication`] when the credentials are
    /// missing, unreadable or rejected.
    pub async fn new(project_id: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let project_id = project_id.into();
        if project_id.is_empty() {
            return Err(Error::Authentication(anyhow!("project id must not be empty")));
        }
        let api = RealBigQueryApi::connect(&credentials)
            .await
            .map_err(Error::Authentication)?;
        info!("BigQuery helper initialized for project {}", project_id);
        Ok(Self {
            project_id,
            location: None,
            api: Arc::new(api),
        })
    }

    /// Shorthand for [`BigQueryHelper::new`] with ambient credentials.
    pub async fn with_application_default(project_id: impl Into<String>) -> Result<Self> {
        Self::new(project_id, Credentials::ApplicationDefault).await
    }

    /// Builds a helper over a custom API implementation. This is the
    /// seam tests use; alternative transports can use it too.
    pub fn with_api(project_id: impl Into<String>, api: Arc<dyn BigQueryApi>) -> Self {
        Self {
            project_id: project_id.into(),
            location: None,
            api,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Rebinds the helper to another project. Credentials and the
    /// underlying client are kept.
    pub fn set_project_id(&mut self, project_id: impl Into<String>) {
        self.project_id = project_id.into();
        info!("Project ID updated to {}", self.project_id);
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Sets the job location for subsequent queries (for example
    /// "EU"). Unset, the service picks the location itself.
    pub fn set_location(&mut self, location: Option<String>) {
        self.location = location;
    }

    /// Runs a standard SQL query and materializes the full result.
    ///
    /// The query text goes to the service verbatim. The call blocks
    /// until the job completes and every result page has been
    /// fetched. Fails with [`Error::Query`].
    pub async fn query_to_table(&self, query: &str) -> Result<DataTable> {
        let output = self
            .api
            .run_query(&self.project_id, query, self.location.clone())
            .await
            .map_err(|e| Error::Query(e.into()))?;
        let columns = output
            .schema
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let table = DataTable::from_parts(columns, output.rows).map_err(Error::Query)?;
        info!("Query returned {} rows", table.len());
        Ok(table)
    }

    /// Runs a statement for its side effects and returns the affected
    /// row count, when the service reports one.
    ///
    /// Fails with [`Error::Query`].
    pub async fn run_query(&self, query: &str) -> Result<Option<u64>> {
        let output = self
            .api
            .run_query(&self.project_id, query, self.location.clone())
            .await
            .map_err(|e| Error::Query(e.into()))?;
        match output.affected_rows {
            Some(n) => info!("Query executed successfully, {} rows affected", n),
            None => info!("Query executed successfully"),
        }
        Ok(output.affected_rows)
    }

    /// Streams rows into an existing table.
    ///
    /// Rows rejected by the service come back as data, indexed into
    /// `rows`; accepted rows of the same call have still landed.
    /// [`Error::Insert`] is only for requests that failed as a whole.
    /// An empty `rows` returns without calling the service.
    pub async fn insert_rows<T>(&self, table: &str, rows: &[T]) -> Result<Vec<RowError>>
    where
        T: Serialize + Sync,
    {
        if rows.is_empty() {
            info!("No rows to insert into {}", table);
            return Ok(Vec::new());
        }
        let table_id = TableId::parse(table, &self.project_id).map_err(Error::Insert)?;

        let mut payload = Vec::with_capacity(rows.len());
        for row in rows {
            let value = serde_json::to_value(row)
                .map_err(|e| Error::Insert(anyhow!(e).context("row is not serializable")))?;
            payload.push(value);
        }

        let mut failures = Vec::new();
        for (batch, chunk) in payload.chunks(INSERT_BATCH_SIZE).enumerate() {
            let base = batch * INSERT_BATCH_SIZE;
            let rejected = self
                .api
                .insert_all(&table_id, chunk.to_vec())
                .await
                .map_err(|e| Error::Insert(e.into()))?;
            // Service indexes are per request; rebase them onto the
            // caller's slice.
            failures.extend(rejected.into_iter().map(|mut f| {
                f.index += base;
                f
            }));
        }

        if failures.is_empty() {
            info!("{} new rows added to {}", rows.len(), table_id);
        } else {
            warn!(
                "{} of {} rows were rejected by {}",
                failures.len(),
                rows.len(),
                table_id
            );
        }
        Ok(failures)
    }

    /// Uploads tabular data, inferring the schema from the data.
    ///
    /// `if_exists` decides what happens when the table is already
    /// there. The call blocks until every row has landed; any
    /// rejected row fails the upload with [`Error::Load`].
    pub async fn upload_table(
        &self,
        data: &DataTable,
        table: &str,
        if_exists: IfExists,
    ) -> Result<()> {
        if data.is_empty() {
            return Err(Error::Load(anyhow!(
                "cannot infer a schema from an empty table; supply one explicitly"
            )));
        }
        let schema = infer_schema(data);
        self.upload_inner(data, table, &schema, if_exists).await
    }

    /// Uploads tabular data with an explicit schema.
    ///
    /// Input columns the schema does not name are dropped and cell
    /// values are coerced to the declared types; values that cannot
    /// be coerced become NULL. An empty `data` still creates or
    /// replaces the table. GEOGRAPHY columns are rejected up front;
    /// table creation cannot express the type.
    pub async fn upload_table_with_schema(
        &self,
        data: &DataTable,
        table: &str,
        schema: &TableSchema,
        if_exists: IfExists,
    ) -> Result<()> {
        if schema.is_empty() {
            return Err(Error::Load(anyhow!("schema must not be empty")));
        }
        if let Some(field) = find_geography(&schema.fields) {
            return Err(Error::Load(anyhow!(
                "column '{}' has type GEOGRAPHY, which cannot be used when creating a table",
                field.name
            )));
        }
        self.upload_inner(data, table, schema, if_exists).await
    }

    async fn upload_inner(
        &self,
        data: &DataTable,
        table: &str,
        schema: &TableSchema,
        if_exists: IfExists,
    ) -> Result<()> {
        let table_id = TableId::parse(table, &self.project_id).map_err(Error::Load)?;
        let conformed = conform_to_schema(data, schema);
        if !data.is_empty() && conformed.columns().is_empty() {
            return Err(Error::Load(anyhow!(
                "none of the input columns appear in the schema"
            )));
        }

        match self.api.get_table_schema(&table_id).await {
            Ok(_) => match if_exists {
                IfExists::Fail => {
                    return Err(Error::Load(anyhow!("table '{table_id}' already exists")));
                }
                IfExists::Replace => {
                    info!("Replacing table {}", table_id);
                    self.api
                        .delete_table(&table_id)
                        .await
                        .map_err(|e| Error::Load(e.into()))?;
                    self.api
                        .create_table(&table_id, schema)
                        .await
                        .map_err(|e| Error::Load(e.into()))?;
                }
                IfExists::Append => {}
            },
            Err(ApiError::NotFound(_)) => {
                info!("Creating table {}", table_id);
                self.api
                    .create_table(&table_id, schema)
                    .await
                    .map_err(|e| Error::Load(e.into()))?;
            }
            Err(e) => return Err(Error::Load(e.into())),
        }

        let objects = conformed.to_objects();
        let mut failures = Vec::new();
        for (batch, chunk) in objects.chunks(INSERT_BATCH_SIZE).enumerate() {
            let base = batch * INSERT_BATCH_SIZE;
            let rows: Vec<Value> = chunk.iter().cloned().map(Value::Object).collect();
            let rejected = self
                .api
                .insert_all(&table_id, rows)
                .await
                .map_err(|e| Error::Load(e.into()))?;
            failures.extend(rejected.into_iter().map(|mut f| {
                f.index += base;
                f
            }));
        }

        if let Some(first) = failures.first() {
            error!(
                "{} of {} rows were rejected while loading into {}",
                failures.len(),
                objects.len(),
                table_id
            );
            return Err(Error::Load(anyhow!(
                "{} of {} rows were rejected while loading into '{}' (row {}: {})",
                failures.len(),
                objects.len(),
                table_id,
                first.index,
                first.messages.join("; ")
            )));
        }

        info!("Uploaded {} rows to {}", objects.len(), table_id);
        Ok(())
    }

    /// Rewrites `target_column` for a batch of rows selected by
    /// `key_column`, in one UPDATE statement.
    ///
    /// `updates` maps key values to new target values; rows whose key
    /// is not listed keep their value. Values must be scalars. A key
    /// listed twice keeps its last value. Returns the affected row
    /// count. Fails with [`Error::Update`]; an empty `updates`
    /// returns 0 without calling the service.
    pub async fn update_column(
        &self,
        table: &str,
        key_column: &str,
        target_column: &str,
        updates: &[(Value, Value)],
    ) -> Result<u64> {
        if updates.is_empty() {
            info!("No updates for {}", table);
            return Ok(0);
        }
        let table_id = TableId::parse(table, &self.project_id).map_err(Error::Update)?;
        let statement = build_update_statement(&table_id, key_column, target_column, updates)
            .map_err(Error::Update)?;
        let output = self
            .api
            .run_query(&self.project_id, &statement, self.location.clone())
            .await
            .map_err(|e| Error::Update(e.into()))?;
        let affected = output.affected_rows.unwrap_or(0);
        info!(
            "Updated {} rows in {} ({} keys)",
            affected,
            table_id,
            updates.len()
        );
        Ok(affected)
    }

    /// Fetches the table's current schema from the service. Never
    /// served from a cache.
    ///
    /// Fails with [`Error::NotFound`] when the table does not exist
    /// or the reference does not resolve.
    pub async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        let table_id = TableId::parse(table, &self.project_id)
            .map_err(|_| Error::NotFound(table.to_string()))?;
        match self.api.get_table_schema(&table_id).await {
            Ok(schema) => Ok(schema),
            Err(ApiError::NotFound(_)) => Err(Error::NotFound(table_id.to_string())),
            Err(e) => Err(Error::Query(e.into())),
        }
    }
}

/// Finds a GEOGRAPHY field anywhere in a schema, nested record fields
/// included.
fn find_geography(fields: &[Field]) -> Option<&Field> {
    for field in fields {
        if field.field_type == FieldType::Geography {
            return Some(field);
        }
        if let Some(nested) = find_geography(&field.fields) {
            return Some(nested);
        }
    }
    None
}
