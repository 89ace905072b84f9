//! GCP BigQuery Client
//!
//! 本番用のSDK実装

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use google_cloud_bigquery::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::error::Error as HttpError;
use google_cloud_bigquery::http::job::get_query_results::GetQueryResultsRequest;
use google_cloud_bigquery::http::job::query::QueryRequest;
use google_cloud_bigquery::http::table::{Table, TableReference, TableSchema as SdkTableSchema};
use google_cloud_bigquery::http::tabledata::insert_all::{InsertAllRequest, Row};
use serde_json::Value;
use uuid::Uuid;

use super::decode::decode_wire_rows;
use super::{ApiError, ApiResult, BigQueryApi, QueryOutput, RowError};
use crate::credentials::{expand_key_path, Credentials};
use crate::schema::TableSchema;
use crate::table_ref::TableId;

/// Production [`BigQueryApi`] backed by the `google-cloud-bigquery`
/// SDK. Responses are read in their REST wire shape, the same shape
/// the cell decoder works on.
pub struct RealBigQueryApi {
    client: Client,
}

impl RealBigQueryApi {
    /// Authenticates and builds a client. Explicit credentials are
    /// used as given; `ApplicationDefault` runs the SDK's discovery
    /// chain.
    pub async fn connect(credentials: &Credentials) -> anyhow::Result<Self> {
        let (config, _default_project) = match credentials {
            Credentials::File(path) => {
                let expanded = expand_key_path(path);
                let file = CredentialsFile::new_from_file(expanded)
                    .await
                    .context("Failed to read service account key file")?;
                ClientConfig::new_with_credentials(file)
                    .await
                    .context("Failed to authenticate with service account")?
            }
            Credentials::Json(raw) => {
                let file = CredentialsFile::new_from_str(raw)
                    .await
                    .context("Failed to parse service account key JSON")?;
                ClientConfig::new_with_credentials(file)
                    .await
                    .context("Failed to authenticate with service account")?
            }
            Credentials::ApplicationDefault => ClientConfig::new_with_auth()
                .await
                .context("Failed to resolve application default credentials")?,
        };

        let client = Client::new(config)
            .await
            .context("Failed to create BigQuery client")?;

        Ok(Self { client })
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[async_trait]
impl BigQueryApi for RealBigQueryApi {
    async fn run_query(
        &self,
        project_id: &str,
        sql: &str,
        location: Option<String>,
    ) -> ApiResult<QueryOutput> {
        let request = QueryRequest {
            query: sql.to_string(),
            use_legacy_sql: false,
            // An empty location leaves the choice to the service.
            location: location.unwrap_or_default(),
            ..Default::default()
        };
        let response = self
            .client
            .job()
            .query(project_id, &request)
            .await
            .map_err(classify)?;
        let mut page = to_wire(&response)?;

        let job_id = page
            .pointer("/jobReference/jobId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let job_location = page
            .pointer("/jobReference/location")
            .and_then(Value::as_str)
            .map(str::to_string);

        // Poll until the job reports completion. getQueryResults
        // long-polls on the server side, so this does not spin.
        while !page.get("jobComplete").and_then(Value::as_bool).unwrap_or(true) {
            let job_id = job_id
                .as_deref()
                .ok_or_else(|| anyhow!("incomplete query response carries no job reference"))?;
            let request = GetQueryResultsRequest {
                location: job_location.clone(),
                ..Default::default()
            };
            let response = self
                .client
                .job()
                .get_query_results(project_id, job_id, &request)
                .await
                .map_err(classify)?;
            page = to_wire(&response)?;
        }

        let schema: TableSchema = match page.get("schema") {
            Some(schema) if !schema.is_null() => serde_json::from_value(schema.clone())
                .map_err(|e| anyhow!(e).context("unsupported result schema"))?,
            _ => TableSchema::default(),
        };
        let affected_rows = dml_affected_rows(&page);
        let mut rows = decode_wire_rows(&schema, page.get("rows").unwrap_or(&Value::Null));

        // Follow the page token until the result set is drained.
        let mut token = page_token(&page);
        while let Some(next_page) = token {
            let job_id = job_id
                .as_deref()
                .ok_or_else(|| anyhow!("paged query response carries no job reference"))?;
            let request = GetQueryResultsRequest {
                page_token: Some(next_page),
                location: job_location.clone(),
                ..Default::default()
            };
            let response = self
                .client
                .job()
                .get_query_results(project_id, job_id, &request)
                .await
                .map_err(classify)?;
            let page = to_wire(&response)?;
            rows.extend(decode_wire_rows(&schema, page.get("rows").unwrap_or(&Value::Null)));
            token = page_token(&page);
        }

        Ok(QueryOutput {
            schema,
            rows,
            affected_rows,
        })
    }

    async fn insert_all(&self, table: &TableId, rows: Vec<Value>) -> ApiResult<Vec<RowError>> {
        let rows: Vec<Row<Value>> = rows
            .into_iter()
            .map(|json| Row {
                insert_id: Some(Uuid::new_v4().to_string()),
                json,
            })
            .collect();
        let request = InsertAllRequest {
            rows,
            skip_invalid_rows: None,
            ignore_unknown_values: None,
            template_suffix: None,
            trace_id: None,
        };
        let response = self
            .client
            .tabledata()
            .insert(&table.project_id, &table.dataset_id, &table.table_id, &request)
            .await
            .map_err(classify)?;

        let raw = to_wire(&response)?;
        let mut failures = Vec::new();
        if let Some(entries) = raw.get("insertErrors").and_then(Value::as_array) {
            for entry in entries {
                let index = entry.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let messages = entry
                    .get("errors")
                    .and_then(Value::as_array)
                    .map(|errors| {
                        errors
                            .iter()
                            .filter_map(|e| e.get("message").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                failures.push(RowError { index, messages });
            }
        }
        Ok(failures)
    }

    async fn get_table_schema(&self, table: &TableId) -> ApiResult<TableSchema> {
        let metadata = self
            .client
            .table()
            .get(&table.project_id, &table.dataset_id, &table.table_id)
            .await
            .map_err(classify)?;
        let raw = to_wire(&metadata)?;
        match raw.get("schema") {
            Some(schema) if !schema.is_null() => serde_json::from_value(schema.clone())
                .map_err(|e| ApiError::Other(anyhow!(e).context("unsupported table schema"))),
            _ => Ok(TableSchema::default()),
        }
    }

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> ApiResult<()> {
        let sdk_schema: SdkTableSchema = serde_json::to_value(schema)
            .and_then(serde_json::from_value)
            .map_err(|e| ApiError::Other(anyhow!(e).context("failed to convert schema")))?;
        let metadata = Table {
            table_reference: TableReference {
                project_id: table.project_id.clone(),
                dataset_id: table.dataset_id.clone(),
                table_id: table.table_id.clone(),
            },
            schema: Some(sdk_schema),
            ..Default::default()
        };
        self.client
            .table()
            .create(&metadata)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_table(&self, table: &TableId) -> ApiResult<()> {
        self.client
            .table()
            .delete(&table.project_id, &table.dataset_id, &table.table_id)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Re-serializes an SDK response into its REST wire shape.
fn to_wire<T: serde::Serialize>(response: &T) -> ApiResult<Value> {
    serde_json::to_value(response)
        .map_err(|e| ApiError::Other(anyhow!(e).context("failed to read SDK response")))
}

fn page_token(page: &Value) -> Option<String> {
    page.get("pageToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// The REST API reports the affected row count as a decimal string.
fn dml_affected_rows(page: &Value) -> Option<u64> {
    match page.get("numDmlAffectedRows") {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    }
}

/// Splits 404 responses out of the SDK error so callers can branch on
/// missing tables.
fn classify(error: HttpError) -> ApiError {
    if let HttpError::Response(ref response) = error {
        if response.code == 404 {
            return ApiError::NotFound(response.message.clone());
        }
    }
    ApiError::Other(anyhow::Error::new(error))
}
