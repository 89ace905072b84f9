//! Facade Integration Tests
//!
//! BigQueryHelper の統合テスト（インメモリのAPIスタブを使用）

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use bqhelper::{
    ApiError, ApiResult, BigQueryApi, BigQueryHelper, Credentials, DataTable, Error, Field,
    FieldType, IfExists, QueryOutput, RowError, TableId, TableSchema,
};

/// In-memory stand-in for the service: tracks tables, records inserts
/// and statements, and replays scripted query results.
#[derive(Default)]
struct StubApi {
    tables: Mutex<HashMap<String, TableSchema>>,
    inserted: Mutex<HashMap<String, Vec<Value>>>,
    statements: Mutex<Vec<String>>,
    query_schema: TableSchema,
    query_rows: Vec<Vec<Value>>,
    affected_rows: Option<u64>,
    reject_once: Mutex<Option<Vec<usize>>>,
}

impl StubApi {
    fn new() -> Self {
        Self::default()
    }

    fn with_table(self, reference: &str, schema: TableSchema) -> Self {
        self.tables
            .lock()
            .unwrap()
            .insert(reference.to_string(), schema);
        self
    }

    fn with_query_result(mut self, schema: TableSchema, rows: Vec<Vec<Value>>) -> Self {
        self.query_schema = schema;
        self.query_rows = rows;
        self
    }

    fn with_affected_rows(mut self, n: u64) -> Self {
        self.affected_rows = Some(n);
        self
    }

    /// Rejects the given row indexes on the next insert request only.
    fn rejecting_once(self, indexes: Vec<usize>) -> Self {
        *self.reject_once.lock().unwrap() = Some(indexes);
        self
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn rows_in(&self, reference: &str) -> Vec<Value> {
        self.inserted
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_default()
    }

    fn schema_of(&self, reference: &str) -> Option<TableSchema> {
        self.tables.lock().unwrap().get(reference).cloned()
    }
}

#[async_trait]
impl BigQueryApi for StubApi {
    async fn run_query(
        &self,
        _project_id: &str,
        sql: &str,
        _location: Option<String>,
    ) -> ApiResult<QueryOutput> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(QueryOutput {
            schema: self.query_schema.clone(),
            rows: self.query_rows.clone(),
            affected_rows: self.affected_rows,
        })
    }

    async fn insert_all(&self, table: &TableId, rows: Vec<Value>) -> ApiResult<Vec<RowError>> {
        let key = table.to_string();
        if !self.tables.lock().unwrap().contains_key(&key) {
            return Err(ApiError::NotFound(format!("table {key} not found")));
        }
        self.inserted
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .extend(rows);
        let rejected = self
            .reject_once
            .lock()
            .unwrap()
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|index| RowError {
                index,
                messages: vec!["invalid row".to_string()],
            })
            .collect();
        Ok(rejected)
    }

    async fn get_table_schema(&self, table: &TableId) -> ApiResult<TableSchema> {
        self.tables
            .lock()
            .unwrap()
            .get(&table.to_string())
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("table {table} not found")))
    }

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> ApiResult<()> {
        self.tables
            .lock()
            .unwrap()
            .insert(table.to_string(), schema.clone());
        Ok(())
    }

    async fn delete_table(&self, table: &TableId) -> ApiResult<()> {
        self.tables
            .lock()
            .unwrap()
            .remove(&table.to_string())
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("table {table} not found")))
    }
}

fn helper_over(api: &Arc<StubApi>) -> BigQueryHelper {
    BigQueryHelper::with_api("test-project", Arc::clone(api) as Arc<dyn BigQueryApi>)
}

#[tokio::test]
async fn test_upload_creates_table_and_streams_rows() {
    let api = Arc::new(StubApi::new());
    let helper = helper_over(&api);

    let data = DataTable::from_parts(
        vec!["id".to_string(), "name".to_string()],
        vec![
            vec![json!(1), json!("alice")],
            vec![json!(2), json!("bob")],
        ],
    )
    .unwrap();

    helper
        .upload_table(&data, "ds.users", IfExists::Append)
        .await
        .unwrap();

    let schema = api.schema_of("test-project.ds.users").expect("table created");
    assert_eq!(schema.field("id").unwrap().field_type, FieldType::Integer);
    assert_eq!(schema.field("name").unwrap().field_type, FieldType::String);

    let rows = api.rows_in("test-project.ds.users");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], json!({"id": 1, "name": "alice"}));
}

#[tokio::test]
async fn test_upload_fail_policy_leaves_table_untouched() {
    let api = Arc::new(
        StubApi::new().with_table(
            "test-project.ds.users",
            TableSchema::new(vec![Field::new("id", FieldType::Integer)]),
        ),
    );
    let helper = helper_over(&api);

    let data = DataTable::from_parts(vec!["id".to_string()], vec![vec![json!(1)]]).unwrap();
    let result = helper.upload_table(&data, "ds.users", IfExists::Fail).await;

    assert!(matches!(result, Err(Error::Load(_))));
    assert!(api.rows_in("test-project.ds.users").is_empty());
    assert!(api.schema_of("test-project.ds.users").is_some());
}

#[tokio::test]
async fn test_upload_replace_swaps_schema() {
    let api = Arc::new(
        StubApi::new().with_table(
            "test-project.ds.users",
            TableSchema::new(vec![Field::new("legacy", FieldType::String)]),
        ),
    );
    let helper = helper_over(&api);

    let data = DataTable::from_parts(vec!["id".to_string()], vec![vec![json!(10)]]).unwrap();
    helper
        .upload_table(&data, "ds.users", IfExists::Replace)
        .await
        .unwrap();

    let schema = api.schema_of("test-project.ds.users").unwrap();
    assert!(schema.field("legacy").is_none());
    assert_eq!(schema.field("id").unwrap().field_type, FieldType::Integer);
    assert_eq!(api.rows_in("test-project.ds.users").len(), 1);
}

#[tokio::test]
async fn test_upload_with_schema_coerces_timestamps() {
    let api = Arc::new(StubApi::new());
    let helper = helper_over(&api);

    let data = DataTable::from_parts(
        vec!["at".to_string()],
        vec![vec![json!("2024-07-13 10:05:12")]],
    )
    .unwrap();
    let schema = TableSchema::new(vec![Field::new("at", FieldType::Timestamp)]);

    helper
        .upload_table_with_schema(&data, "ds.events", &schema, IfExists::Append)
        .await
        .unwrap();

    let rows = api.rows_in("test-project.ds.events");
    assert_eq!(rows[0], json!({"at": "2024-07-13T10:05:12.000000Z"}));
}

#[tokio::test]
async fn test_insert_rows_surfaces_rejections_as_data() {
    let api = Arc::new(
        StubApi::new()
            .with_table(
                "test-project.ds.users",
                TableSchema::new(vec![Field::new("id", FieldType::Integer)]),
            )
            .rejecting_once(vec![1]),
    );
    let helper = helper_over(&api);

    let rows = vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})];
    let failures = helper.insert_rows("ds.users", &rows).await.unwrap();

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
    assert_eq!(failures[0].messages, vec!["invalid row".to_string()]);
    // 受理された行はそのまま残る
    assert_eq!(api.rows_in("test-project.ds.users").len(), 3);
}

#[tokio::test]
async fn test_insert_rows_into_missing_table_is_an_error() {
    let api = Arc::new(StubApi::new());
    let helper = helper_over(&api);

    let rows = vec![json!({"id": 1})];
    let result = helper.insert_rows("ds.missing", &rows).await;

    assert!(matches!(result, Err(Error::Insert(_))));
}

#[tokio::test]
async fn test_query_to_table_passes_text_verbatim() {
    let api = Arc::new(StubApi::new().with_query_result(
        TableSchema::new(vec![
            Field::new("name", FieldType::String),
            Field::new("age", FieldType::Integer),
        ]),
        vec![vec![json!("alice"), json!(30)]],
    ));
    let helper = helper_over(&api);

    let query = "SELECT name, age FROM `ds.users` WHERE age > 20";
    let table = helper.query_to_table(query).await.unwrap();

    assert_eq!(table.columns(), &["name", "age"]);
    assert_eq!(table.get(0, "age"), Some(&json!(30)));
    assert_eq!(api.statements(), vec![query.to_string()]);
}

#[tokio::test]
async fn test_update_column_issues_one_statement() {
    let api = Arc::new(StubApi::new().with_affected_rows(2));
    let helper = helper_over(&api);

    let affected = helper
        .update_column(
            "ds.users",
            "id",
            "status",
            &[(json!(1), json!("active")), (json!(7), json!("closed"))],
        )
        .await
        .unwrap();

    assert_eq!(affected, 2);
    let statements = api.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("UPDATE `test-project`.`ds`.`users`"));
    assert!(statements[0].contains("CASE `id`"));
    assert!(statements[0].ends_with("WHERE `id` IN (1, 7)"));
}

#[tokio::test]
async fn test_run_query_reports_affected_rows() {
    let api = Arc::new(StubApi::new().with_affected_rows(5));
    let helper = helper_over(&api);

    let affected = helper
        .run_query("DELETE FROM `ds.users` WHERE state = 'stale'")
        .await
        .unwrap();

    assert_eq!(affected, Some(5));
}

#[tokio::test]
async fn test_get_schema_round_trip() {
    let schema = TableSchema::new(vec![
        Field::new("id", FieldType::Integer),
        Field::new("payload", FieldType::Json),
    ]);
    let api = Arc::new(StubApi::new().with_table("test-project.ds.events", schema));
    let helper = helper_over(&api);

    let fetched = helper.get_schema("ds.events").await.unwrap();
    assert_eq!(fetched.names(), vec!["id", "payload"]);

    let missing = helper.get_schema("ds.nope").await;
    match missing {
        Err(Error::NotFound(reference)) => assert_eq!(reference, "test-project.ds.nope"),
        other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_set_project_id_rebinds_two_part_references() {
    let api = Arc::new(StubApi::new().with_table(
        "second-project.ds.users",
        TableSchema::new(vec![Field::new("id", FieldType::Integer)]),
    ));
    let mut helper = helper_over(&api);
    helper.set_project_id("second-project");

    let rows = vec![json!({"id": 1})];
    helper.insert_rows("ds.users", &rows).await.unwrap();

    assert_eq!(api.rows_in("second-project.ds.users").len(), 1);
}

#[tokio::test]
async fn test_new_rejects_empty_project_id() {
    let result = BigQueryHelper::new("", Credentials::ApplicationDefault).await;

    assert!(matches!(result, Err(Error::Authentication(_))));
}

#[tokio::test]
async fn test_new_with_unreadable_key_file_fails_authentication() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-a-key.json");
    std::fs::write(&path, "not json").unwrap();

    let result =
        BigQueryHelper::new("test-project", Credentials::file(path.to_string_lossy())).await;

    assert!(matches!(result, Err(Error::Authentication(_))));
}

#[test]
fn test_error_messages_name_the_operation() {
    let load = Error::Load(anyhow::anyhow!("table 'p.d.t' already exists"));
    assert_eq!(load.to_string(), "load failed: table 'p.d.t' already exists");

    let not_found = Error::NotFound("p.d.t".to_string());
    assert_eq!(not_found.to_string(), "table not found: p.d.t");
}
