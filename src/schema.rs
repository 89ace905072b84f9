//! Table Schemas
//!
//! スキーマの表現・推論・値の型変換

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::data::DataTable;

/// BigQuery field types, spelled the way the REST API reports them.
/// Standard SQL spellings (`INT64`, `FLOAT64`, `BOOL`, `STRUCT`) are
/// accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Bytes,
    #[serde(alias = "INT64")]
    Integer,
    #[serde(alias = "FLOAT64")]
    Float,
    #[serde(alias = "BOOL")]
    Boolean,
    Timestamp,
    Date,
    Time,
    Datetime,
    Interval,
    Numeric,
    Bignumeric,
    /// Decodes from query results; creating a table with this type is
    /// not supported.
    Geography,
    Json,
    #[serde(alias = "STRUCT")]
    Record,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Bytes => "BYTES",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Datetime => "DATETIME",
            Self::Interval => "INTERVAL",
            Self::Numeric => "NUMERIC",
            Self::Bignumeric => "BIGNUMERIC",
            Self::Geography => "GEOGRAPHY",
            Self::Json => "JSON",
            Self::Record => "RECORD",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.to_ascii_uppercase().as_str() {
            "STRING" => Self::String,
            "BYTES" => Self::Bytes,
            "INTEGER" | "INT64" => Self::Integer,
            "FLOAT" | "FLOAT64" => Self::Float,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "TIMESTAMP" => Self::Timestamp,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "DATETIME" => Self::Datetime,
            "INTERVAL" => Self::Interval,
            "NUMERIC" => Self::Numeric,
            "BIGNUMERIC" => Self::Bignumeric,
            "GEOGRAPHY" => Self::Geography,
            "JSON" => Self::Json,
            "RECORD" | "STRUCT" => Self::Record,
            other => bail!("unknown field type '{other}'"),
        };
        Ok(ty)
    }
}

/// Field mode. Omitted on the wire means `Nullable`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

/// One column of a table schema. `fields` is populated for `RECORD`
/// columns only.
///
/// The serde shape mirrors the REST `TableFieldSchema` resource, so a
/// schema round-trips through the JSON the API speaks. An absent or
/// null `mode` reads as `NULLABLE`, as the API documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, deserialize_with = "mode_or_nullable")]
    pub mode: FieldMode,
    #[serde(
        default,
        deserialize_with = "fields_or_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub fields: Vec<Field>,
}

fn mode_or_nullable<'de, D>(deserializer: D) -> Result<FieldMode, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<FieldMode>::deserialize(deserializer)?.unwrap_or_default())
}

fn fields_or_empty<'de, D>(deserializer: D) -> Result<Vec<Field>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Field>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Field {
    /// Creates a nullable field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
            fields: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: FieldMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }
}

/// An ordered set of fields describing a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Looks a field up by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Infers a schema from table data.
///
/// Per column: booleans map to BOOLEAN, integral numbers to INTEGER,
/// other numbers to FLOAT, strings to STRING, objects and arrays to
/// JSON. Mixed INTEGER and FLOAT widens to FLOAT; any other mixture
/// and all-null columns fall back to STRING.
pub fn infer_schema(data: &DataTable) -> TableSchema {
    let fields = data
        .columns()
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let cells = data.rows().iter().map(move |row| &row[index]);
            Field::new(name.clone(), infer_column_type(cells))
        })
        .collect();
    TableSchema::new(fields)
}

fn infer_column_type<'a>(cells: impl Iterator<Item = &'a Value>) -> FieldType {
    let mut inferred: Option<FieldType> = None;
    for cell in cells {
        let ty = match cell {
            Value::Null => continue,
            Value::Bool(_) => FieldType::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    FieldType::Integer
                } else {
                    FieldType::Float
                }
            }
            Value::String(_) => FieldType::String,
            Value::Object(_) | Value::Array(_) => FieldType::Json,
        };
        inferred = Some(match inferred {
            None => ty,
            Some(previous) if previous == ty => ty,
            Some(FieldType::Integer) if ty == FieldType::Float => FieldType::Float,
            Some(FieldType::Float) if ty == FieldType::Integer => FieldType::Float,
            Some(_) => FieldType::String,
        });
    }
    inferred.unwrap_or(FieldType::String)
}

/// Projects table data onto a schema.
///
/// Columns the schema does not name are dropped; the rest keep their
/// input order and every cell is coerced to the declared type.
pub fn conform_to_schema(data: &DataTable, schema: &TableSchema) -> DataTable {
    let kept: Vec<(usize, &Field)> = data
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(index, name)| schema.field(name).map(|field| (index, field)))
        .collect();

    let columns = kept.iter().map(|(_, f)| f.name.clone()).collect();
    let rows = data
        .rows()
        .iter()
        .map(|row| {
            kept.iter()
                .map(|(index, field)| coerce_value(&row[*index], field))
                .collect()
        })
        .collect();
    DataTable::from_parts(columns, rows)
        .unwrap_or_else(|_| DataTable::new(Vec::new()))
}

/// Coerces one cell to a field's declared type. Values that cannot be
/// converted become null rather than failing the whole upload.
pub fn coerce_value(value: &Value, field: &Field) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    if field.mode == FieldMode::Repeated {
        return match value {
            Value::Array(items) => {
                let element = Field::new(field.name.clone(), field.field_type)
                    .with_fields(field.fields.clone());
                Value::Array(items.iter().map(|v| coerce_value(v, &element)).collect())
            }
            _ => Value::Null,
        };
    }
    match field.field_type {
        FieldType::Integer => coerce_integer(value),
        FieldType::Float => coerce_float(value),
        FieldType::Boolean => coerce_boolean(value),
        FieldType::Timestamp => coerce_timestamp(value),
        FieldType::String => coerce_string(value),
        FieldType::Json => coerce_json(value),
        // DATE, NUMERIC and the rest pass through in their wire form.
        _ => value.clone(),
    }
}

fn coerce_integer(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                value.clone()
            } else {
                integral_float(n.as_f64())
            }
        }
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => integral_float(s.trim().parse::<f64>().ok()),
        },
        Value::Bool(b) => Value::from(i64::from(*b)),
        _ => Value::Null,
    }
}

/// Accepts a float only when it is a whole number in i64 range.
fn integral_float(f: Option<f64>) -> Value {
    match f {
        Some(f)
            if f.is_finite()
                && f.fract() == 0.0
                && f >= i64::MIN as f64
                && f <= i64::MAX as f64 =>
        {
            Value::from(f as i64)
        }
        _ => Value::Null,
    }
}

fn coerce_float(value: &Value) -> Value {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() => Value::from(f),
        _ => Value::Null,
    }
}

fn coerce_boolean(value: &Value) -> Value {
    match value {
        Value::Bool(_) => value.clone(),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Null,
        },
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => Value::Bool(false),
            Some(f) if f.is_finite() => Value::Bool(true),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

fn coerce_timestamp(value: &Value) -> Value {
    let parsed = match value {
        Value::String(s) => parse_timestamp(s.trim()),
        // Numbers are epoch seconds.
        Value::Number(n) => n.as_f64().and_then(timestamp_from_epoch),
        _ => None,
    };
    match parsed {
        Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
        None => Value::Null,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}

pub(crate) fn timestamp_from_epoch(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}

fn coerce_string(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(value).map(Value::String).unwrap_or(Value::Null)
        }
        Value::Null => Value::Null,
    }
}

/// JSON columns travel as pre-serialized JSON text in the streaming
/// insert payload. Strings are assumed to already be JSON text.
fn coerce_json(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        Value::Null => Value::Null,
        other => serde_json::to_string(other).map(Value::String).unwrap_or(Value::Null),
    }
}
