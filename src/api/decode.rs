//! Result Cell Decoding
//!
//! RESTレスポンスのセル復元処理
//!
//! On the v2 REST wire every scalar cell is a JSON string: a row is
//! `{"f": [{"v": ...}, ...]}`, a repeated cell is an array of `{"v"}`
//! wrappers and a record cell is a nested `{"f": [...]}`. This module
//! turns those rows back into plain JSON values using the result
//! schema.

use serde_json::Value;

use crate::schema::{timestamp_from_epoch, Field, FieldMode, FieldType, TableSchema};

/// Decodes a page of wire rows. `rows` is the serialized form of the
/// response's `rows` array.
pub(crate) fn decode_wire_rows(schema: &TableSchema, rows: &Value) -> Vec<Vec<Value>> {
    let Some(rows) = rows.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            let cells = row.get("f").and_then(Value::as_array);
            schema
                .fields
                .iter()
                .enumerate()
                .map(|(index, field)| {
                    let wire = cells
                        .and_then(|f| f.get(index))
                        .and_then(|cell| cell.get("v"))
                        .unwrap_or(&Value::Null);
                    decode_cell(field, wire)
                })
                .collect()
        })
        .collect()
}

/// Decodes one cell. Unexpected wire shapes fall back to the raw value
/// rather than failing the whole page.
pub(crate) fn decode_cell(field: &Field, wire: &Value) -> Value {
    if wire.is_null() {
        return Value::Null;
    }
    if field.mode == FieldMode::Repeated {
        let Some(items) = wire.as_array() else {
            return wire.clone();
        };
        let element = Field {
            mode: FieldMode::Nullable,
            ..field.clone()
        };
        return Value::Array(
            items
                .iter()
                .map(|item| decode_cell(&element, item.get("v").unwrap_or(&Value::Null)))
                .collect(),
        );
    }
    if field.field_type == FieldType::Record {
        return decode_record(&field.fields, wire);
    }
    match wire {
        Value::String(s) => decode_scalar(field.field_type, s),
        other => other.clone(),
    }
}

fn decode_record(fields: &[Field], wire: &Value) -> Value {
    let Some(cells) = wire.get("f").and_then(Value::as_array) else {
        return wire.clone();
    };
    let object = fields
        .iter()
        .enumerate()
        .map(|(index, field)| {
            let v = cells
                .get(index)
                .and_then(|cell| cell.get("v"))
                .unwrap_or(&Value::Null);
            (field.name.clone(), decode_cell(field, v))
        })
        .collect();
    Value::Object(object)
}

fn decode_scalar(field_type: FieldType, wire: &str) -> Value {
    match field_type {
        FieldType::Integer => match wire.parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(wire.to_string()),
        },
        FieldType::Float => match wire.parse::<f64>() {
            // NaN and the infinities have no JSON number form.
            Ok(f) if f.is_finite() => Value::from(f),
            Ok(_) => Value::Null,
            Err(_) => Value::String(wire.to_string()),
        },
        FieldType::Boolean => match wire.parse::<bool>() {
            Ok(b) => Value::Bool(b),
            Err(_) => Value::String(wire.to_string()),
        },
        // TIMESTAMP arrives as epoch seconds, often in scientific
        // notation ("1.720865112E9").
        FieldType::Timestamp => wire
            .parse::<f64>()
            .ok()
            .and_then(timestamp_from_epoch)
            .map(|dt| {
                Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
            })
            .unwrap_or_else(|| Value::String(wire.to_string())),
        FieldType::Json => {
            serde_json::from_str(wire).unwrap_or_else(|_| Value::String(wire.to_string()))
        }
        // NUMERIC and friends keep their exact textual form.
        _ => Value::String(wire.to_string()),
    }
}
