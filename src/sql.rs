//! SQL Rendering
//!
//! 識別子・リテラル・UPDATE文の組み立て

use anyhow::bail;
use serde_json::Value;

use crate::table_ref::TableId;

/// Renders a scalar JSON value as a standard SQL literal.
pub fn sql_literal(value: &Value) -> anyhow::Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(true) => Ok("TRUE".to_string()),
        Value::Bool(false) => Ok("FALSE".to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(quote_string(s)),
        Value::Array(_) | Value::Object(_) => {
            bail!("cannot render a non-scalar value as a SQL literal")
        }
    }
}

/// Standard SQL string literal with backslash escaping.
fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Wraps an identifier in backquotes, rejecting names that cannot be
/// quoted safely.
pub fn quote_ident(name: &str) -> anyhow::Result<String> {
    if name.is_empty() {
        bail!("identifier must not be empty");
    }
    if name.contains('`') || name.contains('\n') || name.contains('\r') {
        bail!("invalid identifier '{name}'");
    }
    Ok(format!("`{name}`"))
}

/// Fully qualified, quoted table path.
pub fn quote_table(table: &TableId) -> anyhow::Result<String> {
    Ok(format!(
        "{}.{}.{}",
        quote_ident(&table.project_id)?,
        quote_ident(&table.dataset_id)?,
        quote_ident(&table.table_id)?
    ))
}

/// Builds one UPDATE statement that rewrites `target_column` for every
/// key in `updates`, using a CASE over `key_column`.
///
/// A key listed twice keeps its last value, matching what applying the
/// updates one by one would leave behind.
pub fn build_update_statement(
    table: &TableId,
    key_column: &str,
    target_column: &str,
    updates: &[(Value, Value)],
) -> anyhow::Result<String> {
    if updates.is_empty() {
        bail!("no updates to render");
    }

    // Last occurrence of a key wins; order of first appearance is kept.
    let mut rendered: Vec<(String, String)> = Vec::with_capacity(updates.len());
    for (key, value) in updates {
        let key_literal = sql_literal(key)?;
        let value_literal = sql_literal(value)?;
        match rendered.iter_mut().find(|(k, _)| *k == key_literal) {
            Some(entry) => entry.1 = value_literal,
            None => rendered.push((key_literal, value_literal)),
        }
    }

    let table_path = quote_table(table)?;
    let key = quote_ident(key_column)?;
    let target = quote_ident(target_column)?;

    let cases: Vec<String> = rendered
        .iter()
        .map(|(k, v)| format!("WHEN {k} THEN {v}"))
        .collect();
    let keys: Vec<String> = rendered.iter().map(|(k, _)| k.clone()).collect();

    Ok(format!(
        "UPDATE {table_path} SET {target} = CASE {key} {} ELSE {target} END WHERE {key} IN ({})",
        cases.join(" "),
        keys.join(", ")
    ))
}
