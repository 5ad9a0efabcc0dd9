//! Condition trees compiled to parameterized SQL.
//!
//! A [`Condition`] restricts a listing by values inside the stored JSON
//! content (or, with an `@` prefix, by record metadata). Compilation yields a
//! `WHERE` fragment containing only `?` placeholders and fixed identifiers;
//! every caller-supplied value, including JSON paths, is bound separately.

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::naming::json_path;

/// A boolean condition over record fields.
///
/// Field names are document paths (`author.name`, `tags/0`) or one of the
/// metadata columns `@id`, `@created_by`, `@created_at`, `@size`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    /// SQL `LIKE` pattern match.
    Like(String, String),
    /// The field is present in the document.
    Exists(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

/// A compiled condition: SQL fragment plus its bound values in order.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledCondition {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Condition {
    pub fn compile(&self) -> StoreResult<CompiledCondition> {
        let mut compiled = CompiledCondition {
            sql: String::new(),
            params: Vec::new(),
        };
        self.write(&mut compiled)?;
        Ok(compiled)
    }

    fn write(&self, out: &mut CompiledCondition) -> StoreResult<()> {
        match self {
            Self::Eq(field, value) => comparison(out, field, "=", value),
            Self::Ne(field, value) => comparison(out, field, "<>", value),
            Self::Lt(field, value) => comparison(out, field, "<", value),
            Self::Le(field, value) => comparison(out, field, "<=", value),
            Self::Gt(field, value) => comparison(out, field, ">", value),
            Self::Ge(field, value) => comparison(out, field, ">=", value),
            Self::Like(field, pattern) => {
                operand(out, field)?;
                out.sql.push_str(" LIKE ?");
                out.params.push(SqlValue::Text(pattern.clone()));
                Ok(())
            }
            Self::Exists(field) => {
                if let Some(column) = metadata_column(field)? {
                    out.sql.push_str(&format!("{column} IS NOT NULL"));
                } else {
                    out.sql.push_str("json_type(content, ?) IS NOT NULL");
                    out.params.push(SqlValue::Text(json_path(field)?));
                }
                Ok(())
            }
            Self::And(items) => join(out, items, " AND ", "1 = 1"),
            Self::Or(items) => join(out, items, " OR ", "1 = 0"),
            Self::Not(inner) => {
                out.sql.push_str("NOT (");
                inner.write(out)?;
                out.sql.push(')');
                Ok(())
            }
        }
    }
}

fn join(out: &mut CompiledCondition, items: &[Condition], sep: &str, empty: &str) -> StoreResult<()> {
    if items.is_empty() {
        out.sql.push_str(empty);
        return Ok(());
    }
    out.sql.push('(');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.sql.push_str(sep);
        }
        item.write(out)?;
    }
    out.sql.push(')');
    Ok(())
}

fn comparison(out: &mut CompiledCondition, field: &str, op: &str, value: &Value) -> StoreResult<()> {
    operand(out, field)?;
    out.sql.push(' ');
    out.sql.push_str(op);
    out.sql.push_str(" ?");
    out.params.push(sql_value(value)?);
    Ok(())
}

fn operand(out: &mut CompiledCondition, field: &str) -> StoreResult<()> {
    if let Some(column) = metadata_column(field)? {
        out.sql.push_str(column);
    } else {
        out.sql.push_str("json_extract(content, ?)");
        out.params.push(SqlValue::Text(json_path(field)?));
    }
    Ok(())
}

fn metadata_column(field: &str) -> StoreResult<Option<&'static str>> {
    let Some(name) = field.strip_prefix('@') else {
        return Ok(None);
    };
    match name {
        "id" => Ok(Some("id")),
        "created_by" => Ok(Some("created_by")),
        "created_at" => Ok(Some("created_at")),
        "size" => Ok(Some("size")),
        other => Err(StoreError::InvalidInput(format!("unknown metadata field: @{other}"))),
    }
}

/// Convert a scalar JSON literal to the value `json_extract` would produce.
fn sql_value(value: &Value) -> StoreResult<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(SqlValue::Integer(i)),
            (None, Some(f)) => Ok(SqlValue::Real(f)),
            _ => Err(StoreError::InvalidInput(format!("unsupported number: {n}"))),
        },
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(StoreError::InvalidInput(
            "conditions compare scalar values only".into(),
        )),
    }
}
