//! Positional field values
//!
//! Typed values stored by schema-based records, converted to and from JSON
//! according to the column's declared scalar type.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{FolioError, Result};
use crate::schema::{ColumnDefinition, ScalarType};

/// Exact integer value of `f`, if it has one within i64 range
pub(crate) fn integral_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// A single stored column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Convert a JSON value for `column`, coercing where unambiguous
    pub fn from_json(value: &Value, column: &ColumnDefinition) -> Result<Self> {
        let scalar = column.scalar_type().ok_or_else(|| {
            FolioError::Schema(format!(
                "column '{}' is a relationship and stores no value",
                column.name
            ))
        })?;

        if value.is_null() {
            return Ok(FieldValue::Null);
        }

        if column.is_list {
            let items = value.as_array().ok_or_else(|| {
                FolioError::InvalidValue(format!(
                    "column '{}' expects a list, got {}",
                    column.name, value
                ))
            })?;
            return items
                .iter()
                .map(|item| Self::scalar_from_json(item, scalar, &column.name))
                .collect::<Result<Vec<_>>>()
                .map(FieldValue::List);
        }

        Self::scalar_from_json(value, scalar, &column.name)
    }

    fn scalar_from_json(value: &Value, scalar: ScalarType, column: &str) -> Result<Self> {
        let converted = match (scalar, value) {
            (_, Value::Null) => Some(FieldValue::Null),
            (ScalarType::Int, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(integral_i64))
                .map(FieldValue::Int),
            (ScalarType::Int, Value::String(s)) => s.trim().parse().ok().map(FieldValue::Int),
            (ScalarType::Float, Value::Number(n)) => n.as_f64().map(FieldValue::Float),
            (ScalarType::Float, Value::String(s)) => s.trim().parse().ok().map(FieldValue::Float),
            (ScalarType::String | ScalarType::Id, Value::String(s)) => {
                Some(FieldValue::Text(s.clone()))
            }
            (ScalarType::Id, Value::Number(n)) => Some(FieldValue::Text(n.to_string())),
            (ScalarType::Boolean, Value::Bool(b)) => Some(FieldValue::Bool(*b)),
            (ScalarType::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Some(FieldValue::Bool(true)),
                "false" => Some(FieldValue::Bool(false)),
                _ => None,
            },
            _ => None,
        };

        converted.ok_or_else(|| {
            FolioError::InvalidValue(format!(
                "column '{}' expects {:?}, got {}",
                column, scalar, value
            ))
        })
    }

    /// Convert back to JSON
    pub fn to_json(&self) -> Result<Value> {
        Ok(match self {
            FieldValue::Null => Value::Null,
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).ok_or_else(|| {
                FolioError::InvalidValue(format!("non-finite float {}", f))
            })?,
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(FieldValue::to_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}
