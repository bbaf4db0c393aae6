//! Record Module
//!
//! On-page record encodings.
//!
//! ## Encodings
//! - **Generic** (`Record`): the value string is stored as-is
//! - **Schema-based** (`SchemaBasedRecord`): values are stored positionally in
//!   the order of the table's stored columns, without field names
//!
//! The table picks one encoding for every page, depending on whether a
//! schema is set. Records are held in pages as `(key, body)` slots so a
//! single undecodable body never hides the rest of its page.

mod page;
mod value;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FolioError, Result};
use crate::schema::ColumnDefinition;

pub use page::{PageLayout, RecordPage, StoredRecord, PAGE_RECORD_CAPACITY};
pub use value::FieldValue;
pub(crate) use value::integral_i64;

/// Generic key/value record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Record whose values are aligned to the table's stored columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaBasedRecord {
    pub key: String,
    pub values: Vec<FieldValue>,
}

impl SchemaBasedRecord {
    /// Build from a JSON object, taking one value per stored column
    ///
    /// Fields not declared in the schema are dropped; missing fields are null.
    pub fn from_json(key: &str, value: &Value, columns: &[ColumnDefinition]) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            FolioError::InvalidValue(format!(
                "record '{}' must be a JSON object for a schema table",
                key
            ))
        })?;

        let values = columns
            .iter()
            .filter(|c| c.is_stored())
            .map(|column| match object.get(&column.name) {
                Some(v) => FieldValue::from_json(v, column),
                None => Ok(FieldValue::Null),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            key: key.to_string(),
            values,
        })
    }

    /// Rebuild the JSON object; null values are omitted
    pub fn to_json(&self, columns: &[ColumnDefinition]) -> Result<Value> {
        let stored: Vec<&ColumnDefinition> = columns.iter().filter(|c| c.is_stored()).collect();
        if stored.len() != self.values.len() {
            return Err(FolioError::Corruption(format!(
                "record '{}' has {} values for {} stored columns",
                self.key,
                self.values.len(),
                stored.len()
            )));
        }

        let mut object = Map::new();
        for (column, value) in stored.into_iter().zip(&self.values) {
            if !value.is_null() {
                object.insert(column.name.clone(), value.to_json()?);
            }
        }
        Ok(Value::Object(object))
    }
}

/// Encoding chosen for a table's records
#[derive(Debug, Clone)]
pub enum RecordLayout {
    Generic,
    Schema(Arc<[ColumnDefinition]>),
}

impl RecordLayout {
    /// Schema layout if any columns are declared, generic otherwise
    pub fn for_columns(columns: &[ColumnDefinition]) -> Self {
        if columns.is_empty() {
            RecordLayout::Generic
        } else {
            RecordLayout::Schema(columns.to_vec().into())
        }
    }

    /// On-page tag for this layout
    pub fn page_layout(&self) -> PageLayout {
        match self {
            RecordLayout::Generic => PageLayout::Generic,
            RecordLayout::Schema(_) => PageLayout::SchemaBased,
        }
    }

    /// Declared columns (empty for generic tables)
    pub fn columns(&self) -> &[ColumnDefinition] {
        match self {
            RecordLayout::Generic => &[],
            RecordLayout::Schema(columns) => &columns[..],
        }
    }

    /// Encode a record body from its JSON value text
    pub fn encode(&self, key: &str, value: &str) -> Result<Vec<u8>> {
        match self {
            RecordLayout::Generic => Ok(bincode::serialize(value)?),
            RecordLayout::Schema(columns) => {
                let json: Value = serde_json::from_str(value).map_err(|e| {
                    FolioError::InvalidValue(format!("record '{}' is not valid JSON: {}", key, e))
                })?;
                let record = SchemaBasedRecord::from_json(key, &json, columns)?;
                Ok(bincode::serialize(&record.values)?)
            }
        }
    }

    /// Decode a record body back to its value text
    pub fn decode(&self, key: &str, body: &[u8]) -> Result<String> {
        match self {
            RecordLayout::Generic => Ok(self.decode_generic(key, body)?.value),
            RecordLayout::Schema(columns) => {
                let record = self.decode_schema(key, body)?;
                Ok(record.to_json(columns)?.to_string())
            }
        }
    }

    /// Decode a record body to a JSON value, if it is one
    ///
    /// Generic values that are not JSON yield `Value::String`.
    pub fn decode_json(&self, key: &str, body: &[u8]) -> Result<Value> {
        match self {
            RecordLayout::Generic => {
                let record = self.decode_generic(key, body)?;
                Ok(serde_json::from_str(&record.value).unwrap_or(Value::String(record.value)))
            }
            RecordLayout::Schema(columns) => self.decode_schema(key, body)?.to_json(columns),
        }
    }

    fn decode_generic(&self, key: &str, body: &[u8]) -> Result<Record> {
        let value: String = bincode::deserialize(body)?;
        Ok(Record::new(key, value))
    }

    fn decode_schema(&self, key: &str, body: &[u8]) -> Result<SchemaBasedRecord> {
        let values: Vec<FieldValue> = bincode::deserialize(body)?;
        Ok(SchemaBasedRecord {
            key: key.to_string(),
            values,
        })
    }
}
