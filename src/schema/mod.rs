//! Schema Module
//!
//! Column definitions that drive positional record encoding and index typing.
//!
//! Columns are stored in declaration order. Relationship columns are
//! metadata only: records never carry a value for them.

mod parser;

use serde::{Deserialize, Serialize};

use crate::index::KeyType;

pub use parser::parse_schema;

/// Scalar value types a stored column may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Int,
    Float,
    String,
    Id,
    Boolean,
}

impl ScalarType {
    /// Resolve a schema type name (`Int`, `Float`, `String`, `ID`, `Boolean`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Int" => Some(ScalarType::Int),
            "Float" => Some(ScalarType::Float),
            "String" => Some(ScalarType::String),
            "ID" => Some(ScalarType::Id),
            "Boolean" | "Bool" => Some(ScalarType::Boolean),
            _ => None,
        }
    }

    /// Index key type used for columns of this scalar type
    pub fn key_type(self) -> KeyType {
        match self {
            ScalarType::Int => KeyType::Int,
            ScalarType::Float => KeyType::Float,
            ScalarType::String | ScalarType::Id => KeyType::Text,
            ScalarType::Boolean => KeyType::Bool,
        }
    }
}

/// How a relationship column relates its table to the target type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    ManyToMany,
}

/// Target of a relationship column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Name of the related type
    pub target: String,
    /// Column holding the related key, when declared
    pub foreign_key: Option<String>,
    pub kind: RelationKind,
}

/// What a column holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Scalar(ScalarType),
    Relation(Relationship),
}

/// A single declared column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub is_list: bool,
    pub is_unique: bool,
}

impl ColumnDefinition {
    /// Nullable, singular, non-unique scalar column
    pub fn scalar(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Scalar(scalar_type),
            nullable: true,
            is_list: false,
            is_unique: false,
        }
    }

    /// Relationship column pointing at `target`
    pub fn relation(name: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Relation(Relationship {
                target: target.into(),
                foreign_key: None,
                kind,
            }),
            nullable: true,
            is_list: matches!(kind, RelationKind::HasMany | RelationKind::ManyToMany),
            is_unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn list(mut self) -> Self {
        self.is_list = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Scalar type, or None for relationship columns
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match &self.column_type {
            ColumnType::Scalar(t) => Some(*t),
            ColumnType::Relation(_) => None,
        }
    }

    /// True if records carry a value for this column
    pub fn is_stored(&self) -> bool {
        matches!(self.column_type, ColumnType::Scalar(_))
    }

    /// Index key type for this column; None if it cannot be indexed
    pub fn key_type(&self) -> Option<KeyType> {
        if self.is_list {
            return None;
        }
        self.scalar_type().map(ScalarType::key_type)
    }
}
