//! Schema string parser
//!
//! Accepts either a single type block or bare field lines:
//!
//! ```text
//! type Post {
//!   id: ID! @unique
//!   title: String!
//!   views: Int
//!   tags: [String]
//!   author: User @belongsTo(foreignKey: authorId)
//!   comments: [Comment] @hasMany
//! }
//! ```
//!
//! `#` starts a comment. Fields are separated by newlines or commas.

use std::collections::HashSet;

use crate::error::{FolioError, Result};

use super::{ColumnDefinition, ColumnType, RelationKind, Relationship, ScalarType};

/// Parse a schema string into columns, in declaration order
pub fn parse_schema(source: &str) -> Result<Vec<ColumnDefinition>> {
    let stripped: String = source
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");

    let body = type_body(&stripped)?;

    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    for decl in split_fields(body) {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let column = parse_field(decl)?;
        if !seen.insert(column.name.clone()) {
            return Err(FolioError::Schema(format!(
                "duplicate column '{}'",
                column.name
            )));
        }
        columns.push(column);
    }

    if columns.is_empty() {
        return Err(FolioError::Schema("schema declares no columns".to_string()));
    }
    Ok(columns)
}

/// Text between the braces of a `type X { ... }` block, or the whole input
fn type_body(source: &str) -> Result<&str> {
    let Some(open) = source.find('{') else {
        return Ok(source);
    };
    let close = source
        .rfind('}')
        .filter(|&close| close > open)
        .ok_or_else(|| FolioError::Schema("unterminated type block".to_string()))?;

    let header = source[..open].trim();
    if !header.is_empty() && !header.starts_with("type") {
        return Err(FolioError::Schema(format!(
            "expected 'type <Name> {{', found '{}'",
            header
        )));
    }
    Ok(&source[open + 1..close])
}

/// Split on newlines and commas outside of directive arguments
fn split_fields(body: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '\n' | ',' if depth == 0 => {
                fields.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&body[start..]);
    fields
}

fn parse_field(decl: &str) -> Result<ColumnDefinition> {
    let (name, rest) = decl
        .split_once(':')
        .ok_or_else(|| FolioError::Schema(format!("expected 'name: Type' in '{}'", decl)))?;
    let name = name.trim();
    if !is_identifier(name) {
        return Err(FolioError::Schema(format!("invalid column name '{}'", name)));
    }

    let rest = rest.trim();
    let (type_expr, directives) = match rest.find('@') {
        Some(at) => (rest[..at].trim(), &rest[at..]),
        None => (rest, ""),
    };

    let (type_name, is_list, nullable) = parse_type_expr(type_expr)?;
    let directives = parse_directives(directives)?;

    let mut column = match ScalarType::from_name(&type_name) {
        Some(scalar) => ColumnDefinition {
            name: name.to_string(),
            column_type: ColumnType::Scalar(scalar),
            nullable,
            is_list,
            is_unique: false,
        },
        None => {
            let mut relationship = Relationship {
                target: type_name,
                foreign_key: None,
                kind: if is_list {
                    RelationKind::HasMany
                } else {
                    RelationKind::HasOne
                },
            };
            let mut explicit_kind = false;
            for directive in &directives {
                if let Some(kind) = relation_kind(&directive.name, &directive.args) {
                    relationship.kind = kind;
                    explicit_kind = true;
                }
                if let Some(fk) = directive.arg("foreignKey") {
                    relationship.foreign_key = Some(fk.to_string());
                }
            }
            if !explicit_kind && !is_list && relationship.foreign_key.is_some() {
                relationship.kind = RelationKind::BelongsTo;
            }
            ColumnDefinition {
                name: name.to_string(),
                column_type: ColumnType::Relation(relationship),
                nullable,
                is_list,
                is_unique: false,
            }
        }
    };

    column.is_unique = directives.iter().any(|d| d.name == "unique");
    Ok(column)
}

/// `Type`, `Type!`, `[Type]`, `[Type!]!` → (name, is_list, nullable)
fn parse_type_expr(expr: &str) -> Result<(String, bool, bool)> {
    let (inner, nullable) = match expr.strip_suffix('!') {
        Some(inner) => (inner.trim(), false),
        None => (expr, true),
    };

    let (inner, is_list) = match inner.strip_prefix('[') {
        Some(rest) => {
            let rest = rest.strip_suffix(']').ok_or_else(|| {
                FolioError::Schema(format!("unterminated list type '{}'", expr))
            })?;
            (rest.trim().trim_end_matches('!').trim(), true)
        }
        None => (inner, false),
    };

    if !is_identifier(inner) {
        return Err(FolioError::Schema(format!("invalid type '{}'", expr)));
    }
    Ok((inner.to_string(), is_list, nullable))
}

struct Directive {
    name: String,
    args: Vec<(String, String)>,
}

impl Directive {
    fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_directives(text: &str) -> Result<Vec<Directive>> {
    let mut directives = Vec::new();
    let mut rest = text.trim();

    while let Some(after_at) = rest.strip_prefix('@') {
        let name_end = after_at
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after_at.len());
        let name = &after_at[..name_end];
        if name.is_empty() {
            return Err(FolioError::Schema(format!("empty directive in '{}'", text)));
        }
        rest = after_at[name_end..].trim_start();

        let mut args = Vec::new();
        if let Some(after_paren) = rest.strip_prefix('(') {
            let close = after_paren.find(')').ok_or_else(|| {
                FolioError::Schema(format!("unterminated arguments for @{}", name))
            })?;
            for pair in after_paren[..close].split(',') {
                let pair = pair.trim();
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = pair.split_once(':').ok_or_else(|| {
                    FolioError::Schema(format!("expected 'key: value' in @{}({})", name, pair))
                })?;
                let value = value.trim().trim_matches('"');
                args.push((key.trim().to_string(), value.to_string()));
            }
            rest = after_paren[close + 1..].trim_start();
        }

        directives.push(Directive {
            name: name.to_string(),
            args,
        });
    }

    if !rest.is_empty() {
        return Err(FolioError::Schema(format!("unexpected text '{}'", rest)));
    }
    Ok(directives)
}

fn relation_kind(directive: &str, args: &[(String, String)]) -> Option<RelationKind> {
    let name = if directive == "relation" {
        args.iter()
            .find(|(k, _)| k == "kind" || k == "type")
            .map(|(_, v)| v.as_str())?
    } else {
        directive
    };
    match name {
        "hasOne" => Some(RelationKind::HasOne),
        "hasMany" => Some(RelationKind::HasMany),
        "belongsTo" => Some(RelationKind::BelongsTo),
        "manyToMany" => Some(RelationKind::ManyToMany),
        _ => None,
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
