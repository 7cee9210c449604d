//! 绑定变量
//!
//! `@name` 值参数与 `@@name` 集合参数的解析。集合参数只能替换到标识符位置,
//! 值参数在生成的 SQL 中以命名参数形式出现。

use crate::diagnostics::Span;
use crate::error::{BindingError, BindingErrorKind, Error, Result};
use crate::query::token::{Token, TokenKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bind variables supplied with a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct BindVars {
    values: IndexMap<String, Value>,
    collections: IndexMap<String, Value>,
}

impl BindVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.collections.insert(name.into(), value.into());
        self
    }

    /// Parse an ArangoDB-style object: `{"name": 1, "@coll": "users"}`
    pub fn from_json(value: Value) -> Result<Self> {
        let object = match value {
            Value::Object(object) => object,
            Value::Null => return Ok(Self::default()),
            other => {
                return Err(Error::Config(format!(
                    "bind variables must be a JSON object, got {}",
                    json_type(&other)
                )))
            }
        };

        let mut vars = Self::default();
        for (key, value) in object {
            match key.strip_prefix('@') {
                Some(name) => {
                    vars.collections.insert(name.to_string(), value);
                }
                None => {
                    vars.values.insert(key, value);
                }
            }
        }
        Ok(vars)
    }

    pub fn parse_str(text: &str) -> Result<Self> {
        Self::from_json(serde_json::from_str(text)?)
    }

    /// Insert or replace one variable; an `@` prefix marks a collection
    pub fn set(&mut self, key: &str, value: Value) {
        match key.strip_prefix('@') {
            Some(name) => self.collections.insert(name.to_string(), value),
            None => self.values.insert(key.to_string(), value),
        };
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match key.strip_prefix('@') {
            Some(name) => self.collections.shift_remove(name).is_some(),
            None => self.values.shift_remove(key).is_some(),
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn collection(&self, name: &str) -> Option<&Value> {
        self.collections.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.collections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.collections.len()
    }

    /// All variables in ArangoDB key form (`name`, `@coll`)
    pub fn iter(&self) -> impl Iterator<Item = (String, &Value)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v))
            .chain(self.collections.iter().map(|(k, v)| (format!("@{}", k), v)))
    }
}

impl TryFrom<Value> for BindVars {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(value)
    }
}

impl From<BindVars> for Value {
    fn from(vars: BindVars) -> Value {
        let mut object = serde_json::Map::new();
        for (key, value) in vars.iter() {
            object.insert(key, value.clone());
        }
        Value::Object(object)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Binding table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindKind {
    Value,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum BoundValue {
    Literal(Value),
    /// Collection identifier substituted into the statement text
    Identifier(String),
    /// Value supplied at execution time
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingEntry {
    pub name: String,
    pub kind: BindKind,
    pub value: BoundValue,
    pub span: Span,
}

/// A bind parameter occurrence in the query text
#[derive(Debug, Clone, PartialEq)]
pub struct BindReference {
    pub name: String,
    pub kind: BindKind,
    pub span: Span,
}

/// Bind parameter occurrences in token order
pub fn references(tokens: &[Token]) -> Vec<BindReference> {
    tokens
        .iter()
        .filter_map(|token| {
            let kind = match token.kind {
                TokenKind::BindParam => BindKind::Value,
                TokenKind::CollectionBindParam => BindKind::Collection,
                _ => return None,
            };
            Some(BindReference {
                name: token.lexeme.clone(),
                kind,
                span: token.span,
            })
        })
        .collect()
}

/// Resolved bind variables, one entry per referenced name in first-use order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BindingTable {
    entries: Vec<BindingEntry>,
}

impl BindingTable {
    pub fn resolve(
        references: &[BindReference],
        vars: &BindVars,
        allow_deferred: bool,
    ) -> std::result::Result<Self, BindingError> {
        let mut entries: Vec<BindingEntry> = Vec::new();

        for reference in references {
            let seen = entries
                .iter()
                .any(|e| e.kind == reference.kind && e.name == reference.name);
            if seen {
                continue;
            }

            let value = match reference.kind {
                BindKind::Value => match vars.value(&reference.name) {
                    Some(value) => BoundValue::Literal(value.clone()),
                    None if allow_deferred => BoundValue::Deferred,
                    None => return Err(missing(reference)),
                },
                BindKind::Collection => match vars.collection(&reference.name) {
                    Some(Value::String(name)) => BoundValue::Identifier(name.clone()),
                    Some(other) => {
                        return Err(BindingError {
                            kind: BindingErrorKind::CollectionTypeMismatch,
                            name: reference.name.clone(),
                            span: reference.span,
                            message: format!(
                                "collection parameter `@@{}` must be a string, got {}",
                                reference.name,
                                json_type(other)
                            ),
                        })
                    }
                    None => return Err(missing(reference)),
                },
            };

            entries.push(BindingEntry {
                name: reference.name.clone(),
                kind: reference.kind,
                value,
                span: reference.span,
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[BindingEntry] {
        &self.entries
    }

    pub fn value(&self, name: &str) -> Option<&BindingEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == BindKind::Value && e.name == name)
    }

    /// Substituted collection identifier for `@@name`
    pub fn collection(&self, name: &str) -> Option<&str> {
        self.entries.iter().find_map(|e| match (&e.kind, &e.value) {
            (BindKind::Collection, BoundValue::Identifier(id)) if e.name == name => {
                Some(id.as_str())
            }
            _ => None,
        })
    }

    pub fn deferred(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.value == BoundValue::Deferred)
            .map(|e| e.name.clone())
            .collect()
    }
}

fn missing(reference: &BindReference) -> BindingError {
    let sigil = match reference.kind {
        BindKind::Value => "@",
        BindKind::Collection => "@@",
    };
    BindingError {
        kind: BindingErrorKind::MissingParameter,
        name: reference.name.clone(),
        span: reference.span,
        message: format!("missing value for bind parameter `{}{}`", sigil, reference.name),
    }
}
