//! JSON round-trip for predicate trees
//!
//! The wire shape is one single-key object per node: `{"and": [...]}`,
//! `{"or": [...]}`, `{"is": ["TypeA", ...]}` and
//! `{"where": {"field": {"eq": 1, "lt": 2}}}`. An operator may carry an
//! array instead of a scalar — `{"eq": [7, 8]}` reads as "any of these" —
//! which is how several conditions with the same operator serialize.
//!
//! Timestamps serialize as RFC 3339 strings and come back as strings; JSON
//! has no timestamp type, so the temporal classification does not survive a
//! round-trip. Callers that need temporal comparison semantics must build
//! conditions programmatically.
//!
//! Parsing is the one place malformed filter input surfaces as an error.
//! Everything downstream (compiler, matcher) only ever sees well-formed
//! trees.

use serde_json::{Map, Value};
use thiserror::Error;

use super::{CompareOp, FieldCondition, FilterValue, Predicate};

/// Malformed filter input, rejected before a predicate tree is built.
#[derive(Debug, Error)]
pub enum PredicateParseError {
    #[error("expected a single-key predicate object, got {0}")]
    InvalidNode(String),

    #[error("field `{field}` uses unknown operator `{op}`")]
    UnknownOperator { field: String, op: String },

    #[error("field `{field}` has a non-scalar filter value: {value}")]
    InvalidValue { field: String, value: String },

    #[error("`is` expects an array of type names, got {0}")]
    InvalidTypeList(String),
}

impl Predicate {
    /// Render this tree in the wire shape described at module level.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Is { types } => single(
                "is",
                Value::Array(types.iter().map(|t| Value::String(t.clone())).collect()),
            ),
            Self::And { preds } => single(
                "and",
                Value::Array(preds.iter().map(Self::to_json).collect()),
            ),
            Self::Or { alts } => single(
                "or",
                Value::Array(alts.iter().map(Self::to_json).collect()),
            ),
            Self::Where { fields } => {
                let mut obj = Map::new();
                for (name, conds) in fields {
                    obj.insert(name.clone(), conditions_to_json(conds));
                }
                single("where", Value::Object(obj))
            }
        }
    }

    /// Parse the wire shape back into a tree.
    pub fn from_json(value: &Value) -> Result<Self, PredicateParseError> {
        let Some(obj) = value.as_object() else {
            return Err(PredicateParseError::InvalidNode(value.to_string()));
        };
        if obj.len() != 1 {
            return Err(PredicateParseError::InvalidNode(value.to_string()));
        }
        // len() == 1 was just checked.
        let Some((key, inner)) = obj.iter().next() else {
            return Err(PredicateParseError::InvalidNode(value.to_string()));
        };
        match (key.as_str(), inner) {
            ("and", Value::Array(items)) => Ok(Self::And {
                preds: items.iter().map(Self::from_json).collect::<Result<_, _>>()?,
            }),
            ("or", Value::Array(items)) => Ok(Self::Or {
                alts: items.iter().map(Self::from_json).collect::<Result<_, _>>()?,
            }),
            ("is", Value::Array(items)) => {
                let mut types = Vec::with_capacity(items.len());
                for item in items {
                    let Some(name) = item.as_str() else {
                        return Err(PredicateParseError::InvalidTypeList(inner.to_string()));
                    };
                    types.push(name.to_string());
                }
                Ok(Self::Is { types })
            }
            ("is", other) => Err(PredicateParseError::InvalidTypeList(other.to_string())),
            ("where", Value::Object(field_objs)) => {
                let mut fields = Vec::with_capacity(field_objs.len());
                for (name, conds) in field_objs {
                    fields.push((name.clone(), conditions_from_json(name, conds)?));
                }
                Ok(Self::Where { fields })
            }
            _ => Err(PredicateParseError::InvalidNode(value.to_string())),
        }
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert(key.to_string(), value);
    Value::Object(obj)
}

fn conditions_to_json(conds: &[FieldCondition]) -> Value {
    let mut obj = Map::new();
    for cond in conds {
        let key = cond.op.as_key();
        let value = cond.value.as_json();
        match obj.get_mut(key) {
            None => {
                obj.insert(key.to_string(), value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    Value::Object(obj)
}

fn conditions_from_json(
    field: &str,
    value: &Value,
) -> Result<Vec<FieldCondition>, PredicateParseError> {
    let Some(obj) = value.as_object() else {
        return Err(PredicateParseError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        });
    };
    let mut conds = Vec::new();
    for (key, raw) in obj {
        let op = parse_op(field, key)?;
        match raw {
            Value::Array(values) => {
                for item in values {
                    conds.push(FieldCondition::new(op, scalar_from_json(field, item)?));
                }
            }
            scalar => conds.push(FieldCondition::new(op, scalar_from_json(field, scalar)?)),
        }
    }
    Ok(conds)
}

fn parse_op(field: &str, key: &str) -> Result<CompareOp, PredicateParseError> {
    match key {
        "eq" => Ok(CompareOp::Eq),
        "ne" => Ok(CompareOp::Ne),
        "lt" => Ok(CompareOp::Lt),
        "le" => Ok(CompareOp::Le),
        "gt" => Ok(CompareOp::Gt),
        "ge" => Ok(CompareOp::Ge),
        other => Err(PredicateParseError::UnknownOperator {
            field: field.to_string(),
            op: other.to_string(),
        }),
    }
}

fn scalar_from_json(field: &str, value: &Value) -> Result<FilterValue, PredicateParseError> {
    match value {
        Value::Null => Ok(FilterValue::Null),
        Value::Bool(b) => Ok(FilterValue::Bool(*b)),
        Value::Number(n) => Ok(FilterValue::Number(n.clone())),
        Value::String(s) => Ok(FilterValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(PredicateParseError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}
