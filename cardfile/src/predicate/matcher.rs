//! In-memory predicate evaluation
//!
//! Storage backends re-check every loaded row against the full predicate, so
//! query semantics never depend on how much of the tree made it into SQL.
//! The evaluator is total: malformed or mismatched payload values make a
//! condition false, never a panic.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{CompareOp, FieldCondition, FilterValue, Predicate};
use crate::document::Document;

impl Predicate {
    /// Evaluate this predicate against a document.
    ///
    /// Empty containers follow the boolean identities of direct evaluation:
    /// `And([])` matches everything, `Or([])` and `Is([])` match nothing,
    /// `Where({})` matches everything. (SQL compilation deliberately does
    /// NOT apply these identities — empty nodes are uncompilable there.)
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Is { types } => types.iter().any(|t| *t == doc.kind),
            Self::Where { fields } => fields.iter().all(|(name, conds)| {
                let actual = doc.body.get(name.as_str());
                conds.iter().all(|cond| cond.holds(actual))
            }),
            Self::And { preds } => preds.iter().all(|p| p.matches(doc)),
            Self::Or { alts } => alts.iter().any(|p| p.matches(doc)),
        }
    }
}

impl FieldCondition {
    /// Evaluate against one payload value; `None` means the key is absent.
    ///
    /// An absent key behaves like explicit null for equality, which makes
    /// `ne(x)` hold by omission — the same null-safe inequality the SQL
    /// templates encode with `coalesce(..., true)`.
    pub fn holds(&self, actual: Option<&Value>) -> bool {
        match self.op {
            CompareOp::Eq => equals(actual, &self.value),
            CompareOp::Ne => !equals(actual, &self.value),
            op => compare(actual, &self.value).is_some_and(|ord| op.accepts(ord)),
        }
    }
}

impl CompareOp {
    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
        }
    }
}

fn equals(actual: Option<&Value>, expected: &FilterValue) -> bool {
    match (actual, expected) {
        (None | Some(Value::Null), FilterValue::Null) => true,
        (None | Some(Value::Null), _) | (Some(_), FilterValue::Null) => false,
        (Some(Value::Number(a)), FilterValue::Number(b)) => match (a.as_f64(), b.as_f64()) {
            // Numeric comparison so 7 == 7.0, like the database would see it.
            (Some(x), Some(y)) => x == y,
            _ => *a == *b,
        },
        (Some(value), FilterValue::Timestamp(ts)) => {
            parse_instant(value).is_some_and(|instant| instant == *ts)
        }
        (Some(value), expected) => *value == expected.as_json(),
    }
}

/// Ordering between a stored payload value and a filter value. Defined only
/// within a kind; cross-kind comparisons and absent keys yield `None`.
fn compare(actual: Option<&Value>, expected: &FilterValue) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::String(s), FilterValue::Text(t)) => Some(s.as_str().cmp(t.as_str())),
        (Value::Number(a), FilterValue::Number(b)) => {
            a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y))
        }
        (Value::Bool(a), FilterValue::Bool(b)) => Some(a.cmp(b)),
        (value, FilterValue::Timestamp(ts)) => {
            parse_instant(value).map(|instant| instant.cmp(ts))
        }
        _ => None,
    }
}

fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
