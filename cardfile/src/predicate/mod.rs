//! Predicate algebra for filtering documents
//!
//! A [`Predicate`] is an immutable tree with four node kinds: `Is` matches on
//! the type discriminator, `Where` tests payload fields, `And`/`Or` combine
//! sub-predicates. Sequence order inside every variant is significant — it
//! fixes both the order of generated SQL clauses and the order of bound
//! parameters — so nothing here ever sorts, reorders, or deduplicates.
//!
//! Trees are built once by the caller, handed to the SQL compiler and/or the
//! in-memory matcher, and never mutated.

mod codec;
mod matcher;

pub use codec::PredicateParseError;

use chrono::{DateTime, Utc};
use serde_json::{Number, Value};

/// One scalar a field can be compared against.
///
/// `Timestamp` is its own variant rather than a string because temporal
/// comparisons compile to a different SQL template than textual ones.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Which comparison template family a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFamily {
    /// The explicit null sentinel.
    ExplicitNull,
    /// Timestamp-shaped values, classified by their static type, never by
    /// the literal text they happen to contain.
    Temporal,
    /// Strings, numbers, booleans.
    Generic,
}

impl FilterValue {
    /// Classify this value. Total — every value belongs to exactly one
    /// family.
    pub fn family(&self) -> ValueFamily {
        match self {
            Self::Null => ValueFamily::ExplicitNull,
            Self::Timestamp(_) => ValueFamily::Temporal,
            Self::Bool(_) | Self::Number(_) | Self::Text(_) => ValueFamily::Generic,
        }
    }

    /// Render as a JSON value. Timestamps become RFC 3339 strings, which is
    /// also how they are stored inside document payloads.
    pub fn as_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Text(s) => Value::String(s.clone()),
            Self::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<f64> for FilterValue {
    // Non-finite floats have no JSON form; they fold to null, matching
    // serde_json's own conversion.
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Comparison operator of a single field condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// SQL spelling of the operator.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Codec spelling (`eq`, `ne`, ...), shared by `to_json`/`from_json`.
    pub fn as_key(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }
}

/// One `(operator, value)` test attached to a payload field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub op: CompareOp,
    pub value: FilterValue,
}

impl FieldCondition {
    pub fn new(op: CompareOp, value: impl Into<FilterValue>) -> Self {
        Self {
            op,
            value: value.into(),
        }
    }

    pub fn eq(value: impl Into<FilterValue>) -> Self {
        Self::new(CompareOp::Eq, value)
    }

    pub fn ne(value: impl Into<FilterValue>) -> Self {
        Self::new(CompareOp::Ne, value)
    }

    pub fn lt(value: impl Into<FilterValue>) -> Self {
        Self::new(CompareOp::Lt, value)
    }

    pub fn le(value: impl Into<FilterValue>) -> Self {
        Self::new(CompareOp::Le, value)
    }

    pub fn gt(value: impl Into<FilterValue>) -> Self {
        Self::new(CompareOp::Gt, value)
    }

    pub fn ge(value: impl Into<FilterValue>) -> Self {
        Self::new(CompareOp::Ge, value)
    }
}

/// A filter expression over documents.
///
/// Empty sequences are legal everywhere (`And([])`, `Or([])`, `Is([])`,
/// `Where({})`) but cannot be turned into SQL; see the compiler for how that
/// propagates.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Discriminator is one of the listed type names.
    Is { types: Vec<String> },
    /// Every listed field satisfies every one of its conditions. Field order
    /// is insertion order and is preserved through compilation.
    Where {
        fields: Vec<(String, Vec<FieldCondition>)>,
    },
    /// All sub-predicates hold.
    And { preds: Vec<Predicate> },
    /// At least one alternative holds.
    Or { alts: Vec<Predicate> },
}

impl Predicate {
    pub fn is<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Is {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn where_<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<FieldCondition>)>,
        S: Into<String>,
    {
        Self::Where {
            fields: fields
                .into_iter()
                .map(|(name, conds)| (name.into(), conds))
                .collect(),
        }
    }

    /// Shorthand for a `Where` with a single field.
    pub fn field(name: impl Into<String>, conds: Vec<FieldCondition>) -> Self {
        Self::Where {
            fields: vec![(name.into(), conds)],
        }
    }

    pub fn and(preds: impl IntoIterator<Item = Predicate>) -> Self {
        Self::And {
            preds: preds.into_iter().collect(),
        }
    }

    pub fn or(alts: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Or {
            alts: alts.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
