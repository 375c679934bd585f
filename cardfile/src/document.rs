//! The unit of storage: a typed record with a schemaless payload
//!
//! A [`Document`] maps onto one row of a backing table: the `kind` goes into
//! the type-discriminator column, the `body` into the JSON payload column.
//! Payload keys are optional by nature — predicates must account for rows
//! that simply never wrote a given key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record: a type name plus an open-ended JSON object payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Value of the type-discriminator column.
    pub kind: String,
    /// Schemaless payload. Key order is preserved end to end.
    pub body: Map<String, Value>,
}

impl Document {
    /// Create an empty document of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: Map::new(),
        }
    }

    /// Builder-style payload entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Look up a payload key. Absent keys are `None`, not JSON null.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}
