//! Output enum for command results.
//!
//! Every command produces exactly one output variant; the mapping is listed on
//! each [`Command`](crate::Command) variant.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Successful command results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Output {
    /// Result of a read or a mutation with the version counter after it.
    /// `None` when the document or path does not exist.
    Value { value: Option<Value>, version: u64 },

    /// A document inserted under a generated (or supplied) id
    Inserted {
        id: Value,
        document: Value,
        version: u64,
    },

    /// Every document of a collection, by rendered id
    Collection(Map<String, Value>),

    /// Query results in order
    Documents(Vec<Value>),

    /// First query result
    Document(Option<Value>),

    /// Number of matching documents
    Count(u64),

    /// Outcome of a reindex
    Reindexed { indexed: u64, skipped: u64 },

    /// No return value
    Unit,
}

impl Output {
    /// The carried value of a `Value` output
    pub fn value(&self) -> Option<&Value> {
        match self {
            Output::Value { value, .. } => value.as_ref(),
            Output::Inserted { document, .. } => Some(document),
            Output::Document(doc) => doc.as_ref(),
            _ => None,
        }
    }

    /// Version reported by a write or read, if any
    pub fn version(&self) -> Option<u64> {
        match self {
            Output::Value { version, .. } | Output::Inserted { version, .. } => Some(*version),
            _ => None,
        }
    }
}
