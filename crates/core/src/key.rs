//! Primary keys and composite-key encoding
//!
//! A collection's primary key is a fixed, ordered list of columns. A key value
//! is either a single scalar or a tuple of scalars. Tuples travel through the
//! single `id` field of a document as a tagged, reversible string:
//!
//! ```text
//! "$ck:" + base64(json array of components)
//! ```
//!
//! The JSON array keeps each component's type, so `["acme", 42]` decodes back
//! to a string and an integer rather than two strings.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;
use std::fmt;

/// Tag that marks an encoded composite key
pub const COMPOSITE_KEY_TAG: &str = "$ck:";

/// A primary key value
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryKey {
    /// Key of a collection with one primary-key column
    Single(Value),
    /// Key of a collection with several primary-key columns, in column order
    Composite(Vec<Value>),
}

fn check_scalar(component: &Value) -> Result<()> {
    match component {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(()),
        other => Err(Error::invalid_key(format!(
            "key components must be scalars, got {}",
            other
        ))),
    }
}

impl PrimaryKey {
    /// Build a single-column key
    pub fn single(value: impl Into<Value>) -> Result<Self> {
        let value = value.into();
        check_scalar(&value)?;
        Ok(PrimaryKey::Single(value))
    }

    /// Build a key from its components; one component yields `Single`
    pub fn from_components(mut components: Vec<Value>) -> Result<Self> {
        for c in &components {
            check_scalar(c)?;
        }
        match components.len() {
            0 => Err(Error::invalid_key("key has no components")),
            1 => Ok(PrimaryKey::Single(components.remove(0))),
            _ => Ok(PrimaryKey::Composite(components)),
        }
    }

    /// Decode the `id` field of a document for a collection whose primary key
    /// has `arity` columns.
    pub fn decode(id: &Value, arity: usize) -> Result<Self> {
        if arity <= 1 {
            if let Value::String(s) = id {
                if s.starts_with(COMPOSITE_KEY_TAG) {
                    return Err(Error::invalid_key(
                        "composite key given for a single-column primary key",
                    ));
                }
            }
            return PrimaryKey::single(id.clone());
        }
        let encoded = id
            .as_str()
            .ok_or_else(|| Error::invalid_key(format!("expected an encoded composite key, got {}", id)))?;
        let components = decode_composite(encoded)?;
        if components.len() != arity {
            return Err(Error::invalid_key(format!(
                "composite key has {} components, collection expects {}",
                components.len(),
                arity
            )));
        }
        PrimaryKey::from_components(components)
    }

    /// Key components in primary-key column order
    pub fn components(&self) -> Vec<Value> {
        match self {
            PrimaryKey::Single(v) => vec![v.clone()],
            PrimaryKey::Composite(parts) => parts.clone(),
        }
    }

    /// Number of components
    pub fn arity(&self) -> usize {
        match self {
            PrimaryKey::Single(_) => 1,
            PrimaryKey::Composite(parts) => parts.len(),
        }
    }

    /// The value carried in a document's `id` field
    pub fn to_id_value(&self) -> Value {
        match self {
            PrimaryKey::Single(v) => v.clone(),
            PrimaryKey::Composite(parts) => Value::String(encode_composite(parts)),
        }
    }

    /// Type-preserving token for this key, composite or not.
    ///
    /// Used where a key must round-trip through a string-only identifier
    /// (search-engine document ids).
    pub fn to_token(&self) -> String {
        encode_composite(&self.components())
    }

    /// Inverse of [`PrimaryKey::to_token`]
    pub fn from_token(token: &str) -> Result<Self> {
        PrimaryKey::from_components(decode_composite(token)?)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_id_value() {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

/// Encode key components as a tagged composite string
pub fn encode_composite(components: &[Value]) -> String {
    let json = Value::Array(components.to_vec()).to_string();
    format!("{}{}", COMPOSITE_KEY_TAG, BASE64.encode(json.as_bytes()))
}

/// Decode a tagged composite string back into its components
pub fn decode_composite(encoded: &str) -> Result<Vec<Value>> {
    let body = encoded
        .strip_prefix(COMPOSITE_KEY_TAG)
        .ok_or_else(|| Error::invalid_key(format!("missing composite tag in '{}'", encoded)))?;
    let bytes = BASE64
        .decode(body)
        .map_err(|e| Error::invalid_key(format!("invalid base64 in composite key: {}", e)))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Array(parts)) => Ok(parts),
        Ok(other) => Err(Error::invalid_key(format!(
            "composite key must encode an array, got {}",
            other
        ))),
        Err(e) => Err(Error::invalid_key(format!("invalid composite key: {}", e))),
    }
}
