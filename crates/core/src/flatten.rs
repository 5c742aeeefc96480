//! Document flattening
//!
//! Converts nested documents into flat column rows (dot-path -> scalar) and
//! back. One flat row is one physical row in the wide-column store.
//!
//! ```text
//! {"a": {"b": [1, {"c": "x"}]}, "_id": 7}
//!     <->
//! {"a.b.0": 1, "a.b.1.c": "x", "id": 7}
//! ```
//!
//! Conventions applied while flattening:
//! - root-level `_id` is normalized to `id`
//! - an object key `$set` is flattened as if its fields were the enclosing
//!   object's own fields (a partial update reads like a replace)
//! - an object holding `$all` is kept as one literal value, and in query mode
//!   so is any other operator object (`{"$gt": 3}`)
//! - root-level keys starting with [`RESERVED_PREFIX`] are storage or search
//!   metadata; they are dropped from write targets but kept in queries
//!
//! Reconstruction skips reserved columns and nulls (a null column is an unset
//! field) and reattaches the primary key as the document's `id`.
//!
//! Two shapes do not survive a round trip: empty objects/arrays (they have no
//! leaf columns) and object keys made only of digits (they read back as array
//! indexes).

use crate::error::{Error, Result};
use crate::key::encode_composite;
use crate::path::{child_key, split, write_column};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// One physical row: flat column name -> value
pub type FlatRow = BTreeMap<String, Value>;

/// Document field carrying the primary key
pub const ID_FIELD: &str = "id";

/// Alternate spelling of [`ID_FIELD`] accepted from callers
pub const LEGACY_ID_FIELD: &str = "_id";

/// Prefix of columns that hold storage or search metadata
pub const RESERVED_PREFIX: &str = "__";

/// Partial-update marker
pub const SET_OPERATOR: &str = "$set";

/// "Value is all of" marker, kept as a literal
pub const ALL_OPERATOR: &str = "$all";

/// What the flattened row will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenMode {
    /// Row about to be written; reserved root keys are dropped
    Write,
    /// Query predicate; reserved keys and operator objects are kept
    Query,
}

/// True for an object whose keys are all operators (`$gt`, `$in`, ...).
///
/// `$set` is excluded: it is an update marker, not a comparison.
pub fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty()
        && !map.contains_key(SET_OPERATOR)
        && map.keys().all(|k| k.starts_with('$'))
}

fn keep_literal(map: &Map<String, Value>, mode: FlattenMode) -> bool {
    map.contains_key(ALL_OPERATOR) || (mode == FlattenMode::Query && is_operator_object(map))
}

/// Flatten a document into a column row.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use widesync_core::flatten::{flatten, FlattenMode};
///
/// let row = flatten(&json!({"_id": 1, "a": {"b": [true]}}), FlattenMode::Write);
/// assert_eq!(row.get("id"), Some(&json!(1)));
/// assert_eq!(row.get("a.b.0"), Some(&json!(true)));
/// ```
pub fn flatten(document: &Value, mode: FlattenMode) -> FlatRow {
    let mut out = FlatRow::new();
    flatten_into(&mut out, None, document, mode, true);
    out
}

fn flatten_into(out: &mut FlatRow, prefix: Option<&str>, value: &Value, mode: FlattenMode, is_root: bool) {
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let name = child_key(prefix, &i.to_string());
                flatten_into(out, Some(&name), item, mode, false);
            }
        }
        Value::Object(map) if keep_literal(map, mode) => {
            if let Some(p) = prefix {
                out.insert(p.to_string(), value.clone());
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                if key == SET_OPERATOR {
                    flatten_into(out, prefix, child, mode, is_root);
                    continue;
                }
                let mut field = key.as_str();
                if is_root {
                    if key == LEGACY_ID_FIELD {
                        field = ID_FIELD;
                    } else if mode == FlattenMode::Write && key.starts_with(RESERVED_PREFIX) {
                        continue;
                    }
                }
                let name = child_key(prefix, field);
                flatten_into(out, Some(&name), child, mode, false);
            }
        }
        scalar => {
            // A bare scalar root has no column to live in.
            if let Some(p) = prefix {
                out.insert(p.to_string(), scalar.clone());
            }
        }
    }
}

/// Rebuild a nested value from a flat row, without primary-key handling.
///
/// Fails with `InvalidPath` when the row's columns disagree about a path's
/// shape (e.g. both `a` and `a.b` hold values).
pub fn unflatten_value(row: &FlatRow) -> Result<Value> {
    let mut out = Value::Null;
    for (column, value) in row {
        if column.starts_with(RESERVED_PREFIX) || value.is_null() {
            continue;
        }
        let segments = split(column)?;
        write_column(&mut out, &segments, value.clone())?;
    }
    if out.is_null() {
        out = Value::Object(Map::new());
    }
    Ok(out)
}

/// The document `id` for a row: the single key column's value, or the tagged
/// composite encoding of all key columns. `None` when any key column is missing.
pub fn primary_key_value(row: &FlatRow, primary_keys: &[String]) -> Option<Value> {
    if primary_keys.is_empty() {
        return None;
    }
    let components = primary_keys
        .iter()
        .map(|c| row.get(c).filter(|v| !v.is_null()).cloned())
        .collect::<Option<Vec<Value>>>()?;
    if components.len() == 1 {
        components.into_iter().next()
    } else {
        Some(Value::String(encode_composite(&components)))
    }
}

/// Rebuild a document from one stored row of `collection`.
///
/// Reconstruction failures become `CorruptRecord`; the raw row is logged so the
/// offending data can be found, and the caller decides whether to skip it.
pub fn unflatten(collection: &str, row: &FlatRow, primary_keys: &[String]) -> Result<Value> {
    let mut document = match unflatten_value(row) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(
                target: "widesync::flatten",
                collection,
                row = ?row,
                error = %e,
                "Corrupt record"
            );
            return Err(Error::corrupt(collection, e.to_string()));
        }
    };
    if let Some(id) = primary_key_value(row, primary_keys) {
        match &mut document {
            Value::Object(map) => {
                map.insert(ID_FIELD.to_string(), id);
            }
            _ => {
                warn!(target: "widesync::flatten", collection, row = ?row, "Row does not rebuild into an object");
                return Err(Error::corrupt(collection, "row does not rebuild into an object"));
            }
        }
    }
    Ok(document)
}
