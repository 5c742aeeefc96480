//! Command enum defining every widesync operation.
//!
//! Commands are the request surface: each verb addressed by collection, id
//! and path is a variant carrying everything needed to run it. Commands are
//! plain serializable data, so hosts can accept them as JSON.
//!
//! # Command Categories
//!
//! | Category | Commands |
//! |----------|----------|
//! | Read | `Get`, `GetCollection`, `Query` |
//! | Write | `Set`, `Del` |
//! | Array | `Push`, `Pop`, `Shift`, `Unshift`, `Insert`, `Remove`, `Move` |
//! | Maintenance | `Reindex`, `DropCollection`, `Flush` |
//!
//! Write commands carry the caller's `version`; the version counter advances
//! to at least that value when the command succeeds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A self-contained, serializable operation.
///
/// # Example
///
/// ```ignore
/// use widesync_executor::Command;
/// use serde_json::json;
///
/// let cmd = Command::Push {
///     collection: "items".into(),
///     id: json!("k1"),
///     path: "tags".into(),
///     values: vec![json!("z")],
///     version: 7,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum Command {
    // ==================== Read ====================
    /// Read a document, or the value at a path within it.
    /// Returns: `Output::Value`
    Get {
        collection: String,
        id: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    /// Read every document of a collection.
    /// Returns: `Output::Collection`
    GetCollection { collection: String },

    /// Run a query in its JSON form (see [`Query`](crate::Query)).
    /// Returns: `Output::Documents`, `Output::Document` or `Output::Count`
    Query { query: Value },

    // ==================== Write ====================
    /// Set a whole document or the value at a path.
    ///
    /// A whole-document set without an id inserts with a generated key. A
    /// dotted id (`"k1.a.b"`) without a path sets path `a.b` of `k1`.
    /// Returns: `Output::Value`, or `Output::Inserted` for inserts
    Set {
        collection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        value: Value,
        #[serde(default)]
        version: u64,
    },

    /// Delete a whole document or the value at a path.
    /// Returns: `Output::Value`
    Del {
        collection: String,
        id: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default)]
        version: u64,
    },

    // ==================== Array ====================
    /// Append values to the array at a path.
    /// Returns: `Output::Value`
    Push {
        collection: String,
        id: Value,
        path: String,
        values: Vec<Value>,
        #[serde(default)]
        version: u64,
    },

    /// Remove the last element.
    /// Returns: `Output::Value`
    Pop {
        collection: String,
        id: Value,
        path: String,
        #[serde(default)]
        version: u64,
    },

    /// Remove the first element.
    /// Returns: `Output::Value`
    Shift {
        collection: String,
        id: Value,
        path: String,
        #[serde(default)]
        version: u64,
    },

    /// Prepend values, keeping their order.
    /// Returns: `Output::Value`
    Unshift {
        collection: String,
        id: Value,
        path: String,
        values: Vec<Value>,
        #[serde(default)]
        version: u64,
    },

    /// Splice values in at `index`.
    /// Returns: `Output::Value`
    Insert {
        collection: String,
        id: Value,
        path: String,
        index: i64,
        values: Vec<Value>,
        #[serde(default)]
        version: u64,
    },

    /// Delete `count` elements starting at `index`.
    /// Returns: `Output::Value`
    Remove {
        collection: String,
        id: Value,
        path: String,
        index: i64,
        #[serde(default = "default_count")]
        count: usize,
        #[serde(default)]
        version: u64,
    },

    /// Move `count` elements from `from` to `to`.
    /// Returns: `Output::Value`
    Move {
        collection: String,
        id: Value,
        path: String,
        from: i64,
        to: i64,
        #[serde(default = "default_count")]
        count: usize,
        #[serde(default)]
        version: u64,
    },

    // ==================== Maintenance ====================
    /// Rebuild every search projection of a collection.
    /// Returns: `Output::Reindexed`
    Reindex { collection: String },

    /// Drop a collection's table and its search projections.
    /// Returns: `Output::Unit`
    DropCollection { collection: String },

    /// Issue every pending search commit now.
    /// Returns: `Output::Unit`
    Flush,
}

fn default_count() -> usize {
    1
}

impl Command {
    /// Verb name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::GetCollection { .. } => "get_collection",
            Command::Query { .. } => "query",
            Command::Set { .. } => "set",
            Command::Del { .. } => "del",
            Command::Push { .. } => "push",
            Command::Pop { .. } => "pop",
            Command::Shift { .. } => "shift",
            Command::Unshift { .. } => "unshift",
            Command::Insert { .. } => "insert",
            Command::Remove { .. } => "remove",
            Command::Move { .. } => "move",
            Command::Reindex { .. } => "reindex",
            Command::DropCollection { .. } => "drop_collection",
            Command::Flush => "flush",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_from_json_with_defaults() {
        let cmd: Command = serde_json::from_value(json!({
            "Remove": {"collection": "items", "id": "k", "path": "tags", "index": 0}
        }))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Remove {
                collection: "items".into(),
                id: json!("k"),
                path: "tags".into(),
                index: 0,
                count: 1,
                version: 0,
            }
        );
        assert_eq!(cmd.name(), "remove");
    }

    #[test]
    fn set_without_id_parses() {
        let cmd: Command = serde_json::from_value(json!({
            "Set": {"collection": "items", "value": {"name": "a"}}
        }))
        .unwrap();
        assert!(matches!(cmd, Command::Set { id: None, path: None, .. }));
    }

    #[test]
    fn unknown_fields_rejected() {
        let parsed: Result<Command, _> = serde_json::from_value(json!({
            "Get": {"collection": "items", "id": "k", "bogus": 1}
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn unit_variant_from_string() {
        let cmd: Command = serde_json::from_value(json!("Flush")).unwrap();
        assert_eq!(cmd, Command::Flush);
    }
}
