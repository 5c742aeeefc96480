//! Dot-separated document paths
//!
//! A path such as `a.b.2.c` addresses a location inside a document. Each
//! dot-separated segment is either an object key or, when it is made only of
//! ASCII digits, an array index.
//!
//! - [`split`] / [`join`] / [`is_array_index`]: the pure path codec
//! - [`DocPath`]: a parsed, non-empty path
//! - [`get_at_path`] / [`set_at_path`] / [`delete_at_path`]: path access on
//!   `serde_json::Value` documents
//!
//! The empty path is invalid; whole-document operations take no path at all.

use crate::error::{Error, Result};
use crate::limits::validate_path_length;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Segment separator
pub const SEPARATOR: char = '.';

/// Highest array index a path may address.
///
/// Setting past the end of an array pads it with nulls, so an unbounded
/// index would let one write allocate arbitrarily large arrays.
pub const MAX_ARRAY_INDEX: usize = 1_000_000;

/// A segment of a document path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Object key
    Key(String),
    /// Array index
    Index(usize),
}

impl Segment {
    /// Classify a raw segment string.
    pub fn parse(raw: &str) -> Segment {
        if is_array_index(raw) {
            if let Ok(idx) = raw.parse::<usize>() {
                return Segment::Index(idx);
            }
        }
        Segment::Key(raw.to_string())
    }

    /// True for index segments
    pub fn is_index(&self) -> bool {
        matches!(self, Segment::Index(_))
    }

    /// Render the segment as it appears in a path string
    pub fn as_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{}", k),
            Segment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// True when a raw segment denotes an array index (non-empty, ASCII digits only).
pub fn is_array_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Split a path into segments.
///
/// Fails on the empty path and on empty segments (`a..b`, `.a`, `a.`).
pub fn split(path: &str) -> Result<Vec<Segment>> {
    if path.is_empty() {
        return Err(Error::invalid_path("empty path"));
    }
    let mut segments = Vec::new();
    for (position, raw) in path.split(SEPARATOR).enumerate() {
        if raw.is_empty() {
            return Err(Error::invalid_path(format!(
                "empty segment at position {} in '{}'",
                position, path
            )));
        }
        segments.push(Segment::parse(raw));
    }
    validate_path_length(segments.len())?;
    Ok(segments)
}

/// Join segments back into a dot-separated path.
pub fn join(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(&seg.as_key());
    }
    out
}

/// Join a parent flat key and a child segment (root has no leading dot).
pub fn child_key(prefix: Option<&str>, segment: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}{}{}", p, SEPARATOR, segment),
        _ => segment.to_string(),
    }
}

/// A parsed, non-empty document path
///
/// # Examples
///
/// ```
/// use widesync_core::path::{DocPath, Segment};
///
/// let path: DocPath = "a.b.2.c".parse().unwrap();
/// assert_eq!(path.len(), 4);
/// assert_eq!(path.segments()[2], Segment::Index(2));
/// assert_eq!(path.to_string(), "a.b.2.c");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    segments: Vec<Segment>,
}

impl DocPath {
    /// Parse a dot-separated path
    pub fn parse(path: &str) -> Result<Self> {
        Ok(DocPath {
            segments: split(path)?,
        })
    }

    /// Build a path from segments; at least one segment is required
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::invalid_path("empty path"));
        }
        validate_path_length(segments.len())?;
        Ok(DocPath { segments })
    }

    /// Path segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First segment
    pub fn first(&self) -> &Segment {
        &self.segments[0]
    }

    /// True when the path addresses the primary key alias (`id` or `_id`)
    pub fn is_id(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Key(k)] if k == "id" || k == "_id")
    }

    /// Append a key segment (builder pattern)
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(Segment::Key(key.into()));
        self
    }

    /// Append an index segment (builder pattern)
    pub fn index(mut self, idx: usize) -> Self {
        self.segments.push(Segment::Index(idx));
        self
    }

    /// Flat column name for this path, or the prefix of its descendants' columns
    pub fn to_path_string(&self) -> String {
        join(&self.segments)
    }

    /// True when `column` is this path or lies beneath it
    pub fn covers_column(&self, column: &str) -> bool {
        let own = self.to_path_string();
        column == own
            || (column.len() > own.len()
                && column.starts_with(&own)
                && column[own.len()..].starts_with(SEPARATOR))
    }
}

impl FromStr for DocPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DocPath::parse(s)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path_string())
    }
}

// =============================================================================
// Path access on documents
// =============================================================================

/// Get the value at `path`, or `None` when any step is missing.
///
/// Index segments address object members by their decimal rendering too, so a
/// path reads the same whether an intermediate container was stored as an
/// array or as a numeric-keyed object.
pub fn get_at_path<'a>(value: &'a Value, path: &DocPath) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.segments() {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
            (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set the value at `path`, creating intermediate containers as needed.
///
/// A missing intermediate becomes an array when the next segment is an index
/// and an object otherwise. Arrays are padded with nulls when the index is past
/// the end.
pub fn set_at_path(value: &mut Value, path: &DocPath, new_value: Value) -> Result<()> {
    write_segments(value, path.segments(), new_value, true)
}

/// Write used by reconstruction: refuses to overwrite an existing container,
/// which only happens when two columns disagree about a path's shape.
pub(crate) fn write_column(value: &mut Value, segments: &[Segment], new_value: Value) -> Result<()> {
    write_segments(value, segments, new_value, false)
}

fn empty_container_for(segment: &Segment) -> Value {
    match segment {
        Segment::Index(_) => Value::Array(Vec::new()),
        Segment::Key(_) => Value::Object(Map::new()),
    }
}

fn write_segments(
    current: &mut Value,
    segments: &[Segment],
    new_value: Value,
    overwrite_containers: bool,
) -> Result<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(Error::invalid_path("empty path"));
    };
    if current.is_null() {
        *current = empty_container_for(head);
    }
    let slot: &mut Value = match (head, current) {
        (Segment::Key(k), Value::Object(map)) => map.entry(k.clone()).or_insert(Value::Null),
        (Segment::Index(i), Value::Object(map)) => {
            map.entry(i.to_string()).or_insert(Value::Null)
        }
        (Segment::Index(i), Value::Array(arr)) => {
            if *i > MAX_ARRAY_INDEX {
                return Err(Error::invalid_path(format!(
                    "array index {} exceeds maximum of {}",
                    i, MAX_ARRAY_INDEX
                )));
            }
            if *i >= arr.len() {
                arr.resize(*i + 1, Value::Null);
            }
            &mut arr[*i]
        }
        (Segment::Key(k), Value::Array(_)) => {
            return Err(Error::invalid_path(format!(
                "key '{}' addresses an array",
                k
            )));
        }
        (seg, _) => {
            return Err(Error::invalid_path(format!(
                "segment '{}' descends into a scalar",
                seg
            )));
        }
    };
    if rest.is_empty() {
        if !overwrite_containers && (slot.is_object() || slot.is_array()) {
            return Err(Error::invalid_path(format!(
                "segment '{}' holds both a value and nested fields",
                head
            )));
        }
        *slot = new_value;
        Ok(())
    } else {
        write_segments(slot, rest, new_value, overwrite_containers)
    }
}

/// Remove the value at `path`, returning it.
///
/// Array elements are spliced out, so later elements shift down by one.
pub fn delete_at_path(value: &mut Value, path: &DocPath) -> Option<Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut current = value;
    for segment in parents {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get_mut(k)?,
            (Segment::Index(i), Value::Object(map)) => map.get_mut(&i.to_string())?,
            (Segment::Index(i), Value::Array(arr)) => arr.get_mut(*i)?,
            _ => return None,
        };
    }
    match (last, current) {
        (Segment::Key(k), Value::Object(map)) => map.remove(k),
        (Segment::Index(i), Value::Object(map)) => map.remove(&i.to_string()),
        (Segment::Index(i), Value::Array(arr)) if *i < arr.len() => Some(arr.remove(*i)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_classifies_segments() {
        let segments = split("a.b.2.c").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Key("c".into()),
            ]
        );
    }

    #[test]
    fn test_split_rejects_empty() {
        assert!(split("").is_err());
        assert!(split("a..b").is_err());
        assert!(split(".a").is_err());
        assert!(split("a.").is_err());
    }

    #[test]
    fn test_join_inverts_split() {
        for path in ["a", "a.b", "tags.0", "x.10.y.3"] {
            assert_eq!(join(&split(path).unwrap()), path);
        }
    }

    #[test]
    fn test_is_array_index() {
        assert!(is_array_index("0"));
        assert!(is_array_index("42"));
        assert!(!is_array_index(""));
        assert!(!is_array_index("a1"));
        assert!(!is_array_index("-1"));
        assert!(!is_array_index("1.5"));
    }

    #[test]
    fn test_is_id() {
        assert!(DocPath::parse("id").unwrap().is_id());
        assert!(DocPath::parse("_id").unwrap().is_id());
        assert!(!DocPath::parse("id.x").unwrap().is_id());
    }

    #[test]
    fn test_covers_column() {
        let path = DocPath::parse("tags").unwrap();
        assert!(path.covers_column("tags"));
        assert!(path.covers_column("tags.0"));
        assert!(!path.covers_column("tagsx"));
        assert!(!path.covers_column("tag"));
    }

    #[test]
    fn test_get_at_path() {
        let doc = json!({"a": {"b": [10, {"c": "x"}]}});
        let path = DocPath::parse("a.b.1.c").unwrap();
        assert_eq!(get_at_path(&doc, &path), Some(&json!("x")));
        assert_eq!(get_at_path(&doc, &DocPath::parse("a.z").unwrap()), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = json!({});
        set_at_path(&mut doc, &DocPath::parse("a.b.2.c").unwrap(), json!(1)).unwrap();
        assert_eq!(doc, json!({"a": {"b": [null, null, {"c": 1}]}}));
    }

    #[test]
    fn test_set_replaces_existing_value() {
        let mut doc = json!({"a": {"b": 1}});
        set_at_path(&mut doc, &DocPath::parse("a").unwrap(), json!("flat")).unwrap();
        assert_eq!(doc, json!({"a": "flat"}));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut doc = json!({"a": 5});
        let err = set_at_path(&mut doc, &DocPath::parse("a.b").unwrap(), json!(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[test]
    fn test_set_rejects_huge_index() {
        let mut doc = json!({"a": []});
        let path = DocPath::parse(&format!("a.{}", MAX_ARRAY_INDEX + 1)).unwrap();
        assert!(set_at_path(&mut doc, &path, json!(1)).is_err());
    }

    #[test]
    fn test_delete_at_path() {
        let mut doc = json!({"name": "a", "tags": ["x", "y", "z"]});
        assert_eq!(
            delete_at_path(&mut doc, &DocPath::parse("name").unwrap()),
            Some(json!("a"))
        );
        assert_eq!(
            delete_at_path(&mut doc, &DocPath::parse("tags.1").unwrap()),
            Some(json!("y"))
        );
        assert_eq!(doc, json!({"tags": ["x", "z"]}));
        assert_eq!(delete_at_path(&mut doc, &DocPath::parse("missing").unwrap()), None);
    }
}
