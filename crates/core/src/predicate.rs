//! Query predicates and field selection
//!
//! A predicate maps flat column names to a condition: a literal (equality) or
//! a list of comparisons. Callers write predicates as documents; nested paths
//! are flattened in query mode so operator objects stay whole:
//!
//! ```text
//! {"age": {"$gte": 18}, "tags": {"$all": ["x"]}, "__search": "rust"}
//! ```
//!
//! | Operator | Comparison |
//! |----------|------------|
//! | `$ne` | [`Comparison::NotEquals`] |
//! | `$gt` / `$gte` / `$lt` / `$lte` | ordered comparisons |
//! | `$in` | [`Comparison::Within`] |
//! | `$all` | [`Comparison::Contains`] |
//! | `$exists` | [`Comparison::Exists`] |
//!
//! The reserved [`SEARCH_FIELD`] carries a search-engine query; it is never
//! evaluated against rows.

use crate::error::{Error, Result};
use crate::flatten::{flatten, FlatRow, FlattenMode, ALL_OPERATOR};
use crate::key::PrimaryKey;
use crate::path::{is_array_index, DocPath, SEPARATOR};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Reserved predicate field carrying a search-engine query
pub const SEARCH_FIELD: &str = "__search";

/// One comparison against a column
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Column value differs
    NotEquals(Value),
    /// Column value is greater
    Gt(Value),
    /// Column value is greater or equal
    Gte(Value),
    /// Column value is less
    Lt(Value),
    /// Column value is less or equal
    Lte(Value),
    /// Column value is one of the listed values
    Within(Vec<Value>),
    /// Array at the column holds every listed value
    Contains(Vec<Value>),
    /// Column (or anything beneath it) holds a non-null value
    Exists(bool),
}

impl Comparison {
    /// The comparison matching exactly what an equality on `value` matches
    pub fn from_equality(value: Value) -> Self {
        match value {
            Value::Null => Comparison::Exists(false),
            v => Comparison::Within(vec![v]),
        }
    }

    /// Parse a `$op` / operand pair
    pub fn from_operator(op: &str, operand: &Value) -> Result<Self> {
        let list = |operand: &Value| -> Result<Vec<Value>> {
            match operand {
                Value::Array(items) => Ok(items.clone()),
                other => Err(Error::invalid_input(format!(
                    "operator {} expects an array, got {}",
                    op, other
                ))),
            }
        };
        Ok(match op {
            "$ne" => Comparison::NotEquals(operand.clone()),
            "$gt" => Comparison::Gt(operand.clone()),
            "$gte" => Comparison::Gte(operand.clone()),
            "$lt" => Comparison::Lt(operand.clone()),
            "$lte" => Comparison::Lte(operand.clone()),
            "$in" => Comparison::Within(list(operand)?),
            "$all" => Comparison::Contains(list(operand)?),
            "$exists" => Comparison::Exists(operand.as_bool().ok_or_else(|| {
                Error::invalid_input(format!("$exists expects a boolean, got {}", operand))
            })?),
            other => {
                return Err(Error::invalid_input(format!("unknown operator '{}'", other)));
            }
        })
    }

    /// Operator spelling
    pub fn operator(&self) -> &'static str {
        match self {
            Comparison::NotEquals(_) => "$ne",
            Comparison::Gt(_) => "$gt",
            Comparison::Gte(_) => "$gte",
            Comparison::Lt(_) => "$lt",
            Comparison::Lte(_) => "$lte",
            Comparison::Within(_) => "$in",
            Comparison::Contains(_) => "$all",
            Comparison::Exists(_) => "$exists",
        }
    }

    /// True when the comparison addresses the column's subtree rather than
    /// the column itself
    pub fn is_structural(&self) -> bool {
        matches!(self, Comparison::Contains(_) | Comparison::Exists(_))
    }

    fn matches(&self, row: &FlatRow, column: &str) -> bool {
        let value = row.get(column).unwrap_or(&Value::Null);
        match self {
            Comparison::NotEquals(v) => !values_equal(value, v),
            Comparison::Gt(v) => compare(value, v) == Some(Ordering::Greater),
            Comparison::Gte(v) => matches!(
                compare(value, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Lt(v) => compare(value, v) == Some(Ordering::Less),
            Comparison::Lte(v) => {
                matches!(compare(value, v), Some(Ordering::Less | Ordering::Equal))
            }
            Comparison::Within(list) => list.iter().any(|v| values_equal(value, v)),
            Comparison::Contains(list) => {
                let elements = array_elements(row, column);
                list.iter()
                    .all(|wanted| elements.iter().any(|e| values_equal(e, wanted)))
            }
            Comparison::Exists(expected) => column_exists(row, column) == *expected,
        }
    }

    fn to_operand(&self) -> Value {
        match self {
            Comparison::NotEquals(v)
            | Comparison::Gt(v)
            | Comparison::Gte(v)
            | Comparison::Lt(v)
            | Comparison::Lte(v) => v.clone(),
            Comparison::Within(list) | Comparison::Contains(list) => Value::Array(list.clone()),
            Comparison::Exists(b) => Value::Bool(*b),
        }
    }
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Order two scalars of the same kind; mixed kinds are unordered
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn array_elements(row: &FlatRow, column: &str) -> Vec<Value> {
    if let Some(Value::Array(items)) = row.get(column) {
        return items.clone();
    }
    let prefix = format!("{}{}", column, SEPARATOR);
    let mut indexed: Vec<(usize, Value)> = row
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .filter_map(|(k, v)| {
            let rest = &k[prefix.len()..];
            if is_array_index(rest) && !v.is_null() {
                rest.parse::<usize>().ok().map(|i| (i, v.clone()))
            } else {
                None
            }
        })
        .collect();
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, v)| v).collect()
}

fn column_exists(row: &FlatRow, column: &str) -> bool {
    let prefix = format!("{}{}", column, SEPARATOR);
    row.iter()
        .any(|(k, v)| !v.is_null() && (k == column || k.starts_with(&prefix)))
}

/// Condition on one column
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Column equals the literal; null means the column is unset
    Eq(Value),
    /// Every comparison holds
    Ops(Vec<Comparison>),
}

impl Condition {
    fn matches(&self, row: &FlatRow, column: &str) -> bool {
        match self {
            Condition::Eq(Value::Null) => !column_exists(row, column),
            Condition::Eq(v) => row.get(column).map_or(false, |c| values_equal(c, v)),
            Condition::Ops(ops) => ops.iter().all(|op| op.matches(row, column)),
        }
    }

    /// True when every comparison addresses a subtree (`$all`, `$exists`)
    fn is_structural(&self) -> bool {
        match self {
            Condition::Eq(_) => false,
            Condition::Ops(ops) => ops.iter().all(Comparison::is_structural),
        }
    }
}

/// A conjunction of column conditions plus an optional search passthrough
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: BTreeMap<String, Condition>,
    search: Option<Value>,
}

impl Predicate {
    /// Empty predicate (matches every row)
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality on every primary-key column
    pub fn by_key(primary_keys: &[String], key: &PrimaryKey) -> Result<Self> {
        let components = key.components();
        if components.len() != primary_keys.len() {
            return Err(Error::invalid_key(format!(
                "key has {} components, collection has {} primary-key columns",
                components.len(),
                primary_keys.len()
            )));
        }
        let mut predicate = Predicate::new();
        for (column, value) in primary_keys.iter().zip(components) {
            predicate = predicate.eq(column.clone(), value);
        }
        Ok(predicate)
    }

    /// Add an equality condition (builder pattern)
    pub fn eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.conditions.insert(column.into(), Condition::Eq(value));
        self
    }

    /// Add a comparison, merging with existing conditions on the column.
    ///
    /// An earlier equality is kept, as `$in` of its value (or `$exists: false`
    /// for null).
    pub fn op(mut self, column: impl Into<String>, comparison: Comparison) -> Self {
        match self.conditions.entry(column.into()) {
            std::collections::btree_map::Entry::Occupied(mut e) => match e.get_mut() {
                Condition::Ops(ops) => ops.push(comparison),
                Condition::Eq(v) => {
                    let kept = Comparison::from_equality(v.take());
                    *e.get_mut() = Condition::Ops(vec![kept, comparison]);
                }
            },
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(Condition::Ops(vec![comparison]));
            }
        }
        self
    }

    /// Attach a search-engine query
    pub fn with_search(mut self, query: Value) -> Self {
        self.search = Some(query);
        self
    }

    /// Parse a caller predicate document
    pub fn from_document(document: &Value) -> Result<Self> {
        if !document.is_object() && !document.is_null() {
            return Err(Error::invalid_input(format!(
                "predicate must be an object, got {}",
                document
            )));
        }
        let mut predicate = Predicate::new();
        let mut document = document.clone();
        if let Value::Object(map) = &mut document {
            // The search query is opaque; it must not be flattened.
            predicate.search = map.remove(SEARCH_FIELD);
        }
        for (column, value) in flatten(&document, FlattenMode::Query) {
            match value {
                Value::Object(map) if map.contains_key(ALL_OPERATOR) || is_operators(&map) => {
                    for (op, operand) in &map {
                        predicate = predicate.op(column.clone(), Comparison::from_operator(op, operand)?);
                    }
                }
                literal => predicate = predicate.eq(column, literal),
            }
        }
        Ok(predicate)
    }

    /// Render back into the document form accepted by [`Predicate::from_document`]
    pub fn to_document(&self) -> Value {
        let mut out = Map::new();
        for (column, condition) in &self.conditions {
            let value = match condition {
                Condition::Eq(v) => v.clone(),
                Condition::Ops(ops) => Value::Object(
                    ops.iter()
                        .map(|op| (op.operator().to_string(), op.to_operand()))
                        .collect(),
                ),
            };
            out.insert(column.clone(), value);
        }
        if let Some(search) = &self.search {
            out.insert(SEARCH_FIELD.to_string(), search.clone());
        }
        Value::Object(out)
    }

    /// Conditions by column
    pub fn conditions(&self) -> &BTreeMap<String, Condition> {
        &self.conditions
    }

    /// Columns referenced by any condition
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.conditions.keys().map(String::as_str)
    }

    /// Columns the store must be able to filter on directly.
    ///
    /// Subtree conditions (`$all`, `$exists`) address columns beneath the
    /// named path and are left out.
    pub fn indexed_columns(&self) -> Vec<String> {
        self.conditions
            .iter()
            .filter(|(_, c)| !c.is_structural())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Search-engine query, if any
    pub fn search(&self) -> Option<&Value> {
        self.search.as_ref()
    }

    /// Predicate without its search passthrough
    pub fn without_search(&self) -> Predicate {
        Predicate {
            conditions: self.conditions.clone(),
            search: None,
        }
    }

    /// True when no column condition is present
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// The primary key this predicate pins, when it is an equality on every
    /// primary-key column
    pub fn pinned_key(&self, primary_keys: &[String]) -> Option<PrimaryKey> {
        let components = primary_keys
            .iter()
            .map(|c| match self.conditions.get(c) {
                Some(Condition::Eq(v)) if !v.is_null() => Some(v.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        PrimaryKey::from_components(components).ok()
    }

    /// Evaluate against a flat row
    pub fn matches(&self, row: &FlatRow) -> bool {
        self.conditions
            .iter()
            .all(|(column, condition)| condition.matches(row, column))
    }
}

fn is_operators(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

// =============================================================================
// Field selection
// =============================================================================

/// Which fields of matched documents to return
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldSelection {
    /// Every field
    #[default]
    All,
    /// Keep only these paths (and the primary key)
    Only(Vec<DocPath>),
    /// Drop these paths (never the primary key)
    Except(Vec<DocPath>),
}

impl FieldSelection {
    /// Select only the given paths
    pub fn only<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(FieldSelection::Only(parse_paths(paths)?))
    }

    /// Select everything except the given paths
    pub fn except<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(FieldSelection::Except(parse_paths(paths)?))
    }

    /// Reduce a row to the selected columns. Primary-key columns always survive.
    pub fn apply(&self, row: FlatRow, primary_keys: &[String]) -> FlatRow {
        let covered =
            |paths: &[DocPath], column: &str| paths.iter().any(|p| p.covers_column(column));
        match self {
            FieldSelection::All => row,
            FieldSelection::Only(paths) => row
                .into_iter()
                .filter(|(k, _)| primary_keys.contains(k) || covered(paths, k))
                .collect(),
            FieldSelection::Except(paths) => row
                .into_iter()
                .filter(|(k, _)| primary_keys.contains(k) || !covered(paths, k))
                .collect(),
        }
    }
}

fn parse_paths<I, S>(paths: I) -> Result<Vec<DocPath>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths
        .into_iter()
        .map(|p| DocPath::parse(p.as_ref()))
        .collect()
}
