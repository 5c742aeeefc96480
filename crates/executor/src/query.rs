//! Caller queries
//!
//! A [`Query`] collects conditions, field selection, paging and sort for one
//! collection. It can be built with chained methods or parsed from the JSON
//! form callers send, where each key names a builder method:
//!
//! ```json
//! {
//!   "type": "find",
//!   "from": "items",
//!   "equals": { "kind": "fruit" },
//!   "gte": { "stock.count": 3 },
//!   "only": { "name": true },
//!   "limit": 10,
//!   "sort": ["name", "desc"]
//! }
//! ```
//!
//! | Method | Operator |
//! |--------|----------|
//! | `notEquals` | `$ne` |
//! | `gt` / `gte` / `lt` / `lte` | `$gt` / `$gte` / `$lt` / `$lte` |
//! | `within` | `$in` |
//! | `contains` | `$all` |
//! | `exists` | `$exists` |
//!
//! Paths `id` and `_id` both address the primary key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use widesync_core::{
    Error, FieldSelection, Predicate, Result, ID_FIELD, LEGACY_ID_FIELD, SEARCH_FIELD,
};
use widesync_engine::{FindOptions, SortKey};

/// What a query returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryKind {
    /// Every matching document
    #[default]
    Find,
    /// The first matching document
    #[serde(alias = "one")]
    FindOne,
    /// The number of matching documents
    Count,
}

impl QueryKind {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "find" => Ok(QueryKind::Find),
            "findOne" | "one" => Ok(QueryKind::FindOne),
            "count" => Ok(QueryKind::Count),
            other => Err(Error::invalid_input(format!("unknown query type '{}'", other))),
        }
    }
}

/// A query against one collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    kind: QueryKind,
    collection: String,
    /// Predicate document: path -> literal or `{ $op: operand }`
    conds: Map<String, Value>,
    /// path -> included
    fields: Vec<(String, bool)>,
    skip: Option<usize>,
    limit: Option<usize>,
    sort: Vec<SortKey>,
    search: Option<Value>,
}

fn normalize_path(path: &str) -> String {
    if path == LEGACY_ID_FIELD {
        ID_FIELD.to_string()
    } else {
        path.to_string()
    }
}

impl Query {
    /// Empty query of `kind` against `collection`
    pub fn new(kind: QueryKind, collection: impl Into<String>) -> Self {
        Query {
            kind,
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Query for every matching document
    pub fn find(collection: impl Into<String>) -> Self {
        Self::new(QueryKind::Find, collection)
    }

    /// Query for the first matching document
    pub fn find_one(collection: impl Into<String>) -> Self {
        Self::new(QueryKind::FindOne, collection)
    }

    /// Query for the number of matching documents
    pub fn count(collection: impl Into<String>) -> Self {
        Self::new(QueryKind::Count, collection)
    }

    /// What the query returns
    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Collection queried
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Match the document with this id
    pub fn by_key(self, id: Value) -> Self {
        self.equals(ID_FIELD, id)
    }

    /// Path equals `value`
    pub fn equals(mut self, path: &str, value: Value) -> Self {
        self.conds.insert(normalize_path(path), value);
        self
    }

    fn operator(mut self, path: &str, op: &str, operand: Value) -> Self {
        let entry = self
            .conds
            .entry(normalize_path(path))
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            // an earlier equality on the same path becomes `$in`
            let kept = match entry.take() {
                Value::Null => ("$exists".to_string(), Value::Bool(false)),
                v => ("$in".to_string(), Value::Array(vec![v])),
            };
            *entry = Value::Object(Map::from_iter([kept]));
        }
        if let Value::Object(ops) = entry {
            ops.insert(op.to_string(), operand);
        }
        self
    }

    /// Path differs from `value`
    pub fn not_equals(self, path: &str, value: Value) -> Self {
        self.operator(path, "$ne", value)
    }

    /// Path is greater than `value`
    pub fn gt(self, path: &str, value: Value) -> Self {
        self.operator(path, "$gt", value)
    }

    /// Path is at least `value`
    pub fn gte(self, path: &str, value: Value) -> Self {
        self.operator(path, "$gte", value)
    }

    /// Path is less than `value`
    pub fn lt(self, path: &str, value: Value) -> Self {
        self.operator(path, "$lt", value)
    }

    /// Path is at most `value`
    pub fn lte(self, path: &str, value: Value) -> Self {
        self.operator(path, "$lte", value)
    }

    /// Value at `path` is one of `values`
    pub fn within(self, path: &str, values: Vec<Value>) -> Self {
        self.operator(path, "$in", Value::Array(values))
    }

    /// Array at `path` holds every one of `values`
    pub fn contains(self, path: &str, values: Vec<Value>) -> Self {
        self.operator(path, "$all", Value::Array(values))
    }

    /// Path is set (or unset, with `false`)
    pub fn exists(self, path: &str, exists: bool) -> Self {
        self.operator(path, "$exists", Value::Bool(exists))
    }

    /// Return only these paths
    pub fn only<'a>(mut self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        self.fields
            .extend(paths.into_iter().map(|p| (normalize_path(p), true)));
        self
    }

    /// Return everything but these paths
    pub fn except<'a>(mut self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        self.fields
            .extend(paths.into_iter().map(|p| (normalize_path(p), false)));
        self
    }

    /// Skip the first `n` results
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Return at most `n` results
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Sort by `path`
    pub fn sort(mut self, path: &str, descending: bool) -> Self {
        self.sort.push(SortKey {
            column: normalize_path(path),
            descending,
        });
        self
    }

    /// Resolve through the search engine with this query
    pub fn search(mut self, query: Value) -> Self {
        self.search = Some(query);
        self
    }

    /// Parse the JSON form of a query
    pub fn from_json(json: &Value) -> Result<Self> {
        let Value::Object(map) = json else {
            return Err(Error::invalid_input(format!(
                "query must be an object, got {}",
                json
            )));
        };
        let mut query = Query::default();
        for (method, arg) in map {
            query = match method.as_str() {
                "type" => {
                    query.kind = QueryKind::parse(expect_str(method, arg)?)?;
                    query
                }
                "from" => {
                    query.collection = expect_str(method, arg)?.to_string();
                    query
                }
                "byKey" => query.by_key(arg.clone()),
                "equals" | "elemPropertyEquals" => expect_params(method, arg)?
                    .iter()
                    .fold(query, |q, (path, v)| q.equals(path, v.clone())),
                "notEquals" | "gt" | "gte" | "lt" | "lte" | "within" | "contains"
                | "exists" => {
                    let op = operator_for(method);
                    expect_params(method, arg)?
                        .iter()
                        .fold(query, |q, (path, v)| q.operator(path, op, v.clone()))
                }
                "only" | "except" => {
                    let include = method == "only";
                    let paths: Vec<&str> = match arg {
                        Value::Object(params) => params.keys().map(String::as_str).collect(),
                        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                        other => {
                            return Err(Error::invalid_input(format!(
                                "{} expects paths, got {}",
                                method, other
                            )))
                        }
                    };
                    if include {
                        query.only(paths)
                    } else {
                        query.except(paths)
                    }
                }
                "skip" => query.skip(expect_count(method, arg)?),
                "limit" => query.limit(expect_count(method, arg)?),
                "sort" => parse_sort(query, arg)?,
                "search" => query.search(arg.clone()),
                other => {
                    return Err(Error::invalid_input(format!(
                        "unknown query method '{}'",
                        other
                    )))
                }
            };
        }
        if query.collection.is_empty() {
            return Err(Error::invalid_input("query names no collection ('from')"));
        }
        Ok(query)
    }

    /// Column predicate, including any search passthrough
    pub fn predicate(&self) -> Result<Predicate> {
        let mut doc = self.conds.clone();
        if let Some(search) = &self.search {
            doc.insert(SEARCH_FIELD.to_string(), search.clone());
        }
        Predicate::from_document(&Value::Object(doc))
    }

    /// Selection, paging and sort.
    ///
    /// Any included path makes the selection an `only`; otherwise excluded
    /// paths make it an `except`.
    pub fn find_options(&self) -> Result<FindOptions> {
        let included: Vec<&str> = self
            .fields
            .iter()
            .filter(|(_, inc)| *inc)
            .map(|(p, _)| p.as_str())
            .collect();
        let selection = if !included.is_empty() {
            FieldSelection::only(included)?
        } else if !self.fields.is_empty() {
            FieldSelection::except(self.fields.iter().map(|(p, _)| p.as_str()))?
        } else {
            FieldSelection::All
        };
        Ok(FindOptions {
            selection,
            limit: self.limit,
            offset: self.skip.unwrap_or(0),
            sort: self.sort.clone(),
        })
    }
}

fn operator_for(method: &str) -> &'static str {
    match method {
        "notEquals" => "$ne",
        "gt" => "$gt",
        "gte" => "$gte",
        "lt" => "$lt",
        "lte" => "$lte",
        "within" => "$in",
        "contains" => "$all",
        _ => "$exists",
    }
}

fn expect_str<'a>(method: &str, arg: &'a Value) -> Result<&'a str> {
    arg.as_str()
        .ok_or_else(|| Error::invalid_input(format!("{} expects a string, got {}", method, arg)))
}

fn expect_params<'a>(method: &str, arg: &'a Value) -> Result<&'a Map<String, Value>> {
    arg.as_object().ok_or_else(|| {
        Error::invalid_input(format!("{} expects {{path: value}}, got {}", method, arg))
    })
}

fn expect_count(method: &str, arg: &Value) -> Result<usize> {
    arg.as_u64().map(|n| n as usize).ok_or_else(|| {
        Error::invalid_input(format!("{} expects a non-negative integer, got {}", method, arg))
    })
}

/// `["path", "desc", "other", "asc"]`; a negative number also means descending
fn parse_sort(mut query: Query, arg: &Value) -> Result<Query> {
    let Value::Array(items) = arg else {
        return Err(Error::invalid_input(format!(
            "sort expects [path, direction, ...], got {}",
            arg
        )));
    };
    for pair in items.chunks(2) {
        let path = expect_str("sort", &pair[0])?;
        let descending = match pair.get(1) {
            Some(Value::String(dir)) => dir.eq_ignore_ascii_case("desc"),
            Some(Value::Number(n)) => n.as_f64().map_or(false, |n| n < 0.0),
            _ => false,
        };
        query = query.sort(path, descending);
    }
    Ok(query)
}
