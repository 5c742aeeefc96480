//! Read paths over the column store
//!
//! Reads go through the schema registry: any column a query filters on is
//! declared and flagged indexed first, and the collection is migrated before
//! the query is issued. Rows are rebuilt into documents on the way out; a row
//! that cannot be rebuilt is skipped by scans and reported by point reads.

use crate::schema::{CollectionSchema, SchemaRegistry};
use crate::store::{ColumnStore, QueryOptions, SortKey};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use widesync_core::predicate::{Comparison, Condition};
use widesync_core::{
    decode_composite, unflatten, Error, FieldSelection, FlatRow, Predicate, PrimaryKey, Result,
    COMPOSITE_KEY_TAG, ID_FIELD,
};

/// Shape of a `find`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Fields to return
    pub selection: FieldSelection,
    /// Maximum number of documents
    pub limit: Option<usize>,
    /// Documents to skip
    pub offset: usize,
    /// Sort clauses; dropped without clustering keys
    pub sort: Vec<SortKey>,
}

/// Document reads for every collection of one store
pub struct RowReader {
    store: Arc<dyn ColumnStore>,
    registry: Arc<SchemaRegistry>,
}

impl RowReader {
    /// Reader over `store`, resolving schemas through `registry`
    pub fn new(store: Arc<dyn ColumnStore>, registry: Arc<SchemaRegistry>) -> Self {
        Self { store, registry }
    }

    /// The registry reads resolve schemas through
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Current stored row for a key; absent is not an error
    pub async fn load_row(
        &self,
        schema: &CollectionSchema,
        key: &PrimaryKey,
    ) -> Result<Option<FlatRow>> {
        let predicate = Predicate::by_key(&schema.pk_names(), key)?;
        self.store.query_one(schema.name(), &predicate).await
    }

    /// One document by key
    pub async fn get(&self, collection: &str, key: &PrimaryKey) -> Result<Option<Value>> {
        let schema = self.registry.collection(collection).await?;
        match self.load_row(&schema, key).await? {
            Some(row) => Ok(Some(unflatten(collection, &row, &schema.pk_names())?)),
            None => Ok(None),
        }
    }

    /// Documents for several keys, in the order given.
    ///
    /// Missing and corrupt rows are left out.
    pub async fn get_many(&self, collection: &str, keys: &[PrimaryKey]) -> Result<Vec<Value>> {
        let schema = self.registry.collection(collection).await?;
        let pk = schema.pk_names();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if key.arity() != pk.len() {
                warn!(target: "widesync::reader", collection, key = %key, "Skipping key of wrong arity");
                continue;
            }
            if let Some(row) = self.load_row(&schema, key).await? {
                if let Ok(doc) = unflatten(collection, &row, &pk) {
                    out.push(doc);
                }
            }
        }
        Ok(out)
    }

    /// Every document of a collection, keyed by its rendered id
    pub async fn get_all(&self, collection: &str) -> Result<Map<String, Value>> {
        let schema = self.registry.collection(collection).await?;
        let pk = schema.pk_names();
        let rows = self
            .store
            .query_many(collection, &Predicate::new(), &QueryOptions::default())
            .await?;
        let mut out = Map::new();
        for row in rows {
            let Ok(doc) = unflatten(collection, &row, &pk) else {
                continue;
            };
            let id = match doc.get(ID_FIELD) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => continue,
            };
            out.insert(id, doc);
        }
        Ok(out)
    }

    /// Documents matching a predicate.
    ///
    /// A search passthrough on the predicate is ignored here; search-backed
    /// reads are resolved by the search layer.
    pub async fn find(
        &self,
        collection: &str,
        predicate: &Predicate,
        options: &FindOptions,
    ) -> Result<Vec<Value>> {
        let schema = self.registry.collection(collection).await?;
        let predicate = self.prepare(&schema, predicate).await?;
        let pk = schema.pk_names();

        let mut sort = options.sort.clone();
        if !sort.is_empty() && !schema.has_clustering_keys() {
            warn!(
                target: "widesync::reader",
                collection,
                "Sort ignored: collection has no clustering keys"
            );
            sort.clear();
        }
        let query = QueryOptions {
            limit: options.limit,
            offset: options.offset,
            sort,
            after: None,
        };
        let rows = self.store.query_many(collection, &predicate, &query).await?;
        debug!(target: "widesync::reader", collection, rows = rows.len(), "Find");

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let row = options.selection.apply(row, &pk);
            // corrupt rows were already logged by unflatten
            if let Ok(doc) = unflatten(collection, &row, &pk) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// First document matching a predicate
    pub async fn find_one(
        &self,
        collection: &str,
        predicate: &Predicate,
        selection: &FieldSelection,
    ) -> Result<Option<Value>> {
        let options = FindOptions {
            selection: selection.clone(),
            limit: Some(1),
            ..Default::default()
        };
        Ok(self
            .find(collection, predicate, &options)
            .await?
            .into_iter()
            .next())
    }

    /// Number of rows matching a predicate
    pub async fn count(&self, collection: &str, predicate: &Predicate) -> Result<u64> {
        let schema = self.registry.collection(collection).await?;
        let predicate = self.prepare(&schema, predicate).await?;
        self.store.count(collection, &predicate).await
    }

    /// One page of raw rows in primary-key order, continuing after `after`
    pub async fn scan_page(
        &self,
        collection: &str,
        after: Option<PrimaryKey>,
        limit: usize,
    ) -> Result<Vec<FlatRow>> {
        self.registry.collection(collection).await?;
        self.store
            .query_many(collection, &Predicate::new(), &QueryOptions::page(after, limit))
            .await
    }

    /// Expand composite `id` conditions and make every filtered column indexed
    async fn prepare(
        &self,
        schema: &Arc<CollectionSchema>,
        predicate: &Predicate,
    ) -> Result<Predicate> {
        let predicate = expand_composite_id(schema, predicate.without_search())?;
        let columns = predicate.indexed_columns();
        let changed = schema.ensure_indexed(columns.iter().map(String::as_str));
        if changed || schema.has_pending() {
            self.registry.migrate(schema).await?;
        }
        Ok(predicate)
    }
}

/// Rewrite an equality on an encoded composite `id` into equalities on the
/// primary-key columns.
///
/// Any other comparison against an encoded composite id cannot be expressed
/// as key-column conditions and is rejected.
fn expand_composite_id(schema: &CollectionSchema, predicate: Predicate) -> Result<Predicate> {
    let pk = schema.pk_names();
    if pk.len() < 2 {
        return Ok(predicate);
    }
    let encoded = match predicate.conditions().get(ID_FIELD) {
        Some(Condition::Eq(Value::String(s))) if s.starts_with(COMPOSITE_KEY_TAG) => s.clone(),
        Some(Condition::Ops(ops)) if ops.iter().any(names_composite_id) => {
            return Err(Error::invalid_key(format!(
                "only equality can match an encoded composite id in {}",
                schema.name()
            )));
        }
        _ => return Ok(predicate),
    };
    let components = decode_composite(&encoded)?;
    if components.len() != pk.len() {
        return Err(Error::invalid_key(format!(
            "composite key has {} components, {} expects {}",
            components.len(),
            schema.name(),
            pk.len()
        )));
    }
    let mut expanded = Predicate::new();
    for (column, condition) in predicate.conditions() {
        if column != ID_FIELD {
            expanded = match condition {
                Condition::Eq(v) => expanded.eq(column.clone(), v.clone()),
                Condition::Ops(ops) => ops
                    .iter()
                    .fold(expanded, |p, op| p.op(column.clone(), op.clone())),
            };
        }
    }
    for (column, value) in pk.into_iter().zip(components) {
        expanded = expanded.eq(column, value);
    }
    Ok(expanded)
}

fn names_composite_id(op: &Comparison) -> bool {
    let encoded = |v: &Value| v.as_str().map_or(false, |s| s.starts_with(COMPOSITE_KEY_TAG));
    match op {
        Comparison::NotEquals(v)
        | Comparison::Gt(v)
        | Comparison::Gte(v)
        | Comparison::Lt(v)
        | Comparison::Lte(v) => encoded(v),
        Comparison::Within(list) | Comparison::Contains(list) => list.iter().any(encoded),
        Comparison::Exists(_) => false,
    }
}
