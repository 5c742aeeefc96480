//! Mutation pipeline
//!
//! Every document mutation runs the same sequence of stages, each suspension
//! point being one call to the column store or the index observer:
//!
//! | Stage | Action |
//! |-------|--------|
//! | Load | read the current row by primary key (absent is not an error) |
//! | Diff | compute the new flat row; columns only in the old row become null; stop if nothing changed |
//! | Migrate | declare unknown columns and run the coalesced migration |
//! | Write | upsert the full diffed row, or delete it |
//! | Index | hand the merged old/new document to the index observer |
//! | Respond | rebuild the written document and advance the version counter |
//!
//! There is no per-document lock. Two concurrent mutations of one document
//! race at Load and the later Write wins at row granularity; callers that
//! need stronger guarantees serialize writes per key themselves.
//!
//! Array operations read the array at their path, transform it with an
//! [`ArrayOp`] and set the whole array back through the same stages.

use crate::array_ops::ArrayOp;
use crate::schema::{CollectionSchema, SchemaRegistry};
use crate::store::{ColumnStore, WriteOptions};
use crate::version::VersionCounter;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use widesync_core::limits::validate_document;
use widesync_core::{
    delete_at_path, flatten, get_at_path, set_at_path, unflatten, DocPath, Error, FlatRow,
    FlattenMode, Predicate, PrimaryKey, Result, COMPOSITE_KEY_TAG, ID_FIELD, LEGACY_ID_FIELD,
    RESERVED_PREFIX,
};

/// Receives every committed document change
#[async_trait]
pub trait IndexObserver: Send + Sync {
    /// `document` is the post-write document, or `None` after a delete.
    ///
    /// Errors are logged by the pipeline and never undo the write.
    async fn document_written(
        &self,
        collection: &str,
        key: &PrimaryKey,
        document: Option<&Value>,
    ) -> Result<()>;
}

/// A document mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Replace the whole document (`path: None`) or the value at a path
    Set { path: Option<DocPath>, value: Value },
    /// Remove the value at a path
    Unset { path: DocPath },
    /// Delete the whole document
    Remove,
    /// Transform the array at a path
    Array { path: DocPath, op: ArrayOp },
}

impl Change {
    fn name(&self) -> &'static str {
        match self {
            Change::Set { .. } => "set",
            Change::Unset { .. } => "unset",
            Change::Remove => "remove",
            Change::Array { op, .. } => op.name(),
        }
    }

    /// True when the change never reads the stored document
    fn replaces_document(&self) -> bool {
        matches!(self, Change::Remove | Change::Set { path: None, .. })
    }
}

/// Result of a mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// The document after the mutation; `None` when it does not exist
    pub document: Option<Value>,
    /// False when the diff was empty and nothing reached the store
    pub written: bool,
    /// Version counter after the mutation
    pub version: u64,
}

/// Runs mutations against one column store
pub struct MutationEngine {
    store: Arc<dyn ColumnStore>,
    registry: Arc<SchemaRegistry>,
    version: Arc<VersionCounter>,
    observer: Option<Arc<dyn IndexObserver>>,
}

impl MutationEngine {
    /// Pipeline over `store`, advancing `version` on every mutation
    pub fn new(
        store: Arc<dyn ColumnStore>,
        registry: Arc<SchemaRegistry>,
        version: Arc<VersionCounter>,
    ) -> Self {
        Self {
            store,
            registry,
            version,
            observer: None,
        }
    }

    /// Notify `observer` of every committed change
    pub fn with_observer(mut self, observer: Arc<dyn IndexObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The version counter mutations advance
    pub fn version(&self) -> &VersionCounter {
        &self.version
    }

    /// Insert a whole document, generating its key when it carries none.
    ///
    /// For a composite key, the leading key columns are read from the
    /// document's fields and only the last one may be generated.
    pub async fn insert(
        &self,
        collection: &str,
        document: Value,
        version: u64,
    ) -> Result<(PrimaryKey, MutationOutcome)> {
        let schema = self.registry.collection(collection).await?;
        let Value::Object(fields) = &document else {
            return Err(Error::invalid_input("inserted document must be an object"));
        };
        let arity = schema.primary_keys().len();
        let id = fields
            .get(ID_FIELD)
            .or_else(|| fields.get(LEGACY_ID_FIELD))
            .filter(|v| !v.is_null());
        let key = match id {
            Some(id) if arity == 1 || is_composite_encoding(id) => PrimaryKey::decode(id, arity)?,
            _ => self.generate_key(&schema, fields).await?,
        };
        let outcome = self
            .mutate(
                collection,
                &key,
                Change::Set {
                    path: None,
                    value: document,
                },
                version,
            )
            .await?;
        Ok((key, outcome))
    }

    async fn generate_key(
        &self,
        schema: &CollectionSchema,
        fields: &Map<String, Value>,
    ) -> Result<PrimaryKey> {
        let pk = schema.pk_names();
        let (last, leading) = pk
            .split_last()
            .ok_or_else(|| Error::invalid_key("collection has no primary key"))?;
        let mut components = Vec::with_capacity(pk.len());
        for column in leading {
            let value = key_field(fields, column).cloned().ok_or_else(|| {
                Error::invalid_key(format!("document is missing key column '{}'", column))
            })?;
            components.push(value);
        }
        let generated = match key_field(fields, last) {
            Some(v) if !leading.is_empty() => v.clone(),
            _ => self.store.generate_key(schema.name()).await?,
        };
        components.push(generated);
        PrimaryKey::from_components(components)
    }

    /// Apply one change to the document at `key`
    pub async fn mutate(
        &self,
        collection: &str,
        key: &PrimaryKey,
        change: Change,
        version: u64,
    ) -> Result<MutationOutcome> {
        let schema = self.registry.collection(collection).await?;
        let pk = schema.pk_names();
        let key_predicate = Predicate::by_key(&pk, key)?;
        debug!(
            target: "widesync::mutation",
            collection,
            key = %key,
            change = change.name(),
            "Mutation started"
        );

        // Load
        let old_row = self
            .store
            .query_one(collection, &key_predicate)
            .await?
            .map(strip_nulls);
        let old_doc = match &old_row {
            Some(row) => match unflatten(collection, row, &pk) {
                Ok(doc) => Some(doc),
                // the old row's columns are still nulled by the diff
                Err(Error::CorruptRecord { reason, .. }) if change.replaces_document() => {
                    warn!(
                        target: "widesync::mutation",
                        collection,
                        key = %key,
                        reason = %reason,
                        "Overwriting corrupt record"
                    );
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        // Diff
        let existed = old_row.is_some();
        let new_doc = match apply_change(collection, key, &pk, old_doc.clone(), existed, change)? {
            Applied::Document(doc) => Some(doc),
            Applied::Deleted => None,
            Applied::Unchanged => {
                return Ok(self.respond_unchanged(old_doc, version));
            }
        };
        let new_row = match &new_doc {
            Some(doc) => {
                validate_document(doc)?;
                Some(row_for_write(doc, &pk, key))
            }
            None => None,
        };
        if let (Some(old), Some(new)) = (&old_row, &new_row) {
            if old == new {
                debug!(target: "widesync::mutation", collection, key = %key, "No-op diff, write skipped");
                return Ok(self.respond_unchanged(old_doc, version));
            }
        }

        match &new_row {
            Some(new) => {
                let write = diff_rows(old_row.as_ref(), new);

                // Migrate; columns declared by a concurrent writer may still be pending
                let added = schema.ensure_columns(write.keys().map(String::as_str));
                if added || schema.has_pending() {
                    self.registry.migrate(&schema).await?;
                }

                // Write
                self.store
                    .upsert(collection, &key_predicate, &write, &WriteOptions::default())
                    .await?;

                // Index
                let merged = overlay(old_row.as_ref(), &write);
                let indexed = unflatten(collection, &merged, &pk)?;
                self.notify(collection, key, Some(&indexed)).await;
            }
            None => {
                self.store.delete(collection, &key_predicate).await?;
                self.notify(collection, key, None).await;
            }
        }

        // Respond
        let document = match &new_row {
            Some(row) => Some(unflatten(collection, row, &pk)?),
            None => None,
        };
        let version = self.version.advance(version);
        debug!(target: "widesync::mutation", collection, key = %key, version, "Mutation written");
        Ok(MutationOutcome {
            document,
            written: true,
            version,
        })
    }

    fn respond_unchanged(&self, document: Option<Value>, version: u64) -> MutationOutcome {
        MutationOutcome {
            document,
            written: false,
            version: self.version.advance(version),
        }
    }

    async fn notify(&self, collection: &str, key: &PrimaryKey, document: Option<&Value>) {
        let Some(observer) = &self.observer else {
            return;
        };
        if let Err(e) = observer.document_written(collection, key, document).await {
            warn!(
                target: "widesync::mutation",
                collection,
                key = %key,
                error = %e,
                "Index update failed; column-store write stands"
            );
        }
    }
}

fn is_composite_encoding(id: &Value) -> bool {
    id.as_str().map_or(false, |s| s.starts_with(COMPOSITE_KEY_TAG))
}

/// A key column's value among a document's fields; `id` may be spelled `_id`
fn key_field<'a>(fields: &'a Map<String, Value>, column: &str) -> Option<&'a Value> {
    let value = match fields.get(column) {
        None if column == ID_FIELD => fields.get(LEGACY_ID_FIELD),
        found => found,
    };
    value.filter(|v| !v.is_null())
}

/// True when a document's `id` names `key`: either the key's own id value, or,
/// for a composite key with an `id` column, that column's component
fn id_matches(id: &Value, key: &PrimaryKey, primary_keys: &[String]) -> bool {
    if *id == key.to_id_value() {
        return true;
    }
    primary_keys
        .iter()
        .position(|c| c == ID_FIELD)
        .and_then(|pos| key.components().get(pos).cloned())
        .map_or(false, |component| component == *id)
}

enum Applied {
    Document(Value),
    Deleted,
    Unchanged,
}

fn apply_change(
    collection: &str,
    key: &PrimaryKey,
    primary_keys: &[String],
    old: Option<Value>,
    existed: bool,
    change: Change,
) -> Result<Applied> {
    let mut doc = old.unwrap_or_else(|| Value::Object(Map::new()));
    match change {
        Change::Set { path: None, value } => {
            if !value.is_object() {
                return Err(Error::invalid_input(format!(
                    "document must be an object, got {}",
                    value
                )));
            }
            if let Some(id) = value.get(ID_FIELD).or_else(|| value.get(LEGACY_ID_FIELD)) {
                if !id.is_null() && !id_matches(id, key, primary_keys) {
                    return Err(Error::invalid_key(format!(
                        "document id {} does not match key {}",
                        id, key
                    )));
                }
            }
            Ok(Applied::Document(value))
        }
        Change::Set {
            path: Some(path),
            value,
        } => {
            if path.is_id() {
                return if value == key.to_id_value() {
                    Ok(Applied::Unchanged)
                } else {
                    Err(Error::invalid_path("cannot change an id"))
                };
            }
            set_at_path(&mut doc, &path, value)?;
            Ok(Applied::Document(doc))
        }
        Change::Unset { path } => {
            if path.is_id() {
                return Err(Error::invalid_path("cannot delete an id"));
            }
            if !existed {
                return Ok(Applied::Unchanged);
            }
            delete_at_path(&mut doc, &path);
            Ok(Applied::Document(doc))
        }
        Change::Remove => {
            if existed {
                Ok(Applied::Deleted)
            } else {
                Err(Error::RecordNotFound {
                    collection: collection.to_string(),
                    key: key.to_string(),
                })
            }
        }
        Change::Array { path, op } => {
            let items = match get_at_path(&doc, &path) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items.clone(),
                Some(_) => {
                    return Err(Error::NotAnArray {
                        path: path.to_string(),
                    })
                }
            };
            set_at_path(&mut doc, &path, Value::Array(op.apply(items)))?;
            Ok(Applied::Document(doc))
        }
    }
}

/// Flat row to store for `doc`: the key columns come from `key`, never from
/// the document's `id`.
fn row_for_write(doc: &Value, primary_keys: &[String], key: &PrimaryKey) -> FlatRow {
    let mut row = flatten(doc, FlattenMode::Write);
    row.remove(ID_FIELD);
    row.retain(|column, value| {
        !value.is_null()
            && !column.starts_with(RESERVED_PREFIX)
            && !primary_keys.iter().any(|k| k == column)
    });
    for (column, value) in primary_keys.iter().zip(key.components()) {
        row.insert(column.clone(), value);
    }
    row
}

fn strip_nulls(mut row: FlatRow) -> FlatRow {
    row.retain(|_, v| !v.is_null());
    row
}

/// Columns to write: the new row plus an explicit null for every column that
/// only the old row has
pub fn diff_rows(old: Option<&FlatRow>, new: &FlatRow) -> FlatRow {
    let mut write = new.clone();
    if let Some(old) = old {
        for column in old.keys() {
            if !write.contains_key(column) {
                write.insert(column.clone(), Value::Null);
            }
        }
    }
    write
}

/// Old row with `write` laid over it; null columns in `write` remove values
pub fn overlay(old: Option<&FlatRow>, write: &FlatRow) -> FlatRow {
    let mut merged = old.cloned().unwrap_or_default();
    for (column, value) in write {
        if value.is_null() {
            merged.remove(column);
        } else {
            merged.insert(column.clone(), value.clone());
        }
    }
    merged
}
