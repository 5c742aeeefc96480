//! The operation router - single entry point to widesync.
//!
//! The router owns the process-wide pieces (column store handle, schema
//! registry, version counter, search synchronization) and turns each verb
//! addressed by collection, id and path into a mutation or a read.
//!
//! # Id handling
//!
//! - `id` and `_id` both name the primary key, as a document field and as a
//!   path.
//! - A whole-document `set` without an id inserts under a generated key.
//! - A whole-document `set` whose id is dotted (`"k1.a.b"`) sets path `a.b`
//!   of document `k1`.
//! - `del` on path `id` is rejected.

use crate::command::Command;
use crate::output::Output;
use crate::query::{Query, QueryKind};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use widesync_core::{
    get_at_path, DocPath, Error, PrimaryKey, Result, ID_FIELD, LEGACY_ID_FIELD,
};
use widesync_engine::{
    ArrayOp, Change, ColumnStore, MutationEngine, MutationOutcome, RowReader, SchemaRegistry,
    SyncConfig, VersionCounter,
};
use widesync_search::{ReindexStats, SearchEngine, SearchSync};

/// Routes document operations to the mutation engine and the read paths.
///
/// # Thread Safety
///
/// `OperationRouter` is `Send + Sync`; share it behind an `Arc` and issue
/// operations concurrently. Concurrent writes to one document are
/// last-write-wins.
///
/// # Example
///
/// ```ignore
/// use widesync::{Command, OperationRouter, SyncConfig};
///
/// let router = OperationRouter::open(SyncConfig::default(), store, search);
/// let out = router.execute(Command::Get {
///     collection: "items".into(),
///     id: json!("k1"),
///     path: Some("tags".into()),
/// }).await?;
/// ```
pub struct OperationRouter {
    store: Arc<dyn ColumnStore>,
    registry: Arc<SchemaRegistry>,
    reader: Arc<RowReader>,
    mutations: MutationEngine,
    search: Arc<SearchSync>,
    version: Arc<VersionCounter>,
}

impl OperationRouter {
    /// Wire the components over a column store and a search engine
    pub fn open(
        config: SyncConfig,
        store: Arc<dyn ColumnStore>,
        search_engine: Arc<dyn SearchEngine>,
    ) -> Self {
        let registry = Arc::new(SchemaRegistry::new(Arc::clone(&store), Arc::new(config)));
        let reader = Arc::new(RowReader::new(Arc::clone(&store), Arc::clone(&registry)));
        let search = Arc::new(SearchSync::new(search_engine, Arc::clone(&reader)));
        let version = Arc::new(VersionCounter::new());
        let mutations = MutationEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&version),
        )
        .with_observer(search.clone());
        Self {
            store,
            registry,
            reader,
            mutations,
            search,
            version,
        }
    }

    /// Like [`open`](Self::open), reading configuration from a `widesync.toml`
    pub fn open_with_config_file(
        path: &Path,
        store: Arc<dyn ColumnStore>,
        search_engine: Arc<dyn SearchEngine>,
    ) -> Result<Self> {
        Ok(Self::open(SyncConfig::load(path)?, store, search_engine))
    }

    /// Current value of the version counter
    pub fn version(&self) -> u64 {
        self.version.current()
    }

    /// Search synchronization for this router
    pub fn search(&self) -> &Arc<SearchSync> {
        &self.search
    }

    /// Document reads for this router
    pub fn reader(&self) -> &Arc<RowReader> {
        &self.reader
    }

    async fn key_for(&self, collection: &str, id: &Value) -> Result<PrimaryKey> {
        let schema = self.registry.collection(collection).await?;
        PrimaryKey::decode(id, schema.primary_keys().len())
    }

    fn respond(&self, outcome: MutationOutcome) -> Output {
        Output::Value {
            value: outcome.document,
            version: outcome.version,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// A document, or the value at `path` within it
    pub async fn get(&self, collection: &str, id: &Value, path: Option<&str>) -> Result<Output> {
        let key = self.key_for(collection, id).await?;
        let document = self.reader.get(collection, &key).await?;
        let value = match (document, path.map(parse_path).transpose()?) {
            (Some(doc), Some(path)) => get_at_path(&doc, &path).cloned(),
            (doc, None) => doc,
            (None, Some(_)) => None,
        };
        Ok(Output::Value {
            value,
            version: self.version(),
        })
    }

    /// Every document of a collection, by rendered id
    pub async fn get_collection(&self, collection: &str) -> Result<Map<String, Value>> {
        self.reader.get_all(collection).await
    }

    /// Run a query; search passthroughs resolve through the search engine
    pub async fn query(&self, query: &Query) -> Result<Output> {
        let collection = query.collection();
        let predicate = query.predicate()?;
        let mut options = query.find_options()?;
        match query.kind() {
            QueryKind::Find => Ok(Output::Documents(
                self.search
                    .search_documents(collection, &predicate, &options)
                    .await?,
            )),
            QueryKind::FindOne => {
                options.limit = Some(1);
                let found = self
                    .search
                    .search_documents(collection, &predicate, &options)
                    .await?;
                Ok(Output::Document(found.into_iter().next()))
            }
            QueryKind::Count if predicate.search().is_some() => {
                options.limit = None;
                options.offset = 0;
                let found = self
                    .search
                    .search_documents(collection, &predicate, &options)
                    .await?;
                Ok(Output::Count(found.len() as u64))
            }
            QueryKind::Count => Ok(Output::Count(
                self.reader.count(collection, &predicate).await?,
            )),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Set a whole document or the value at a path.
    ///
    /// Without an id the document is inserted under a generated key.
    pub async fn set(
        &self,
        collection: &str,
        id: Option<&Value>,
        path: Option<&str>,
        value: Value,
        version: u64,
    ) -> Result<Output> {
        let Some(id) = id else {
            if path.is_some() {
                return Err(Error::invalid_input("a path set needs a document id"));
            }
            return self.insert(collection, value, version).await;
        };
        let (id, path) = match path {
            Some(path) => (id.clone(), Some(parse_path(path)?)),
            None => match split_dotted_id(id) {
                Some((head, rest)) => (head, Some(parse_path(&rest)?)),
                None => (id.clone(), None),
            },
        };
        let key = self.key_for(collection, &id).await?;
        let outcome = self
            .mutations
            .mutate(collection, &key, Change::Set { path, value }, version)
            .await?;
        Ok(self.respond(outcome))
    }

    async fn insert(&self, collection: &str, document: Value, version: u64) -> Result<Output> {
        let (key, outcome) = self.mutations.insert(collection, document, version).await?;
        let id = key.to_id_value();
        debug!(target: "widesync::router", collection, id = %key, "Inserted");
        Ok(Output::Inserted {
            id: id.clone(),
            document: outcome
                .document
                .unwrap_or_else(|| serde_json::json!({ ID_FIELD: id })),
            version: outcome.version,
        })
    }

    /// Delete a whole document, or the value at a path
    pub async fn del(
        &self,
        collection: &str,
        id: &Value,
        path: Option<&str>,
        version: u64,
    ) -> Result<Output> {
        let key = self.key_for(collection, id).await?;
        let change = match path {
            Some(path) => Change::Unset {
                path: parse_path(path)?,
            },
            None => Change::Remove,
        };
        let outcome = self.mutations.mutate(collection, &key, change, version).await?;
        Ok(self.respond(outcome))
    }

    /// Apply an array operation to the array at `path`
    pub async fn array(
        &self,
        collection: &str,
        id: &Value,
        path: &str,
        op: ArrayOp,
        version: u64,
    ) -> Result<Output> {
        let key = self.key_for(collection, id).await?;
        let change = Change::Array {
            path: parse_path(path)?,
            op,
        };
        let outcome = self.mutations.mutate(collection, &key, change, version).await?;
        Ok(self.respond(outcome))
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rebuild a collection's search projections
    pub async fn reindex(&self, collection: &str) -> Result<ReindexStats> {
        self.search.reindex(collection).await
    }

    /// Drop a collection's table, cached schema and projections.
    ///
    /// Failing to clear projections is logged; the table is gone either way.
    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.registry.collection(collection).await?;
        self.store.drop_collection(collection).await?;
        self.registry.forget(collection);
        if let Err(e) = self.search.drop_collection(collection).await {
            warn!(
                target: "widesync::router",
                collection,
                error = %e,
                "Dropped collection but could not clear its projections"
            );
        }
        Ok(())
    }

    /// Issue pending search commits now
    pub async fn flush(&self) -> Result<()> {
        self.search.flush().await
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Execute a single command
    pub async fn execute(&self, command: Command) -> Result<Output> {
        debug!(target: "widesync::router", command = command.name(), "Executing");
        match command {
            Command::Get {
                collection,
                id,
                path,
            } => self.get(&collection, &id, path.as_deref()).await,
            Command::GetCollection { collection } => {
                Ok(Output::Collection(self.get_collection(&collection).await?))
            }
            Command::Query { query } => self.query(&Query::from_json(&query)?).await,
            Command::Set {
                collection,
                id,
                path,
                value,
                version,
            } => {
                self.set(&collection, id.as_ref(), path.as_deref(), value, version)
                    .await
            }
            Command::Del {
                collection,
                id,
                path,
                version,
            } => self.del(&collection, &id, path.as_deref(), version).await,
            Command::Push {
                collection,
                id,
                path,
                values,
                version,
            } => {
                self.array(&collection, &id, &path, ArrayOp::Push(values), version)
                    .await
            }
            Command::Pop {
                collection,
                id,
                path,
                version,
            } => self.array(&collection, &id, &path, ArrayOp::Pop, version).await,
            Command::Shift {
                collection,
                id,
                path,
                version,
            } => {
                self.array(&collection, &id, &path, ArrayOp::Shift, version)
                    .await
            }
            Command::Unshift {
                collection,
                id,
                path,
                values,
                version,
            } => {
                self.array(&collection, &id, &path, ArrayOp::Unshift(values), version)
                    .await
            }
            Command::Insert {
                collection,
                id,
                path,
                index,
                values,
                version,
            } => {
                self.array(
                    &collection,
                    &id,
                    &path,
                    ArrayOp::Insert { index, values },
                    version,
                )
                .await
            }
            Command::Remove {
                collection,
                id,
                path,
                index,
                count,
                version,
            } => {
                self.array(
                    &collection,
                    &id,
                    &path,
                    ArrayOp::Remove { index, count },
                    version,
                )
                .await
            }
            Command::Move {
                collection,
                id,
                path,
                from,
                to,
                count,
                version,
            } => {
                self.array(
                    &collection,
                    &id,
                    &path,
                    ArrayOp::Move { from, to, count },
                    version,
                )
                .await
            }
            Command::Reindex { collection } => {
                let stats = self.reindex(&collection).await?;
                Ok(Output::Reindexed {
                    indexed: stats.indexed,
                    skipped: stats.skipped,
                })
            }
            Command::DropCollection { collection } => {
                self.drop_collection(&collection).await?;
                Ok(Output::Unit)
            }
            Command::Flush => {
                self.flush().await?;
                Ok(Output::Unit)
            }
        }
    }
}

/// Parse a caller path; `_id` is the primary key like `id`
fn parse_path(path: &str) -> Result<DocPath> {
    if path == LEGACY_ID_FIELD {
        DocPath::parse(ID_FIELD)
    } else {
        DocPath::parse(path)
    }
}

/// `"k1.a.b"` -> (`"k1"`, `"a.b"`)
fn split_dotted_id(id: &Value) -> Option<(Value, String)> {
    let (head, rest) = id.as_str()?.split_once('.')?;
    if head.is_empty() || rest.is_empty() {
        return None;
    }
    Some((Value::String(head.to_string()), rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_ids_split_once() {
        assert_eq!(
            split_dotted_id(&json!("k1.a.b")),
            Some((json!("k1"), "a.b".to_string()))
        );
        assert_eq!(split_dotted_id(&json!("k1")), None);
        assert_eq!(split_dotted_id(&json!(42)), None);
        assert_eq!(split_dotted_id(&json!(".a")), None);
    }

    #[test]
    fn legacy_id_path_is_id() {
        assert!(parse_path("_id").unwrap().is_id());
        assert!(!parse_path("name").unwrap().is_id());
    }
}
