//! Search synchronization
//!
//! [`SearchSync`] keeps one search document per stored row. It observes the
//! mutation pipeline, provisions each collection's core on first use, debounces
//! commits, rebuilds whole collections on demand and answers search-backed
//! finds.
//!
//! Failure policy: indexing failures are reported (log + error callback) and
//! never undo a column-store write; search failures degrade a read to an empty
//! result.

use crate::commit::{CommitScheduler, ErrorSink};
use crate::engine::{DeleteTarget, SearchEngine, SearchQuery, SearchRequest, SubmitOptions};
use crate::projection::{project_document, SearchProjection, COLLECTION_FIELD};
use crate::provision::Provisioner;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use widesync_core::{unflatten, Error, Predicate, PrimaryKey, Result};
use widesync_engine::config::SyncConfig;
use widesync_engine::mutation::IndexObserver;
use widesync_engine::reader::{FindOptions, RowReader};
use widesync_engine::schema::SchemaRegistry;

/// Outcome of a [`SearchSync::reindex`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexStats {
    /// Rows submitted
    pub indexed: u64,
    /// Rows that could not be rebuilt into documents
    pub skipped: u64,
}

/// Search-index synchronization for every collection of one store
pub struct SearchSync {
    engine: Arc<dyn SearchEngine>,
    reader: Arc<RowReader>,
    provisioner: Provisioner,
    commits: CommitScheduler,
    errors: ErrorSink,
}

impl SearchSync {
    /// Sync for the collections `reader` serves
    pub fn new(engine: Arc<dyn SearchEngine>, reader: Arc<RowReader>) -> Self {
        let errors = ErrorSink::default();
        let window = reader.registry().config().commit_within();
        Self {
            provisioner: Provisioner::new(Arc::clone(&engine)),
            commits: CommitScheduler::new(Arc::clone(&engine), window, errors.clone()),
            engine,
            reader,
            errors,
        }
    }

    /// Register a callback for non-fatal indexing errors
    pub fn on_index_error<F>(&self, callback: F)
    where
        F: Fn(&str, &Error) + Send + Sync + 'static,
    {
        self.errors.set(Arc::new(callback));
    }

    fn registry(&self) -> &SchemaRegistry {
        self.reader.registry()
    }

    fn config(&self) -> &SyncConfig {
        self.registry().config()
    }

    /// True when search synchronization is configured on
    pub fn enabled(&self) -> bool {
        self.config().search.enabled
    }

    /// Core holding a collection's projections
    pub fn core_name(&self, collection: &str) -> String {
        format!("{}{}", self.config().search.core_prefix, collection)
    }

    /// Projection of one document
    pub async fn project(
        &self,
        collection: &str,
        key: &PrimaryKey,
        document: &Value,
    ) -> Result<SearchProjection> {
        let schema = self.registry().collection(collection).await?;
        Ok(project_document(&schema, key, document))
    }

    /// Provision the collection's core if its deployed config is stale
    pub async fn ensure_schema(&self, collection: &str) -> Result<()> {
        let schema = self.registry().collection(collection).await?;
        self.provisioner
            .ensure(&self.core_name(collection), &schema)
            .await
    }

    /// Add or replace the projection of `key`, or delete it when `document`
    /// is `None`. The commit is debounced.
    pub async fn index(
        &self,
        collection: &str,
        key: &PrimaryKey,
        document: Option<&Value>,
    ) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.ensure_schema(collection).await?;
        let core = self.core_name(collection);
        match document {
            Some(doc) => {
                let projection = self.project(collection, key, doc).await?;
                let options = SubmitOptions {
                    commit_within: Some(self.config().commit_within()),
                };
                self.engine
                    .submit(&core, projection.into_submission(), &options)
                    .await?;
            }
            None => {
                self.engine
                    .delete(&core, &DeleteTarget::Id(key.to_token()))
                    .await?;
            }
        }
        debug!(target: "widesync::search", collection, key = %key, "Projection updated");
        self.commits.schedule(&core, collection);
        Ok(())
    }

    /// Rebuild every projection of a collection from the column store.
    ///
    /// Existing projections are deleted, rows are paged in primary-key order
    /// by key continuation, and a single commit ends the pass. Rows that cannot
    /// be rebuilt are skipped. Re-running after an abort converges on the
    /// same state.
    pub async fn reindex(&self, collection: &str) -> Result<ReindexStats> {
        let schema = self.registry().collection(collection).await?;
        let pk = schema.pk_names();
        self.ensure_schema(collection).await?;
        let core = self.core_name(collection);
        let page_size = self.config().search.reindex_page_size;

        self.engine
            .delete(&core, &DeleteTarget::Query(collection_query(collection)))
            .await?;

        let mut stats = ReindexStats::default();
        let mut after: Option<PrimaryKey> = None;
        loop {
            let rows = self.reader.scan_page(collection, after.clone(), page_size).await?;
            let fetched = rows.len();
            for row in rows {
                let components: Option<Vec<Value>> =
                    pk.iter().map(|c| row.get(c).cloned()).collect();
                let Some(key) = components.and_then(|c| PrimaryKey::from_components(c).ok())
                else {
                    stats.skipped += 1;
                    continue;
                };
                match unflatten(collection, &row, &pk) {
                    Ok(doc) => {
                        let projection = project_document(&schema, &key, &doc);
                        self.engine
                            .submit(&core, projection.into_submission(), &SubmitOptions::default())
                            .await?;
                        stats.indexed += 1;
                    }
                    Err(_) => stats.skipped += 1,
                }
                after = Some(key);
            }
            if fetched < page_size {
                break;
            }
        }

        self.commits.cancel(&core);
        self.engine.commit(&core).await?;
        info!(
            target: "widesync::search",
            collection,
            indexed = stats.indexed,
            skipped = stats.skipped,
            "Reindex complete"
        );
        Ok(stats)
    }

    /// Documents matching a predicate that carries a search passthrough, in
    /// the engine's ranking order.
    ///
    /// Column conditions alongside the search are applied to the resolved
    /// rows. Any search-engine failure yields an empty result.
    pub async fn search_documents(
        &self,
        collection: &str,
        predicate: &Predicate,
        options: &FindOptions,
    ) -> Result<Vec<Value>> {
        let Some(search) = predicate.search() else {
            return self.reader.find(collection, predicate, options).await;
        };
        let mut request = SearchRequest::from_value(search)?;
        if !self.enabled() {
            warn!(target: "widesync::search", collection, "Search disabled; empty result");
            return Ok(Vec::new());
        }

        let schema = self.registry().collection(collection).await?;
        let pk = schema.pk_names();
        let remaining = predicate.without_search();
        let post_filtered = !remaining.is_empty();

        request.query.filters.insert(
            COLLECTION_FIELD.to_string(),
            Value::String(collection.to_string()),
        );
        request.options.multicore |= self.config().search.multicore;
        if post_filtered {
            request.options.offset = 0;
            request.options.limit = None;
        } else {
            if request.options.offset == 0 {
                request.options.offset = options.offset;
            }
            if request.options.limit.is_none() {
                request.options.limit = options.limit;
            }
        }

        let core = self.core_name(collection);
        let searched = match self.ensure_schema(collection).await {
            Ok(()) => {
                self.engine
                    .search(&core, &request.query, &request.options)
                    .await
            }
            Err(e) => Err(e),
        };
        let results = match searched {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    target: "widesync::search",
                    collection,
                    error = %e,
                    "Search failed; returning no results"
                );
                return Ok(Vec::new());
            }
        };

        let mut out = Vec::with_capacity(results.hits.len());
        for hit in &results.hits {
            let Ok(key) = PrimaryKey::from_token(&hit.id) else {
                warn!(target: "widesync::search", collection, id = %hit.id, "Unreadable search id");
                continue;
            };
            if key.arity() != pk.len() {
                continue;
            }
            let Some(row) = self.reader.load_row(&schema, &key).await? else {
                // projection of a row deleted since the last commit
                continue;
            };
            if !remaining.matches(&row) {
                continue;
            }
            let row = options.selection.apply(row, &pk);
            if let Ok(doc) = unflatten(collection, &row, &pk) {
                out.push(doc);
            }
        }

        if post_filtered {
            let limit = options.limit.unwrap_or(usize::MAX);
            out = out.into_iter().skip(options.offset).take(limit).collect();
        }
        Ok(out)
    }

    /// Commit every pending debounced commit now
    pub async fn flush(&self) -> Result<()> {
        self.commits.flush().await
    }

    /// Remove every projection of a dropped collection
    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let core = self.core_name(collection);
        self.commits.cancel(&core);
        self.engine
            .delete(&core, &DeleteTarget::Query(collection_query(collection)))
            .await?;
        self.engine.commit(&core).await?;
        self.provisioner.forget(&core);
        Ok(())
    }
}

fn collection_query(collection: &str) -> SearchQuery {
    SearchQuery::default().filter(COLLECTION_FIELD, Value::String(collection.to_string()))
}

#[async_trait]
impl IndexObserver for SearchSync {
    async fn document_written(
        &self,
        collection: &str,
        key: &PrimaryKey,
        document: Option<&Value>,
    ) -> Result<()> {
        let outcome = self.index(collection, key, document).await;
        if let Err(e) = &outcome {
            self.errors.report(collection, e);
        }
        outcome
    }
}
