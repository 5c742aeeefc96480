//! Search-index synchronization for widesync
//!
//! This crate keeps a search engine consistent with the column store:
//! - Engine: the search-engine collaborator trait and an in-memory engine
//! - Projection: the type-suffixed, indexable subset of a document
//! - Provision: per-collection core config, pushed only when it changes
//! - Commit: debounced per-core commits
//! - Sync: the index observer, full reindex and search-backed finds
//!
//! # Usage
//!
//! ```ignore
//! use widesync_search::{MemorySearchEngine, SearchSync};
//!
//! let sync = Arc::new(SearchSync::new(Arc::new(MemorySearchEngine::new()), reader));
//! let engine = MutationEngine::new(store, registry, version).with_observer(sync.clone());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod engine;
pub mod memory;
pub mod projection;
pub mod provision;
pub mod sync;

pub use commit::{CommitScheduler, ErrorSink, IndexErrorCallback};
pub use engine::{
    Attachment, ConfigFiles, DeleteTarget, MultipartPayload, SearchDocument, SearchEngine,
    SearchHit, SearchOptions, SearchQuery, SearchRequest, SearchResults, SubmitOptions, Submission,
};
pub use memory::{MemorySearchEngine, SearchStats};
pub use projection::{project_document, SearchProjection, COLLECTION_FIELD, KEY_FIELD};
pub use provision::{render_config, Provisioner};
pub use sync::{ReindexStats, SearchSync};
