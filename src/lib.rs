//! widesync - path-addressed documents over a wide-column store
//!
//! widesync stores nested JSON documents as flat rows of a wide-column store,
//! one column per leaf path, and keeps a search engine in sync with every
//! write.
//!
//! # Quick Start
//!
//! ```ignore
//! use widesync::{Command, MemoryColumnStore, MemorySearchEngine, OperationRouter, SyncConfig};
//!
//! let router = OperationRouter::open(
//!     SyncConfig::default(),
//!     Arc::new(MemoryColumnStore::new()),
//!     Arc::new(MemorySearchEngine::new()),
//! );
//! router.set("items", Some(&json!("k1")), Some("tags"), json!(["x"]), 1).await?;
//! let tags = router.get("items", &json!("k1"), Some("tags")).await?;
//! ```
//!
//! # Architecture
//!
//! All operations go through the [`OperationRouter`]. The column store and
//! the search engine are collaborator traits ([`ColumnStore`],
//! [`SearchEngine`]); in-memory implementations of both ship for tests and
//! embedding.

pub use widesync_executor::*;
