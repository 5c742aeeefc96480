//! Mutation engine for widesync
//!
//! This crate maps document mutations onto the wide-column store:
//! - Store: the column-store collaborator trait and an in-memory store
//! - Schema: per-collection field registry with coalesced migrations
//! - Mutation: the Load -> Diff -> Migrate -> Write -> Index -> Respond pipeline
//! - Reader: point reads, finds, counts and key-ordered scans
//! - Config: `widesync.toml` settings
//!
//! The engine is the only component that issues column-store calls. Search
//! indexing hangs off the pipeline through [`IndexObserver`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array_ops;
pub mod coalesce;
pub mod config;
pub mod memory;
pub mod mutation;
pub mod reader;
pub mod schema;
pub mod store;
pub mod version;

pub use array_ops::ArrayOp;
pub use coalesce::Coalescer;
pub use config::{CollectionConfig, FieldConfig, SearchConfig, SchemaConfig, SyncConfig};
pub use memory::{MemoryColumnStore, StoreStats};
pub use mutation::{Change, IndexObserver, MutationEngine, MutationOutcome};
pub use reader::{FindOptions, RowReader};
pub use schema::{
    compute_partition_key_count, CollectionSchema, FieldDef, KeyColumn, SchemaRegistry, SearchMode,
};
pub use store::{
    ColumnDef, ColumnStore, ColumnType, QueryOptions, SortKey, TableDef, WriteOptions,
};
pub use version::VersionCounter;
