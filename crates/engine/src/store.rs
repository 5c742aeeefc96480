//! Column-store collaborator interface
//!
//! The wide-column store is reached only through [`ColumnStore`]. Connection
//! management, the wire protocol and transport retries live behind it.
//!
//! A table has a fixed primary key (partition prefix + clustering remainder)
//! and one column per flattened document path. Writes name columns that must
//! already exist; the schema registry migrates the table before a write that
//! introduces new ones.
//!
//! Upsert semantics: a null column value clears that column.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use widesync_core::{FlatRow, Predicate, PrimaryKey, Result};

/// Declared type of a column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Untyped; the default for columns discovered from documents
    #[default]
    Object,
    /// UTF-8 text
    Text,
    /// 64-bit integer
    Int,
    /// 64-bit float
    Double,
    /// Boolean
    Boolean,
    /// Date and time
    Timestamp,
    /// Opaque bytes
    Blob,
}

/// A column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Column type
    pub column_type: ColumnType,
    /// Whether queries may filter on the column
    pub indexed: bool,
}

/// A table definition handed to [`ColumnStore::define_collection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table (collection) name
    pub name: String,
    /// Non-key columns
    pub columns: Vec<ColumnDef>,
    /// Primary-key columns in key order
    pub primary_keys: Vec<String>,
    /// How many leading primary-key columns form the partition key
    pub partition_key_count: usize,
}

/// One sort clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Column to sort on
    pub column: String,
    /// Descending order
    pub descending: bool,
}

impl SortKey {
    /// Ascending sort on `column`
    pub fn asc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: false,
        }
    }

    /// Descending sort on `column`
    pub fn desc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: true,
        }
    }
}

/// Options for [`ColumnStore::query_many`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Maximum number of rows
    pub limit: Option<usize>,
    /// Rows to skip
    pub offset: usize,
    /// Sort clauses
    pub sort: Vec<SortKey>,
    /// Continuation token: only rows whose key sorts after this one
    pub after: Option<PrimaryKey>,
}

impl QueryOptions {
    /// One page in primary-key order, continuing after `after`
    pub fn page(after: Option<PrimaryKey>, limit: usize) -> Self {
        QueryOptions {
            limit: Some(limit),
            after,
            ..Default::default()
        }
    }
}

/// Options for [`ColumnStore::upsert`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Only insert; leave an existing row untouched
    pub if_not_exists: bool,
}

/// The wide-column store
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Create the table if it does not exist
    async fn define_collection(&self, table: &TableDef) -> Result<()>;

    /// First row matching the predicate
    async fn query_one(&self, collection: &str, predicate: &Predicate) -> Result<Option<FlatRow>>;

    /// Rows matching the predicate, in primary-key order unless sorted
    async fn query_many(
        &self,
        collection: &str,
        predicate: &Predicate,
        options: &QueryOptions,
    ) -> Result<Vec<FlatRow>>;

    /// Number of rows matching the predicate
    async fn count(&self, collection: &str, predicate: &Predicate) -> Result<u64>;

    /// Insert or update the row pinned by `key`
    async fn upsert(
        &self,
        collection: &str,
        key: &Predicate,
        columns: &FlatRow,
        options: &WriteOptions,
    ) -> Result<()>;

    /// Delete the rows matching the predicate
    async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<()>;

    /// Add columns to an existing table, or flag existing ones as indexed
    async fn alter_schema(&self, collection: &str, columns: &[ColumnDef]) -> Result<()>;

    /// A fresh key value for a new row
    async fn generate_key(&self, collection: &str) -> Result<Value>;

    /// Drop the table and all its rows
    async fn drop_collection(&self, collection: &str) -> Result<()>;
}
