//! Schema registry
//!
//! Per-collection, append-only field metadata. A collection's schema grows as
//! new document paths are observed; fields are never removed.
//!
//! ```text
//! write introduces "foo.bar"
//!   -> ensure_columns()  declares it (Object, indexed) and marks it pending
//!   -> migrate()         one coalesced alter_schema call per collection
//!   -> write proceeds
//! ```
//!
//! Collection handles are created lazily on first use. Concurrent first
//! accesses share a single `define_collection` call.

use crate::coalesce::Coalescer;
use crate::config::{FieldConfig, SyncConfig};
use crate::store::{ColumnDef, ColumnStore, ColumnType, TableDef};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use widesync_core::{Error, Result, ID_FIELD, RESERVED_PREFIX};

/// A primary-key column and its rank in the key declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    /// Column name
    pub name: String,
    /// Ordering rank; ranks below the partition threshold partition
    #[serde(default)]
    pub rank: u32,
}

impl KeyColumn {
    /// Key column `name` with `rank`
    pub fn new(name: impl Into<String>, rank: u32) -> Self {
        KeyColumn {
            name: name.into(),
            rank,
        }
    }
}

/// How a field reaches the search engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Submitted as a structured, type-suffixed field
    #[default]
    Indexed,
    /// Never submitted
    Excluded,
    /// Base64 content submitted as a multipart attachment for extraction
    Binary,
}

/// A declared field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Column name
    pub name: String,
    /// Declared column type
    pub column_type: ColumnType,
    /// Whether queries may filter on the column
    pub indexed: bool,
    /// How the field reaches the search index
    pub search: SearchMode,
}

impl FieldDef {
    /// Definition given to fields first seen in a document
    pub fn discovered(name: impl Into<String>) -> Self {
        FieldDef {
            name: name.into(),
            column_type: ColumnType::Object,
            indexed: true,
            search: SearchMode::Indexed,
        }
    }

    fn from_config(name: &str, config: &FieldConfig) -> Self {
        FieldDef {
            name: name.to_string(),
            column_type: config.column_type,
            indexed: true,
            search: config.search,
        }
    }

    fn column_def(&self) -> ColumnDef {
        ColumnDef {
            name: self.name.clone(),
            column_type: self.column_type,
            indexed: self.indexed,
        }
    }
}

/// Number of leading primary-key columns that form the partition key.
///
/// Leading columns whose rank is below `threshold` are partition columns. When
/// that takes every column of a multi-column key, the last one is demoted to
/// clustering so the collection can be paged. When none qualify, the first
/// column alone is the partition key.
pub fn compute_partition_key_count(keys: &[KeyColumn], threshold: u32) -> usize {
    let qualifying = keys.iter().take_while(|k| k.rank < threshold).count();
    if qualifying == 0 {
        1
    } else if qualifying == keys.len() && keys.len() > 1 {
        qualifying - 1
    } else {
        qualifying
    }
}

#[derive(Debug, Default)]
struct SchemaState {
    fields: BTreeMap<String, FieldDef>,
    /// Declared but not yet applied to the store
    pending: BTreeSet<String>,
}

/// Schema of one collection
#[derive(Debug)]
pub struct CollectionSchema {
    name: String,
    primary_keys: Vec<KeyColumn>,
    partition_key_count: usize,
    state: RwLock<SchemaState>,
}

impl CollectionSchema {
    /// Schema with `primary_keys` of which the first `partition_key_count` partition
    pub fn new(
        name: impl Into<String>,
        primary_keys: Vec<KeyColumn>,
        partition_key_count: usize,
    ) -> Self {
        Self {
            name: name.into(),
            primary_keys,
            partition_key_count,
            state: RwLock::new(SchemaState::default()),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary-key columns in key order
    pub fn primary_keys(&self) -> &[KeyColumn] {
        &self.primary_keys
    }

    /// Primary-key column names in key order
    pub fn pk_names(&self) -> Vec<String> {
        self.primary_keys.iter().map(|k| k.name.clone()).collect()
    }

    /// True when `column` is a primary-key column
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys.iter().any(|k| k.name == column)
    }

    /// How many leading primary-key columns form the partition key
    pub fn partition_key_count(&self) -> usize {
        self.partition_key_count
    }

    /// True when some primary-key columns order rows within a partition
    pub fn has_clustering_keys(&self) -> bool {
        self.primary_keys.len() > self.partition_key_count
    }

    /// Declare a field without marking it pending (table creation covers it)
    pub fn declare_field(&self, field: FieldDef) {
        self.state.write().fields.insert(field.name.clone(), field);
    }

    /// Declare every column not yet known; true if any was added.
    ///
    /// Primary-key and reserved columns are never declared as fields.
    pub fn ensure_columns<'a, I>(&self, columns: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unknown: Vec<&str> = {
            let state = self.state.read();
            columns
                .into_iter()
                .filter(|c| self.is_field_column(c) && !state.fields.contains_key(*c))
                .collect()
        };
        if unknown.is_empty() {
            return false;
        }
        let mut state = self.state.write();
        let mut added = false;
        for column in unknown {
            if !state.fields.contains_key(column) {
                state
                    .fields
                    .insert(column.to_string(), FieldDef::discovered(column));
                state.pending.insert(column.to_string());
                added = true;
            }
        }
        added
    }

    /// Like [`ensure_columns`](Self::ensure_columns), but also flags existing
    /// unindexed columns as indexed. Used before a query filters on them.
    pub fn ensure_indexed<'a, I>(&self, columns: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.state.write();
        let mut changed = false;
        for column in columns {
            if !self.is_field_column(column) {
                continue;
            }
            match state.fields.get_mut(column) {
                Some(field) if field.indexed => continue,
                Some(field) => field.indexed = true,
                None => {
                    state
                        .fields
                        .insert(column.to_string(), FieldDef::discovered(column));
                }
            }
            state.pending.insert(column.to_string());
            changed = true;
        }
        changed
    }

    fn is_field_column(&self, column: &str) -> bool {
        !self.is_primary_key(column) && !column.starts_with(RESERVED_PREFIX)
    }

    /// A declared field by column name
    pub fn field(&self, name: &str) -> Option<FieldDef> {
        self.state.read().fields.get(name).cloned()
    }

    /// All declared fields, by name
    pub fn fields(&self) -> Vec<FieldDef> {
        self.state.read().fields.values().cloned().collect()
    }

    /// True when declared columns still await migration
    pub fn has_pending(&self) -> bool {
        !self.state.read().pending.is_empty()
    }

    /// Column definitions awaiting migration
    pub fn pending_columns(&self) -> Vec<ColumnDef> {
        let state = self.state.read();
        state
            .pending
            .iter()
            .filter_map(|name| state.fields.get(name).map(FieldDef::column_def))
            .collect()
    }

    fn mark_migrated(&self, columns: &[ColumnDef]) {
        let mut state = self.state.write();
        for c in columns {
            state.pending.remove(&c.name);
        }
    }

    /// Full table definition for `define_collection`
    pub fn table_def(&self) -> TableDef {
        let state = self.state.read();
        let mut columns: Vec<ColumnDef> = self
            .primary_keys
            .iter()
            .map(|k| ColumnDef {
                name: k.name.clone(),
                column_type: ColumnType::Object,
                indexed: true,
            })
            .collect();
        columns.extend(state.fields.values().map(FieldDef::column_def));
        TableDef {
            name: self.name.clone(),
            columns,
            primary_keys: self.pk_names(),
            partition_key_count: self.partition_key_count,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Lazily created, cached collection schemas over one column store
pub struct SchemaRegistry {
    store: Arc<dyn ColumnStore>,
    config: Arc<SyncConfig>,
    collections: DashMap<String, Arc<OnceCell<Arc<CollectionSchema>>>>,
    migrations: Coalescer<String, ()>,
}

impl SchemaRegistry {
    /// Registry over `store` with `config` defaults
    pub fn new(store: Arc<dyn ColumnStore>, config: Arc<SyncConfig>) -> Self {
        Self {
            store,
            config,
            collections: DashMap::new(),
            migrations: Coalescer::new(),
        }
    }

    /// Configuration this registry was built with
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Schema handle for a collection, defining its table on first use
    pub async fn collection(&self, name: &str) -> Result<Arc<CollectionSchema>> {
        validate_collection_name(name)?;
        let cell = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let schema = cell
            .get_or_try_init(|| async {
                let schema = self.build_schema(name);
                self.store.define_collection(&schema.table_def()).await?;
                debug!(
                    target: "widesync::schema",
                    collection = name,
                    partition_keys = schema.partition_key_count(),
                    "Collection defined"
                );
                Ok::<_, Error>(Arc::new(schema))
            })
            .await?;
        Ok(Arc::clone(schema))
    }

    fn build_schema(&self, name: &str) -> CollectionSchema {
        let keys = self.config.primary_keys_for(name);
        let partition =
            compute_partition_key_count(&keys, self.config.schema.partition_threshold);
        let schema = CollectionSchema::new(name, keys, partition);
        for (field, field_config) in self.config.fields_for(name) {
            if !schema.is_primary_key(&field) {
                schema.declare_field(FieldDef::from_config(&field, &field_config));
            }
        }
        schema
    }

    /// Apply every pending column of `schema` to the store.
    ///
    /// Concurrent calls for one collection share a single in-flight alteration.
    /// Columns declared while an alteration is in flight are applied by a
    /// follow-up alteration before this returns.
    pub async fn migrate(&self, schema: &Arc<CollectionSchema>) -> Result<()> {
        while schema.has_pending() {
            let store = Arc::clone(&self.store);
            let target = Arc::clone(schema);
            self.migrations
                .run(schema.name().to_string(), move || async move {
                    let columns = target.pending_columns();
                    if columns.is_empty() {
                        return Ok(());
                    }
                    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                    info!(
                        target: "widesync::schema",
                        collection = target.name(),
                        columns = ?names,
                        "Migrating collection"
                    );
                    match store.alter_schema(target.name(), &columns).await {
                        Ok(()) => {
                            target.mark_migrated(&columns);
                            Ok(())
                        }
                        Err(e) => {
                            warn!(
                                target: "widesync::schema",
                                collection = target.name(),
                                error = %e,
                                "Migration failed"
                            );
                            Err(Error::SchemaMigrationFailed {
                                collection: target.name().to_string(),
                                reason: e.to_string(),
                            })
                        }
                    }
                })
                .await?;
        }
        Ok(())
    }

    /// Forget a collection's cached schema (after it is dropped)
    pub fn forget(&self, name: &str) {
        self.collections.remove(name);
    }

    /// Names of collections with a cached schema
    pub fn known_collections(&self) -> Vec<String> {
        self.collections.iter().map(|e| e.key().clone()).collect()
    }
}

/// Collection names become table names: non-empty, no separator, no reserved prefix
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_input("collection name must not be empty"));
    }
    if name.contains('.') || name.starts_with(RESERVED_PREFIX) {
        return Err(Error::invalid_input(format!(
            "invalid collection name '{}'",
            name
        )));
    }
    if name == ID_FIELD {
        return Err(Error::invalid_input("'id' is not a collection name"));
    }
    Ok(())
}
