//! Configuration via `widesync.toml`
//!
//! Every key has a default, so an empty file (or no file) is a valid
//! configuration. Connection strings and credentials for the column store and
//! search engine belong to those collaborators and are not read here.

use crate::schema::{KeyColumn, SearchMode};
use crate::store::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use widesync_core::{Error, Result};

/// Config file name looked up by hosts
pub const CONFIG_FILE_NAME: &str = "widesync.toml";

/// Keyspace used when none is configured
pub const DEFAULT_KEYSPACE: &str = "keyspace1";

/// Schema defaults applied to every collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Primary-key columns whose rank is below this value form the partition key
    #[serde(default = "default_partition_threshold")]
    pub partition_threshold: u32,
    /// Primary-key columns of collections without their own entry
    #[serde(default = "default_primary_keys")]
    pub primary_keys: Vec<String>,
}

fn default_partition_threshold() -> u32 {
    1
}

fn default_primary_keys() -> Vec<String> {
    vec!["id".to_string()]
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            partition_threshold: default_partition_threshold(),
            primary_keys: default_primary_keys(),
        }
    }
}

/// Search synchronization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Keep a search projection per row
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Debounce window for index commits, in milliseconds
    #[serde(default = "default_commit_within_ms")]
    pub commit_within_ms: u64,
    /// Rows fetched per page during a reindex
    #[serde(default = "default_reindex_page_size")]
    pub reindex_page_size: usize,
    /// Prefix prepended to every core name
    #[serde(default)]
    pub core_prefix: String,
    /// Query across every core rather than the collection's own
    #[serde(default)]
    pub multicore: bool,
}

fn default_true() -> bool {
    true
}

fn default_commit_within_ms() -> u64 {
    1000
}

fn default_reindex_page_size() -> usize {
    500
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            commit_within_ms: default_commit_within_ms(),
            reindex_page_size: default_reindex_page_size(),
            core_prefix: String::new(),
            multicore: false,
        }
    }
}

/// A field declared up front for one collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Column type of the field
    #[serde(default, rename = "type")]
    pub column_type: ColumnType,
    /// How the field reaches the search index
    #[serde(default)]
    pub search: SearchMode,
}

/// Per-collection overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Primary-key columns with their ranks; empty means the schema default
    #[serde(default)]
    pub primary_keys: Vec<KeyColumn>,
    /// Fields declared before any document is written
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
}

/// Configuration loaded from `widesync.toml`.
///
/// # Example
///
/// ```toml
/// keyspace = "app"
///
/// [search]
/// commit_within_ms = 250
///
/// [collections.events]
/// primary_keys = [{ name = "tenant", rank = 0 }, { name = "id", rank = 1 }]
/// fields = { payload = { type = "blob", search = "binary" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Keyspace holding every collection's table (stored lowercased)
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    /// Schema defaults
    #[serde(default)]
    pub schema: SchemaConfig,
    /// Search synchronization
    #[serde(default)]
    pub search: SearchConfig,
    /// Per-collection keys and fields
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionConfig>,
}

fn default_keyspace() -> String {
    DEFAULT_KEYSPACE.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            keyspace: default_keyspace(),
            schema: SchemaConfig::default(),
            search: SearchConfig::default(),
            collections: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# widesync configuration
#
# Keyspace holding one table per collection (lowercased on load)
keyspace = "keyspace1"

[schema]
# Leading primary-key columns with rank below this value form the partition key
partition_threshold = 1
# Primary-key columns for collections without their own entry
primary_keys = ["id"]

[search]
# Keep a search projection per row
enabled = true
# Debounce window for index commits (milliseconds)
commit_within_ms = 1000
# Rows per page during a full reindex
reindex_page_size = 500
# Prefix for search core names
core_prefix = ""
# Query across all cores
multicore = false

# Per-collection keys and declared fields:
# [collections.events]
# primary_keys = [{ name = "tenant", rank = 0 }, { name = "id", rank = 1 }]
# fields = { created = { type = "timestamp" }, secret = { search = "excluded" } }
"#
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the document does not parse or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse configuration: {}", e)))?;
        config.normalized()
    }

    /// Read and parse config from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    fn normalized(mut self) -> Result<Self> {
        self.keyspace = self.keyspace.to_lowercase();
        if self.keyspace.is_empty() {
            self.keyspace = default_keyspace();
        }
        if self.schema.primary_keys.is_empty() {
            return Err(Error::config("schema.primary_keys must not be empty"));
        }
        if self.search.reindex_page_size == 0 {
            return Err(Error::config("search.reindex_page_size must be positive"));
        }
        Ok(self)
    }

    /// Debounce window for index commits
    pub fn commit_within(&self) -> Duration {
        Duration::from_millis(self.search.commit_within_ms)
    }

    /// Primary-key columns for a collection, with ranks.
    ///
    /// Collections without an entry get the schema default, ranked by
    /// position.
    pub fn primary_keys_for(&self, collection: &str) -> Vec<KeyColumn> {
        match self.collections.get(collection) {
            Some(c) if !c.primary_keys.is_empty() => c.primary_keys.clone(),
            _ => self
                .schema
                .primary_keys
                .iter()
                .enumerate()
                .map(|(rank, name)| KeyColumn::new(name.clone(), rank as u32))
                .collect(),
        }
    }

    /// Fields declared for a collection
    pub fn fields_for(&self, collection: &str) -> BTreeMap<String, FieldConfig> {
        self.collections
            .get(collection)
            .map(|c| c.fields.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_parses_to_default() {
        let config = SyncConfig::from_toml_str(SyncConfig::default_toml()).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config.keyspace, "keyspace1");
        assert_eq!(config.schema.partition_threshold, 1);
        assert_eq!(config.schema.primary_keys, vec!["id".to_string()]);
        assert!(config.search.enabled);
        assert_eq!(config.commit_within(), Duration::from_millis(1000));
        assert_eq!(config.search.reindex_page_size, 500);
    }

    #[test]
    fn keyspace_is_lowercased() {
        let config = SyncConfig::from_toml_str("keyspace = \"MyApp\"").unwrap();
        assert_eq!(config.keyspace, "myapp");
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(SyncConfig::from_toml_str("[schema]\nprimary_keys = []").is_err());
        assert!(SyncConfig::from_toml_str("[search]\nreindex_page_size = 0").is_err());
        assert!(matches!(
            SyncConfig::from_toml_str("keyspace = ["),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn collection_overrides() {
        let config = SyncConfig::from_toml_str(
            r#"
[collections.events]
primary_keys = [{ name = "tenant", rank = 0 }, { name = "id", rank = 1 }]
fields = { payload = { type = "blob", search = "binary" }, secret = { search = "excluded" } }
"#,
        )
        .unwrap();
        let keys = config.primary_keys_for("events");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "tenant");
        assert_eq!(keys[1].rank, 1);

        let fields = config.fields_for("events");
        assert_eq!(fields["payload"].column_type, ColumnType::Blob);
        assert_eq!(fields["payload"].search, SearchMode::Binary);
        assert_eq!(fields["secret"].column_type, ColumnType::Object);

        let fallback = config.primary_keys_for("other");
        assert_eq!(fallback, vec![KeyColumn::new("id", 0)]);
    }

    #[test]
    fn load_from_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = SyncConfig::default();
        config.search.commit_within_ms = 50;
        config.keyspace = "app".to_string();
        config.write_to_file(&path).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = SyncConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
