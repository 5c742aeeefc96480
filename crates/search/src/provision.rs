//! Search schema provisioning
//!
//! Each collection's core runs with config files rendered from its field
//! registry. Provisioning compares the canonical rendering with what the core
//! has deployed and only pushes and reloads when they differ. Concurrent
//! provisioning of one core shares a single attempt.

use crate::engine::{ConfigFiles, SearchEngine};
use crate::projection::{COLLECTION_FIELD, KEY_FIELD};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use widesync_core::{Error, Result};
use widesync_engine::schema::{CollectionSchema, SearchMode};
use widesync_engine::store::ColumnType;
use widesync_engine::Coalescer;

/// File holding the field schema
pub const SCHEMA_FILE: &str = "schema.json";

/// File holding core settings
pub const CORE_CONFIG_FILE: &str = "core.json";

/// Dynamic-field rules matching the projection's type suffixes
const DYNAMIC_FIELDS: &[(&str, &str)] = &[
    ("*_t", "text"),
    ("*_l", "long"),
    ("*_d", "double"),
    ("*_b", "boolean"),
    ("*_dt", "date"),
    ("*_s", "string"),
];

#[derive(Serialize)]
struct FieldRule<'a> {
    name: String,
    #[serde(rename = "type")]
    field_type: &'a str,
    stored: bool,
    #[serde(rename = "multiValued")]
    multi_valued: bool,
}

#[derive(Serialize)]
struct SchemaFile<'a> {
    #[serde(rename = "uniqueKey")]
    unique_key: &'a str,
    fields: Vec<FieldRule<'a>>,
    #[serde(rename = "dynamicFields")]
    dynamic_fields: Vec<FieldRule<'a>>,
    /// Declared fields kept out of the index
    excluded: Vec<String>,
}

#[derive(Serialize)]
struct CoreConfigFile {
    collection: String,
    /// Binary fields submitted for text extraction
    extract: Vec<String>,
}

fn rule<'a>(name: impl Into<String>, field_type: &'a str) -> FieldRule<'a> {
    FieldRule {
        name: name.into(),
        field_type,
        stored: true,
        multi_valued: true,
    }
}

/// Canonical config files for a collection's core.
///
/// Deterministic: the same registry state always renders byte-identical files.
pub fn render_config(schema: &CollectionSchema) -> Result<ConfigFiles> {
    let mut fields = vec![
        FieldRule {
            multi_valued: false,
            ..rule("id", "string")
        },
        FieldRule {
            multi_valued: false,
            ..rule(COLLECTION_FIELD, "string")
        },
        FieldRule {
            multi_valued: false,
            ..rule(KEY_FIELD, "string")
        },
    ];
    let mut excluded = Vec::new();
    let mut extract = Vec::new();
    for field in schema.fields() {
        match field.search {
            SearchMode::Excluded => excluded.push(field.name),
            SearchMode::Binary => extract.push(field.name),
            SearchMode::Indexed => {
                let typed = match field.column_type {
                    ColumnType::Text => Some("text"),
                    ColumnType::Int => Some("long"),
                    ColumnType::Double => Some("double"),
                    ColumnType::Boolean => Some("boolean"),
                    ColumnType::Timestamp => Some("date"),
                    ColumnType::Object | ColumnType::Blob => None,
                };
                if let Some(field_type) = typed {
                    fields.push(rule(field.name, field_type));
                }
            }
        }
    }
    let schema_file = SchemaFile {
        unique_key: "id",
        fields,
        dynamic_fields: DYNAMIC_FIELDS
            .iter()
            .map(|(name, field_type)| rule(*name, field_type))
            .collect(),
        excluded,
    };
    let core_file = CoreConfigFile {
        collection: schema.name().to_string(),
        extract,
    };

    let mut files = ConfigFiles::new();
    files.insert(
        SCHEMA_FILE.to_string(),
        serde_json::to_string_pretty(&schema_file)?,
    );
    files.insert(
        CORE_CONFIG_FILE.to_string(),
        serde_json::to_string_pretty(&core_file)?,
    );
    Ok(files)
}

/// Brings cores in line with their rendered config
pub struct Provisioner {
    engine: Arc<dyn SearchEngine>,
    /// Config known to be deployed, by core
    deployed: DashMap<String, ConfigFiles>,
    inflight: Coalescer<String, ConfigFiles>,
}

impl Provisioner {
    /// Provisioner over `engine`
    pub fn new(engine: Arc<dyn SearchEngine>) -> Self {
        Self {
            engine,
            deployed: DashMap::new(),
            inflight: Coalescer::new(),
        }
    }

    /// Make `core` run with the config rendered from `schema`.
    ///
    /// # Errors
    ///
    /// `SearchSchemaMismatch` when the core still reports a different config
    /// after a push and reload; engine failures pass through.
    pub async fn ensure(&self, core: &str, schema: &CollectionSchema) -> Result<()> {
        loop {
            let desired = render_config(schema)?;
            if self.deployed.get(core).map_or(false, |d| *d == desired) {
                return Ok(());
            }

            let engine = Arc::clone(&self.engine);
            let core_name = core.to_string();
            let collection = schema.name().to_string();
            let target = desired.clone();
            let applied = self
                .inflight
                .run(core.to_string(), move || async move {
                    provision(engine, core_name, collection, target).await
                })
                .await?;
            self.deployed.insert(core.to_string(), applied.clone());
            // a joined attempt may have provisioned an older rendering
            if applied == desired {
                return Ok(());
            }
        }
    }

    /// Forget what is known about a core's deployed config
    pub fn forget(&self, core: &str) {
        self.deployed.remove(core);
    }
}

async fn provision(
    engine: Arc<dyn SearchEngine>,
    core: String,
    collection: String,
    desired: ConfigFiles,
) -> Result<ConfigFiles> {
    if engine.deployed_config(&core).await?.as_ref() == Some(&desired) {
        debug!(target: "widesync::search", core = %core, "Search schema up to date");
        return Ok(desired);
    }
    info!(target: "widesync::search", core = %core, "Provisioning search schema");
    engine.push_config(&core, &desired).await?;
    engine.reload_or_create_core(&core).await?;

    if engine.deployed_config(&core).await?.as_ref() != Some(&desired) {
        warn!(
            target: "widesync::search",
            core = %core,
            "Deployed search schema differs after reload"
        );
        return Err(Error::SearchSchemaMismatch {
            collection,
            reason: format!("core '{}' did not pick up the pushed config", core),
        });
    }
    Ok(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySearchEngine;
    use widesync_engine::schema::{FieldDef, KeyColumn};

    fn schema() -> CollectionSchema {
        let schema = CollectionSchema::new("items", vec![KeyColumn::new("id", 0)], 1);
        schema.declare_field(FieldDef {
            column_type: ColumnType::Timestamp,
            ..FieldDef::discovered("created")
        });
        schema
    }

    #[test]
    fn rendering_is_deterministic_and_ignores_discovered_fields() {
        let s = schema();
        let first = render_config(&s).unwrap();
        s.ensure_columns(["name", "tags.0"]);
        assert_eq!(render_config(&s).unwrap(), first);
        assert!(first[SCHEMA_FILE].contains("\"created\""));
        assert!(!first[SCHEMA_FILE].contains("\"name\""));
    }

    #[tokio::test]
    async fn pushes_only_when_config_differs() {
        let engine = Arc::new(MemorySearchEngine::new());
        let provisioner = Provisioner::new(engine.clone());
        let s = schema();

        provisioner.ensure("items", &s).await.unwrap();
        provisioner.ensure("items", &s).await.unwrap();
        assert_eq!(engine.stats().config_pushes, 1);
        assert_eq!(engine.stats().reloads, 1);

        // a fresh provisioner finds the deployed config already current
        let again = Provisioner::new(engine.clone());
        again.ensure("items", &s).await.unwrap();
        assert_eq!(engine.stats().config_pushes, 1);

        s.declare_field(FieldDef {
            column_type: ColumnType::Int,
            ..FieldDef::discovered("count")
        });
        provisioner.ensure("items", &s).await.unwrap();
        assert_eq!(engine.stats().config_pushes, 2);
    }

    #[tokio::test]
    async fn concurrent_provisioning_shares_one_push() {
        let engine = Arc::new(MemorySearchEngine::new());
        let provisioner = Arc::new(Provisioner::new(engine.clone()));
        let s = Arc::new(schema());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let p = Arc::clone(&provisioner);
                let s = Arc::clone(&s);
                tokio::spawn(async move { p.ensure("items", &s).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(engine.stats().config_pushes, 1);
    }

    #[tokio::test]
    async fn unreconcilable_config_is_a_mismatch() {
        let engine = Arc::new(MemorySearchEngine::new());
        engine.force_deployed_config(Some(ConfigFiles::new()));
        let provisioner = Provisioner::new(engine);
        let err = provisioner.ensure("items", &schema()).await.unwrap_err();
        assert!(matches!(err, Error::SearchSchemaMismatch { .. }));
    }
}
