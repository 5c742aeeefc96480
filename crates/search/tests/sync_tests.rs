//! Search Synchronization Tests
//!
//! Wires the mutation pipeline to `SearchSync` over the in-memory column store
//! and search engine, then checks what reaches the index: projections after
//! writes and deletes, debounced commits, reindex recovery and search-backed
//! finds.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use widesync_core::{DocPath, Predicate, PrimaryKey};
use widesync_engine::{
    Change, CollectionConfig, FieldConfig, FindOptions, MemoryColumnStore, MutationEngine,
    RowReader, SchemaRegistry, SearchMode, SyncConfig, VersionCounter,
};
use widesync_search::{MemorySearchEngine, SearchSync, COLLECTION_FIELD};

struct Harness {
    store: Arc<MemoryColumnStore>,
    search: Arc<MemorySearchEngine>,
    sync: Arc<SearchSync>,
    engine: MutationEngine,
}

fn harness_with(config: SyncConfig) -> Harness {
    let store = Arc::new(MemoryColumnStore::new());
    let registry = Arc::new(SchemaRegistry::new(store.clone(), Arc::new(config)));
    let reader = Arc::new(RowReader::new(store.clone(), Arc::clone(&registry)));
    let search = Arc::new(MemorySearchEngine::new());
    let sync = Arc::new(SearchSync::new(search.clone(), reader));
    let engine = MutationEngine::new(store.clone(), registry, Arc::new(VersionCounter::new()))
        .with_observer(sync.clone());
    Harness {
        store,
        search,
        sync,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

fn key(id: &str) -> PrimaryKey {
    PrimaryKey::single(json!(id)).unwrap()
}

fn set(path: &str, value: Value) -> Change {
    Change::Set {
        path: Some(DocPath::parse(path).unwrap()),
        value,
    }
}

fn set_doc(value: Value) -> Change {
    Change::Set { path: None, value }
}

fn search_for(q: &str) -> Predicate {
    Predicate::new().with_search(json!(q))
}

fn ids(docs: &[Value]) -> Vec<Value> {
    docs.iter().map(|d| d["id"].clone()).collect()
}

impl Harness {
    fn projection(&self, collection: &str, id: &str) -> Option<std::collections::BTreeMap<String, Value>> {
        self.search.committed_document(collection, &key(id).to_token())
    }
}

// ============================================================================
// Projections follow writes
// ============================================================================

#[tokio::test]
async fn test_write_reaches_index_after_flush() {
    let h = harness();
    h.engine
        .mutate("items", &key("a"), set_doc(json!({"name": "red apple", "n": 2})), 1)
        .await
        .unwrap();
    assert!(h.projection("items", "a").is_none());

    h.sync.flush().await.unwrap();
    let projection = h.projection("items", "a").unwrap();
    assert_eq!(projection["name_t"], json!("red apple"));
    assert_eq!(projection["n_l"], json!(2));
    assert_eq!(projection[COLLECTION_FIELD], json!("items"));
}

#[tokio::test]
async fn test_deleted_path_leaves_projection() {
    let h = harness();
    h.engine
        .mutate("items", &key("a"), set_doc(json!({"name": "x", "tags": ["p", "q"]})), 1)
        .await
        .unwrap();
    h.engine
        .mutate(
            "items",
            &key("a"),
            Change::Unset {
                path: DocPath::parse("name").unwrap(),
            },
            2,
        )
        .await
        .unwrap();
    h.sync.flush().await.unwrap();

    let projection = h.projection("items", "a").unwrap();
    assert!(!projection.contains_key("name_t"));
    assert_eq!(projection["tags_t"], json!(["p", "q"]));
}

#[tokio::test]
async fn test_untouched_fields_stay_in_projection() {
    let h = harness();
    h.engine
        .mutate("items", &key("a"), set_doc(json!({"a": "one", "b": "two"})), 1)
        .await
        .unwrap();
    h.engine
        .mutate("items", &key("a"), set("a", json!("three")), 2)
        .await
        .unwrap();
    h.sync.flush().await.unwrap();

    let projection = h.projection("items", "a").unwrap();
    assert_eq!(projection["a_t"], json!("three"));
    assert_eq!(projection["b_t"], json!("two"));
}

#[tokio::test]
async fn test_idempotent_set_submits_once() {
    let h = harness();
    for version in [1, 2] {
        h.engine
            .mutate("items", &key("a"), set("x", json!(1)), version)
            .await
            .unwrap();
    }
    assert_eq!(h.search.stats().submissions, 1);
}

#[tokio::test]
async fn test_removed_document_leaves_index() {
    let h = harness();
    h.engine
        .mutate("items", &key("a"), set("x", json!(1)), 1)
        .await
        .unwrap();
    h.sync.flush().await.unwrap();
    h.engine
        .mutate("items", &key("a"), Change::Remove, 2)
        .await
        .unwrap();
    h.sync.flush().await.unwrap();
    assert!(h.projection("items", "a").is_none());
}

#[tokio::test]
async fn test_excluded_and_binary_fields() {
    let mut config = SyncConfig::default();
    let mut collection = CollectionConfig::default();
    collection.fields.insert(
        "secret".to_string(),
        FieldConfig {
            search: SearchMode::Excluded,
            ..Default::default()
        },
    );
    collection.fields.insert(
        "file".to_string(),
        FieldConfig {
            search: SearchMode::Binary,
            ..Default::default()
        },
    );
    config.collections.insert("docs".to_string(), collection);
    let h = harness_with(config);

    // "quarterly report" in base64
    let doc = json!({"secret": "hunter2", "file": "cXVhcnRlcmx5IHJlcG9ydA=="});
    h.engine
        .mutate("docs", &key("d"), set_doc(doc), 1)
        .await
        .unwrap();
    h.sync.flush().await.unwrap();

    assert_eq!(h.search.stats().multipart_submissions, 1);
    let projection = h.projection("docs", "d").unwrap();
    assert!(!projection.contains_key("secret_t"));
    assert!(!projection.contains_key("file_t"));

    let found = h
        .sync
        .search_documents("docs", &search_for("quarterly"), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![json!("d")]);
}

#[tokio::test]
async fn test_core_provisioned_once() {
    let h = harness();
    for id in ["a", "b", "c"] {
        h.engine
            .mutate("items", &key(id), set("x", json!(id)), 1)
            .await
            .unwrap();
    }
    assert_eq!(h.search.stats().config_pushes, 1);
    assert_eq!(h.search.stats().reloads, 1);
}

#[tokio::test]
async fn test_core_prefix_names_cores() {
    let mut config = SyncConfig::default();
    config.search.core_prefix = "app_".to_string();
    let h = harness_with(config);
    h.engine
        .mutate("items", &key("a"), set("x", json!(1)), 1)
        .await
        .unwrap();
    h.sync.flush().await.unwrap();
    assert_eq!(h.sync.core_name("items"), "app_items");
    assert_eq!(h.search.committed_count("app_items"), 1);
}

#[tokio::test]
async fn test_disabled_search_skips_index() {
    let mut config = SyncConfig::default();
    config.search.enabled = false;
    let h = harness_with(config);
    h.engine
        .mutate("items", &key("a"), set("x", json!(1)), 1)
        .await
        .unwrap();
    assert_eq!(h.search.stats(), Default::default());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_index_failure_reported_not_fatal() {
    let h = harness();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    h.sync.on_index_error(move |collection, error| {
        recorder
            .lock()
            .push((collection.to_string(), error.is_search_failure()));
    });
    h.search.set_available(false);

    let outcome = h
        .engine
        .mutate("items", &key("a"), set("x", json!(1)), 1)
        .await
        .unwrap();
    assert!(outcome.written);
    assert!(h.store.raw_row("items", &key("a")).is_some());
    assert_eq!(*seen.lock(), vec![("items".to_string(), true)]);
}

#[tokio::test]
async fn test_search_failure_degrades_to_empty() {
    let h = harness();
    h.engine
        .mutate("items", &key("a"), set("name", json!("apple")), 1)
        .await
        .unwrap();
    h.sync.flush().await.unwrap();
    h.search.set_available(false);

    let found = h
        .sync
        .search_documents("items", &search_for("apple"), &FindOptions::default())
        .await
        .unwrap();
    assert!(found.is_empty());
}

// ============================================================================
// Debounced commits
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_write_burst_commits_once() {
    let mut config = SyncConfig::default();
    config.search.commit_within_ms = 100;
    let h = harness_with(config);

    for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
        h.engine
            .mutate("items", &key(id), set("n", json!(i)), 1)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.search.stats().commits, 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.search.stats().commits, 1);
    assert_eq!(h.search.committed_count("items"), 4);
}

// ============================================================================
// Search-backed finds
// ============================================================================

#[tokio::test]
async fn test_search_results_keep_engine_order() {
    let h = harness();
    let docs = [
        ("a", "rust"),
        ("b", "rust rust rust"),
        ("c", "go"),
        ("d", "rust rust"),
    ];
    for (id, text) in docs {
        h.engine
            .mutate("items", &key(id), set("body", json!(text)), 1)
            .await
            .unwrap();
    }
    h.sync.flush().await.unwrap();

    let found = h
        .sync
        .search_documents("items", &search_for("rust"), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![json!("b"), json!("d"), json!("a")]);

    let page = FindOptions {
        limit: Some(1),
        offset: 1,
        ..Default::default()
    };
    let found = h
        .sync
        .search_documents("items", &search_for("rust"), &page)
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![json!("d")]);
}

#[tokio::test]
async fn test_search_with_column_conditions_post_filters() {
    let h = harness();
    for (id, kind) in [("a", "fruit"), ("b", "veg"), ("c", "fruit")] {
        h.engine
            .mutate(
                "items",
                &key(id),
                set_doc(json!({"body": "fresh", "kind": kind})),
                1,
            )
            .await
            .unwrap();
    }
    h.sync.flush().await.unwrap();

    let predicate = Predicate::new()
        .eq("kind", json!("fruit"))
        .with_search(json!("fresh"));
    let found = h
        .sync
        .search_documents("items", &predicate, &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![json!("a"), json!("c")]);
}

#[tokio::test]
async fn test_search_filters_and_other_collections() {
    let mut config = SyncConfig::default();
    config.search.multicore = true;
    let h = harness_with(config);
    h.engine
        .mutate("items", &key("a"), set("body", json!("shared word")), 1)
        .await
        .unwrap();
    h.engine
        .mutate("other", &key("z"), set("body", json!("shared word")), 1)
        .await
        .unwrap();
    h.sync.flush().await.unwrap();

    let found = h
        .sync
        .search_documents("items", &search_for("shared"), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![json!("a")]);
}

// ============================================================================
// Reindex
// ============================================================================

#[tokio::test]
async fn test_reindex_rebuilds_and_skips_corrupt_rows() {
    let mut config = SyncConfig::default();
    config.search.reindex_page_size = 2;
    let h = harness_with(config);
    for id in ["a", "b", "c", "d", "e"] {
        h.engine
            .mutate("items", &key(id), set_doc(json!({"v": {"w": id}})), 1)
            .await
            .unwrap();
    }
    let mut corrupt = h.store.raw_row("items", &key("c")).unwrap();
    corrupt.insert("v".to_string(), json!("scalar"));
    h.store.put_raw_row("items", &key("c"), corrupt).unwrap();

    let commits_before = h.search.stats().commits;
    let stats = h.sync.reindex("items").await.unwrap();
    assert_eq!(stats.indexed, 4);
    assert_eq!(stats.skipped, 1);
    assert_eq!(h.search.stats().commits, commits_before + 1);
    assert_eq!(h.search.committed_count("items"), 4);
    assert!(h.projection("items", "c").is_none());

    // a second pass converges on the same state
    let again = h.sync.reindex("items").await.unwrap();
    assert_eq!(again, stats);
    assert_eq!(h.search.committed_count("items"), 4);
}

#[tokio::test]
async fn test_drop_collection_clears_projections() {
    let h = harness();
    for id in ["a", "b"] {
        h.engine
            .mutate("items", &key(id), set("x", json!(1)), 1)
            .await
            .unwrap();
    }
    h.sync.flush().await.unwrap();
    assert_eq!(h.search.committed_count("items"), 2);

    h.sync.drop_collection("items").await.unwrap();
    assert_eq!(h.search.committed_count("items"), 0);
}
