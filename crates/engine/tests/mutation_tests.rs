//! Mutation Pipeline Tests
//!
//! Drives the Load -> Diff -> Migrate -> Write -> Index -> Respond pipeline
//! against the in-memory column store and pins the observable protocol:
//! migration counts, skipped writes, index notifications and error kinds.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use widesync_core::{Comparison, DocPath, Error, FlatRow, Predicate, PrimaryKey, Result};
use widesync_engine::{
    ArrayOp, Change, FindOptions, IndexObserver, MemoryColumnStore, MutationEngine, RowReader,
    SchemaRegistry, SortKey, SyncConfig, VersionCounter,
};

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<(String, PrimaryKey, Option<Value>)>>,
    fail: AtomicBool,
}

#[async_trait]
impl IndexObserver for RecordingObserver {
    async fn document_written(
        &self,
        collection: &str,
        key: &PrimaryKey,
        document: Option<&Value>,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::search_unavailable("index down"));
        }
        self.events
            .lock()
            .push((collection.to_string(), key.clone(), document.cloned()));
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryColumnStore>,
    engine: MutationEngine,
    reader: RowReader,
    observer: Arc<RecordingObserver>,
}

fn harness_with(config: SyncConfig) -> Harness {
    let store = Arc::new(MemoryColumnStore::new());
    let registry = Arc::new(SchemaRegistry::new(store.clone(), Arc::new(config)));
    let observer = Arc::new(RecordingObserver::default());
    let engine = MutationEngine::new(
        store.clone(),
        Arc::clone(&registry),
        Arc::new(VersionCounter::new()),
    )
    .with_observer(observer.clone());
    let reader = RowReader::new(store.clone(), registry);
    Harness {
        store,
        engine,
        reader,
        observer,
    }
}

fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

fn key(id: &str) -> PrimaryKey {
    PrimaryKey::single(json!(id)).unwrap()
}

fn path(p: &str) -> DocPath {
    DocPath::parse(p).unwrap()
}

fn set(p: &str, value: Value) -> Change {
    Change::Set {
        path: Some(path(p)),
        value,
    }
}

// ============================================================================
// Schema growth
// ============================================================================

#[tokio::test]
async fn test_new_field_migrates_exactly_once() {
    let h = harness();
    h.engine
        .mutate("C", &key("k"), set("foo.bar", json!(1)), 1)
        .await
        .unwrap();
    let after_first = h.store.stats().alterations;
    assert_eq!(
        after_first,
        vec![("C".to_string(), vec!["foo.bar".to_string()])]
    );

    h.engine
        .mutate("C", &key("k"), set("foo.bar", json!(1)), 2)
        .await
        .unwrap();
    assert_eq!(h.store.stats().alterations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_writes_share_one_migration() {
    let h = Arc::new(harness());
    h.store.set_alter_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for i in 0..8 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.engine
                .mutate(
                    "C",
                    &key(&format!("k{}", i)),
                    set("shared.x", json!(i)),
                    1,
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(h.store.stats().alterations.len(), 1);
    assert_eq!(h.store.stats().defines, 1);
}

#[tokio::test]
async fn test_migration_failure_aborts_write() {
    let h = harness();
    h.store.fail_alter_schema(true);
    let err = h
        .engine
        .mutate("C", &key("k"), set("a", json!(1)), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaMigrationFailed { .. }));
    assert_eq!(h.store.stats().upserts, 0);
    assert!(h.observer.events.lock().is_empty());

    // the column stays pending and the next write retries the migration
    h.store.fail_alter_schema(false);
    h.engine
        .mutate("C", &key("k"), set("a", json!(1)), 2)
        .await
        .unwrap();
    assert_eq!(h.reader.get("C", &key("k")).await.unwrap().unwrap()["a"], json!(1));
}

// ============================================================================
// Diff
// ============================================================================

#[tokio::test]
async fn test_idempotent_set_writes_and_indexes_once() {
    let h = harness();
    let first = h
        .engine
        .mutate("C", &key("k"), set("a", json!("v")), 1)
        .await
        .unwrap();
    let second = h
        .engine
        .mutate("C", &key("k"), set("a", json!("v")), 2)
        .await
        .unwrap();

    assert!(first.written);
    assert!(!second.written);
    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert_eq!(second.document, first.document);
    assert_eq!(h.store.stats().upserts, 1);
    assert_eq!(h.observer.events.lock().len(), 1);
}

#[tokio::test]
async fn test_version_never_decreases() {
    let h = harness();
    let a = h
        .engine
        .mutate("C", &key("k"), set("a", json!(1)), 10)
        .await
        .unwrap();
    let b = h
        .engine
        .mutate("C", &key("k"), set("a", json!(2)), 5)
        .await
        .unwrap();
    assert_eq!(a.version, 10);
    assert_eq!(b.version, 10);
    assert_eq!(h.engine.version().current(), 10);
}

#[tokio::test]
async fn test_unset_removes_field_from_reads_and_index() {
    let h = harness();
    h.engine
        .mutate(
            "C",
            &key("k"),
            Change::Set {
                path: None,
                value: json!({"name": "a", "tags": ["x"]}),
            },
            1,
        )
        .await
        .unwrap();
    let outcome = h
        .engine
        .mutate("C", &key("k"), Change::Unset { path: path("name") }, 2)
        .await
        .unwrap();
    assert_eq!(outcome.document, Some(json!({"id": "k", "tags": ["x"]})));

    let stored = h.reader.get("C", &key("k")).await.unwrap().unwrap();
    assert_eq!(stored, json!({"id": "k", "tags": ["x"]}));

    let found = h
        .reader
        .find("C", &Predicate::new(), &FindOptions::default())
        .await
        .unwrap();
    assert!(found[0].get("name").is_none());

    let events = h.observer.events.lock();
    let (_, _, last) = events.last().unwrap();
    assert!(last.as_ref().unwrap().get("name").is_none());
}

#[tokio::test]
async fn test_shrinking_array_clears_trailing_columns() {
    let h = harness();
    h.engine
        .mutate("C", &key("k"), set("tags", json!(["a", "b", "c"])), 1)
        .await
        .unwrap();
    h.engine
        .mutate(
            "C",
            &key("k"),
            Change::Array {
                path: path("tags"),
                op: ArrayOp::Remove { index: 0, count: 2 },
            },
            2,
        )
        .await
        .unwrap();
    let raw: FlatRow = h.store.raw_row("C", &key("k")).unwrap();
    assert_eq!(raw.get("tags.0"), Some(&json!("c")));
    assert!(!raw.contains_key("tags.1"));
    assert!(!raw.contains_key("tags.2"));
}

// ============================================================================
// Error kinds
// ============================================================================

#[tokio::test]
async fn test_array_op_on_non_array_fails() {
    let h = harness();
    h.engine
        .mutate("C", &key("k"), set("name", json!("a")), 1)
        .await
        .unwrap();
    let err = h
        .engine
        .mutate(
            "C",
            &key("k"),
            Change::Array {
                path: path("name"),
                op: ArrayOp::Push(vec![json!("z")]),
            },
            2,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::NotAnArray {
            path: "name".to_string()
        }
    );
}

#[tokio::test]
async fn test_remove_absent_document_is_record_not_found() {
    let h = harness();
    let err = h
        .engine
        .mutate("C", &key("nope"), Change::Remove, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RecordNotFound { .. }));

    // unsetting a path of an absent document is a no-op
    let outcome = h
        .engine
        .mutate("C", &key("nope"), Change::Unset { path: path("a") }, 1)
        .await
        .unwrap();
    assert!(!outcome.written);
    assert_eq!(outcome.document, None);
}

#[tokio::test]
async fn test_remove_deletes_row_and_projection() {
    let h = harness();
    h.engine
        .mutate("C", &key("k"), set("a", json!(1)), 1)
        .await
        .unwrap();
    let outcome = h
        .engine
        .mutate("C", &key("k"), Change::Remove, 2)
        .await
        .unwrap();
    assert_eq!(outcome.document, None);
    assert!(h.reader.get("C", &key("k")).await.unwrap().is_none());
    let events = h.observer.events.lock();
    assert_eq!(events.last().unwrap().2, None);
}

#[tokio::test]
async fn test_index_failure_does_not_undo_write() {
    let h = harness();
    h.observer.fail.store(true, Ordering::SeqCst);
    let outcome = h
        .engine
        .mutate("C", &key("k"), set("a", json!(1)), 1)
        .await
        .unwrap();
    assert!(outcome.written);
    assert!(h.reader.get("C", &key("k")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_changing_id_path_rejected() {
    let h = harness();
    h.engine
        .mutate("C", &key("k"), set("a", json!(1)), 1)
        .await
        .unwrap();
    let err = h
        .engine
        .mutate("C", &key("k"), set("id", json!("other")), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPath { .. }));

    let same = h
        .engine
        .mutate("C", &key("k"), set("id", json!("k")), 3)
        .await
        .unwrap();
    assert!(!same.written);
}

// ============================================================================
// Insert and keys
// ============================================================================

#[tokio::test]
async fn test_insert_generates_key() {
    let h = harness();
    let (generated, outcome) = h
        .engine
        .insert("items", json!({"name": "a"}), 1)
        .await
        .unwrap();
    let id = generated.to_id_value();
    assert!(id.is_string());
    assert_eq!(outcome.document, Some(json!({"id": id, "name": "a"})));
}

#[tokio::test]
async fn test_insert_with_legacy_id() {
    let h = harness();
    let (k, _) = h
        .engine
        .insert("items", json!({"_id": "given", "n": 1}), 1)
        .await
        .unwrap();
    assert_eq!(k, key("given"));
    let doc = h.reader.get("items", &k).await.unwrap().unwrap();
    assert_eq!(doc, json!({"id": "given", "n": 1}));
}

#[tokio::test]
async fn test_composite_key_collection() {
    let config = SyncConfig::from_toml_str(
        r#"
[collections.events]
primary_keys = [{ name = "tenant", rank = 0 }, { name = "id", rank = 1 }]
"#,
    )
    .unwrap();
    let h = harness_with(config);
    let (k, outcome) = h
        .engine
        .insert("events", json!({"tenant": "acme", "id": 42, "v": 1}), 1)
        .await
        .unwrap();
    assert_eq!(k.components(), vec![json!("acme"), json!(42)]);
    let doc = outcome.document.unwrap();
    assert_eq!(doc["id"], k.to_id_value());
    assert_eq!(doc["tenant"], json!("acme"));

    let raw = h.store.raw_row("events", &k).unwrap();
    assert_eq!(raw["id"], json!(42));

    // the encoded id finds the row again
    let found = h
        .reader
        .find(
            "events",
            &Predicate::new().eq("id", k.to_id_value()),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    // only equality can address the encoded id
    for comparison in [
        Comparison::Within(vec![k.to_id_value()]),
        Comparison::NotEquals(k.to_id_value()),
    ] {
        let err = h
            .reader
            .find(
                "events",
                &Predicate::new().op("id", comparison),
                &FindOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
    }
    // the raw `id` component column still filters normally
    let found = h
        .reader
        .find(
            "events",
            &Predicate::new().op("id", Comparison::Within(vec![json!(42)])),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    // a missing leading key column cannot be generated
    let err = h
        .engine
        .insert("events", json!({"v": 2}), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidKey { .. }));
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_find_indexes_filtered_columns_first() {
    let h = harness();
    h.engine
        .mutate("C", &key("a"), set("n", json!(1)), 1)
        .await
        .unwrap();
    let before = h.store.stats().alterations.len();

    let found = h
        .reader
        .find(
            "C",
            &Predicate::new().eq("never.seen", json!(1)),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert!(found.is_empty());
    assert_eq!(h.store.stats().alterations.len(), before + 1);

    assert_eq!(h.reader.count("C", &Predicate::new().eq("n", json!(1))).await.unwrap(), 1);
}

#[tokio::test]
async fn test_find_skips_corrupt_rows() {
    let h = harness();
    for id in ["a", "b"] {
        h.engine
            .mutate("C", &key(id), set("x", json!(1)), 1)
            .await
            .unwrap();
    }
    h.engine
        .mutate("C", &key("b"), set("y.z", json!(1)), 1)
        .await
        .unwrap();
    let mut corrupt = h.store.raw_row("C", &key("b")).unwrap();
    corrupt.insert("y".to_string(), json!("scalar"));
    h.store.put_raw_row("C", &key("b"), corrupt).unwrap();

    let found = h
        .reader
        .find("C", &Predicate::new(), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], json!("a"));

    let err = h.reader.get("C", &key("b")).await.unwrap_err();
    assert!(matches!(err, Error::CorruptRecord { .. }));
}

async fn plant_corrupt_row(h: &Harness, id: &str) {
    h.engine
        .mutate("C", &key(id), set("y.z", json!(1)), 1)
        .await
        .unwrap();
    let mut corrupt = h.store.raw_row("C", &key(id)).unwrap();
    corrupt.insert("y".to_string(), json!("scalar"));
    h.store.put_raw_row("C", &key(id), corrupt).unwrap();
}

#[tokio::test]
async fn test_corrupt_row_can_be_replaced_or_removed() {
    let h = harness();
    plant_corrupt_row(&h, "r").await;
    plant_corrupt_row(&h, "d").await;

    let outcome = h
        .engine
        .mutate(
            "C",
            &key("r"),
            Change::Set {
                path: None,
                value: json!({"ok": 1}),
            },
            2,
        )
        .await
        .unwrap();
    assert!(outcome.written);
    assert_eq!(outcome.document, Some(json!({"id": "r", "ok": 1})));
    assert_eq!(
        h.reader.get("C", &key("r")).await.unwrap(),
        Some(json!({"id": "r", "ok": 1}))
    );

    h.engine
        .mutate("C", &key("d"), Change::Remove, 3)
        .await
        .unwrap();
    assert_eq!(h.reader.get("C", &key("d")).await.unwrap(), None);
}

#[tokio::test]
async fn test_path_change_on_corrupt_row_still_fails() {
    let h = harness();
    plant_corrupt_row(&h, "p").await;
    let err = h
        .engine
        .mutate("C", &key("p"), set("x", json!(1)), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CorruptRecord { .. }));
}

#[tokio::test]
async fn test_sort_without_clustering_keys_is_ignored() {
    let h = harness();
    for id in ["b", "a"] {
        h.engine
            .mutate("C", &key(id), set("n", json!(id)), 1)
            .await
            .unwrap();
    }
    let options = FindOptions {
        sort: vec![SortKey::desc("n")],
        ..Default::default()
    };
    let found = h.reader.find("C", &Predicate::new(), &options).await.unwrap();
    let ids: Vec<_> = found.iter().map(|d| d["id"].clone()).collect();
    assert_eq!(ids, vec![json!("a"), json!("b")]);
}

#[tokio::test]
async fn test_get_all_keys_documents_by_id() {
    let h = harness();
    for id in ["a", "b"] {
        h.engine
            .mutate("C", &key(id), set("n", json!(1)), 1)
            .await
            .unwrap();
    }
    let all = h.reader.get_all("C").await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["a"], json!({"id": "a", "n": 1}));
}
