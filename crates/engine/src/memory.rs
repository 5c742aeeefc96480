//! In-process column store
//!
//! A complete [`ColumnStore`] kept in memory. It enforces the rules a real
//! wide-column store enforces on this system's traffic:
//!
//! - writes may only name declared columns
//! - filters may only use primary-key or indexed columns
//! - rows are kept in primary-key order, and pages continue after a key
//!
//! It also counts calls, so tests can pin the mutation protocol (one
//! migration per new column, no write on a no-op diff).

use crate::store::{ColumnDef, ColumnStore, QueryOptions, TableDef, WriteOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use widesync_core::predicate::compare;
use widesync_core::{Error, FlatRow, Predicate, PrimaryKey, Result};

/// Total order over key components: booleans, then numbers, then strings
fn component_order(a: &Value, b: &Value) -> Ordering {
    fn class(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        _ => compare(a, b)
            .unwrap_or_else(|| class(a).cmp(&class(b)))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Primary-key components with a total order
#[derive(Debug, Clone)]
struct RowKey(Vec<Value>);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RowKey {}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match component_order(a, b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

#[derive(Debug)]
struct Table {
    def: TableDef,
    columns: BTreeMap<String, ColumnDef>,
    rows: BTreeMap<RowKey, FlatRow>,
}

impl Table {
    fn new(def: &TableDef) -> Self {
        Self {
            columns: def
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.clone()))
                .collect(),
            def: def.clone(),
            rows: BTreeMap::new(),
        }
    }

    fn check_filter(&self, predicate: &Predicate) -> Result<()> {
        for column in predicate.indexed_columns() {
            let is_key = self.def.primary_keys.contains(&column);
            match self.columns.get(&column) {
                Some(def) if is_key || def.indexed => {}
                Some(_) => {
                    return Err(Error::store(format!(
                        "cannot filter on unindexed column '{}' of {}",
                        column, self.def.name
                    )))
                }
                None => {
                    return Err(Error::store(format!(
                        "undefined column '{}' in {}",
                        column, self.def.name
                    )))
                }
            }
        }
        Ok(())
    }

    fn key_of(&self, predicate: &Predicate) -> Result<RowKey> {
        let key = predicate
            .pinned_key(&self.def.primary_keys)
            .ok_or_else(|| Error::store(format!("write to {} without a full primary key", self.def.name)))?;
        Ok(RowKey(key.components()))
    }

    fn matching(&self, predicate: &Predicate) -> impl Iterator<Item = (&RowKey, &FlatRow)> + '_ {
        let predicate = predicate.clone();
        self.rows.iter().filter(move |(_, row)| predicate.matches(row))
    }
}

/// Counters of the calls a [`MemoryColumnStore`] has served
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `define_collection` calls
    pub defines: u64,
    /// `query_one`, `query_many` and `count` calls
    pub queries: u64,
    /// `upsert` calls
    pub upserts: u64,
    /// `delete` calls
    pub deletes: u64,
    /// One entry per `alter_schema` call: (collection, column names)
    pub alterations: Vec<(String, Vec<String>)>,
}

/// In-memory [`ColumnStore`]
#[derive(Debug, Default)]
pub struct MemoryColumnStore {
    tables: Mutex<BTreeMap<String, Table>>,
    stats: Mutex<StoreStats>,
    fail_alter: AtomicBool,
    fail_writes: AtomicBool,
    alter_delay_ms: AtomicU64,
}

impl MemoryColumnStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().clone()
    }

    /// Make `alter_schema` fail until reset
    pub fn fail_alter_schema(&self, fail: bool) {
        self.fail_alter.store(fail, AtomicOrdering::SeqCst);
    }

    /// Make `upsert` and `delete` fail until reset
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    /// Delay every `alter_schema` call, widening the window for concurrent callers
    pub fn set_alter_delay(&self, delay: Duration) {
        self.alter_delay_ms
            .store(delay.as_millis() as u64, AtomicOrdering::SeqCst);
    }

    /// Declared column names of a table
    pub fn column_names(&self, collection: &str) -> Vec<String> {
        self.tables
            .lock()
            .get(collection)
            .map(|t| t.columns.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw stored row, bypassing predicates
    pub fn raw_row(&self, collection: &str, key: &PrimaryKey) -> Option<FlatRow> {
        self.tables
            .lock()
            .get(collection)
            .and_then(|t| t.rows.get(&RowKey(key.components())).cloned())
    }

    /// Store a raw row, bypassing column checks (used to plant corrupt data)
    pub fn put_raw_row(&self, collection: &str, key: &PrimaryKey, row: FlatRow) -> Result<()> {
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(collection)
            .ok_or_else(|| Error::store(format!("unknown table {}", collection)))?;
        table.rows.insert(RowKey(key.components()), row);
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            Err(Error::store("write rejected"))
        } else {
            Ok(())
        }
    }
}

fn unknown_table(collection: &str) -> Error {
    Error::store(format!("unknown table {}", collection))
}

fn sort_rows(rows: &mut [FlatRow], sort: &[crate::store::SortKey]) {
    rows.sort_by(|a, b| {
        for key in sort {
            let ordering = match (a.get(&key.column), b.get(&key.column)) {
                (Some(x), Some(y)) => component_order(x, y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[async_trait]
impl ColumnStore for MemoryColumnStore {
    async fn define_collection(&self, table: &TableDef) -> Result<()> {
        self.stats.lock().defines += 1;
        let mut tables = self.tables.lock();
        tables
            .entry(table.name.clone())
            .or_insert_with(|| Table::new(table));
        Ok(())
    }

    async fn query_one(&self, collection: &str, predicate: &Predicate) -> Result<Option<FlatRow>> {
        self.stats.lock().queries += 1;
        let tables = self.tables.lock();
        let table = tables.get(collection).ok_or_else(|| unknown_table(collection))?;
        table.check_filter(predicate)?;
        if let Some(key) = predicate.pinned_key(&table.def.primary_keys) {
            let row = table.rows.get(&RowKey(key.components()));
            return Ok(row.filter(|r| predicate.matches(r)).cloned());
        }
        let found = table.matching(predicate).next().map(|(_, row)| row.clone());
        Ok(found)
    }

    async fn query_many(
        &self,
        collection: &str,
        predicate: &Predicate,
        options: &QueryOptions,
    ) -> Result<Vec<FlatRow>> {
        self.stats.lock().queries += 1;
        let tables = self.tables.lock();
        let table = tables.get(collection).ok_or_else(|| unknown_table(collection))?;
        table.check_filter(predicate)?;
        for key in &options.sort {
            if !table.columns.contains_key(&key.column) {
                return Err(Error::store(format!(
                    "undefined sort column '{}' in {}",
                    key.column, collection
                )));
            }
        }
        let after = options.after.as_ref().map(|k| RowKey(k.components()));
        let mut rows: Vec<FlatRow> = table
            .matching(predicate)
            .filter(|(key, _)| after.as_ref().map_or(true, |a| *key > a))
            .map(|(_, row)| row.clone())
            .collect();
        if !options.sort.is_empty() {
            sort_rows(&mut rows, &options.sort);
        }
        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(options.offset).take(limit).collect())
    }

    async fn count(&self, collection: &str, predicate: &Predicate) -> Result<u64> {
        self.stats.lock().queries += 1;
        let tables = self.tables.lock();
        let table = tables.get(collection).ok_or_else(|| unknown_table(collection))?;
        table.check_filter(predicate)?;
        Ok(table.matching(predicate).count() as u64)
    }

    async fn upsert(
        &self,
        collection: &str,
        key: &Predicate,
        columns: &FlatRow,
        options: &WriteOptions,
    ) -> Result<()> {
        self.check_writable()?;
        self.stats.lock().upserts += 1;
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(collection)
            .ok_or_else(|| unknown_table(collection))?;
        if let Some(unknown) = columns.keys().find(|c| !table.columns.contains_key(*c)) {
            return Err(Error::store(format!(
                "undefined column '{}' in {}",
                unknown, collection
            )));
        }
        let row_key = table.key_of(key)?;
        if options.if_not_exists && table.rows.contains_key(&row_key) {
            return Ok(());
        }
        let pk_columns: Vec<(String, Value)> = table
            .def
            .primary_keys
            .iter()
            .cloned()
            .zip(row_key.0.iter().cloned())
            .collect();
        let row = table.rows.entry(row_key).or_default();
        for (name, value) in pk_columns {
            row.insert(name, value);
        }
        for (name, value) in columns {
            if table.def.primary_keys.contains(name) {
                continue;
            }
            if value.is_null() {
                row.remove(name);
            } else {
                row.insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, predicate: &Predicate) -> Result<()> {
        self.check_writable()?;
        self.stats.lock().deletes += 1;
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(collection)
            .ok_or_else(|| unknown_table(collection))?;
        table.check_filter(predicate)?;
        table.rows.retain(|_, row| !predicate.matches(row));
        Ok(())
    }

    async fn alter_schema(&self, collection: &str, columns: &[ColumnDef]) -> Result<()> {
        let delay = self.alter_delay_ms.load(AtomicOrdering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.stats.lock().alterations.push((
            collection.to_string(),
            columns.iter().map(|c| c.name.clone()).collect(),
        ));
        if self.fail_alter.load(AtomicOrdering::SeqCst) {
            return Err(Error::store("alter rejected"));
        }
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(collection)
            .ok_or_else(|| unknown_table(collection))?;
        for column in columns {
            table.columns.insert(column.name.clone(), column.clone());
        }
        Ok(())
    }

    async fn generate_key(&self, _collection: &str) -> Result<Value> {
        Ok(Value::String(uuid::Uuid::new_v4().to_string()))
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.tables.lock().remove(collection);
        Ok(())
    }
}
