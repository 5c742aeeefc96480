//! In-process search engine
//!
//! A complete [`SearchEngine`] kept in memory, with the commit model of a real
//! engine: submissions and deletes are pending until `commit`, and searches
//! only see committed documents. Cores must be created (via
//! `reload_or_create_core`) before they accept documents.
//!
//! Matching is deliberately simple: lowercase alphanumeric terms, every query
//! term must occur, score is the total term frequency.

use crate::engine::{
    ConfigFiles, DeleteTarget, SearchEngine, SearchHit, SearchOptions, SearchQuery, SearchResults,
    SubmitOptions, Submission,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use widesync_core::predicate::{compare, values_equal};
use widesync_core::{Error, Result};

/// Lowercased alphanumeric terms of `text`
pub fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct StoredDoc {
    fields: BTreeMap<String, Value>,
    /// Text extracted from attachments
    extracted: Vec<(String, String)>,
}

impl StoredDoc {
    fn texts(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            collect_text(name, value, &mut out);
        }
        out.extend(self.extracted.iter().cloned());
        out
    }

    fn matches_filters(&self, filters: &BTreeMap<String, Value>) -> bool {
        filters.iter().all(|(field, wanted)| match self.fields.get(field) {
            Some(Value::Array(items)) => items.iter().any(|v| values_equal(v, wanted)),
            Some(v) => values_equal(v, wanted),
            None => false,
        })
    }
}

fn collect_text(name: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::String(s) => out.push((name.to_string(), s.clone())),
        Value::Array(items) => items.iter().for_each(|v| collect_text(name, v, out)),
        Value::Null => {}
        other => out.push((name.to_string(), other.to_string())),
    }
}

#[derive(Debug, Clone)]
enum PendingOp {
    Upsert(String, StoredDoc),
    DeleteId(String),
    DeleteQuery(SearchQuery),
}

#[derive(Debug, Default)]
struct Core {
    created: bool,
    published: Option<ConfigFiles>,
    deployed: Option<ConfigFiles>,
    pending: Vec<PendingOp>,
    committed: BTreeMap<String, StoredDoc>,
}

/// Counters of the calls a [`MemorySearchEngine`] has served
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Structured submissions
    pub submissions: u64,
    /// Multipart submissions
    pub multipart_submissions: u64,
    /// Delete calls
    pub deletes: u64,
    /// Commit calls
    pub commits: u64,
    /// Search calls
    pub searches: u64,
    /// Config pushes
    pub config_pushes: u64,
    /// Core reloads or creations
    pub reloads: u64,
}

/// In-memory [`SearchEngine`]
#[derive(Debug)]
pub struct MemorySearchEngine {
    cores: Mutex<BTreeMap<String, Core>>,
    stats: Mutex<SearchStats>,
    available: AtomicBool,
    /// When set, reloads deploy this instead of the published config
    deploy_override: Mutex<Option<ConfigFiles>>,
}

impl Default for MemorySearchEngine {
    fn default() -> Self {
        Self {
            cores: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(SearchStats::default()),
            available: AtomicBool::new(true),
            deploy_override: Mutex::new(None),
        }
    }
}

impl MemorySearchEngine {
    /// Engine with no cores
    pub fn new() -> Self {
        Self::default()
    }

    /// Call counts so far
    pub fn stats(&self) -> SearchStats {
        self.stats.lock().clone()
    }

    /// Simulate the engine becoming unreachable (or reachable again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every reload deploy `files` regardless of what was published
    pub fn force_deployed_config(&self, files: Option<ConfigFiles>) {
        *self.deploy_override.lock() = files;
    }

    /// Committed fields of a document
    pub fn committed_document(&self, core: &str, id: &str) -> Option<BTreeMap<String, Value>> {
        self.cores
            .lock()
            .get(core)
            .and_then(|c| c.committed.get(id))
            .map(|d| d.fields.clone())
    }

    /// Number of committed documents in a core
    pub fn committed_count(&self, core: &str) -> usize {
        self.cores
            .lock()
            .get(core)
            .map_or(0, |c| c.committed.len())
    }

    /// Number of uncommitted operations in a core
    pub fn pending_count(&self, core: &str) -> usize {
        self.cores.lock().get(core).map_or(0, |c| c.pending.len())
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::search_unavailable("search engine unreachable"))
        }
    }

    fn with_core<T>(&self, core: &str, f: impl FnOnce(&mut Core) -> T) -> Result<T> {
        let mut cores = self.cores.lock();
        match cores.get_mut(core) {
            Some(c) if c.created => Ok(f(c)),
            _ => Err(Error::search_unavailable(format!("no such core: {}", core))),
        }
    }
}

fn score(doc: &StoredDoc, query_terms: &[String], highlight: bool) -> Option<(f64, Vec<String>)> {
    let texts = doc.texts();
    let mut total = 0usize;
    let mut highlights = Vec::new();
    for term in query_terms {
        let mut found = 0;
        for (field, text) in &texts {
            let hits = terms(text).iter().filter(|t| *t == term).count();
            if hits > 0 && highlight && !highlights.contains(field) {
                highlights.push(field.clone());
            }
            found += hits;
        }
        if found == 0 {
            return None;
        }
        total += found;
    }
    Some((total as f64, highlights))
}

#[async_trait]
impl SearchEngine for MemorySearchEngine {
    async fn submit(
        &self,
        core: &str,
        submission: Submission,
        _options: &SubmitOptions,
    ) -> Result<()> {
        self.check_available()?;
        let (id, doc, multipart) = match submission {
            Submission::Document(d) => (
                d.id,
                StoredDoc {
                    fields: d.fields,
                    extracted: Vec::new(),
                },
                false,
            ),
            Submission::Multipart(m) => (
                m.id,
                StoredDoc {
                    fields: m.literals,
                    extracted: m
                        .attachments
                        .into_iter()
                        .map(|a| (a.field, String::from_utf8_lossy(&a.bytes).into_owned()))
                        .collect(),
                },
                true,
            ),
        };
        self.with_core(core, |c| c.pending.push(PendingOp::Upsert(id, doc)))?;
        let mut stats = self.stats.lock();
        if multipart {
            stats.multipart_submissions += 1;
        } else {
            stats.submissions += 1;
        }
        Ok(())
    }

    async fn delete(&self, core: &str, target: &DeleteTarget) -> Result<()> {
        self.check_available()?;
        let op = match target {
            DeleteTarget::Id(id) => PendingOp::DeleteId(id.clone()),
            DeleteTarget::Query(q) => PendingOp::DeleteQuery(q.clone()),
        };
        self.with_core(core, |c| c.pending.push(op))?;
        self.stats.lock().deletes += 1;
        Ok(())
    }

    async fn commit(&self, core: &str) -> Result<()> {
        self.check_available()?;
        self.with_core(core, |c| {
            for op in std::mem::take(&mut c.pending) {
                match op {
                    PendingOp::Upsert(id, doc) => {
                        c.committed.insert(id, doc);
                    }
                    PendingOp::DeleteId(id) => {
                        c.committed.remove(&id);
                    }
                    PendingOp::DeleteQuery(q) => {
                        let query_terms = terms(&q.q);
                        c.committed.retain(|_, doc| {
                            !(doc.matches_filters(&q.filters)
                                && score(doc, &query_terms, false).is_some())
                        });
                    }
                }
            }
        })?;
        self.stats.lock().commits += 1;
        Ok(())
    }

    async fn search(
        &self,
        core: &str,
        query: &SearchQuery,
        options: &SearchOptions,
    ) -> Result<SearchResults> {
        self.check_available()?;
        self.stats.lock().searches += 1;
        let query_terms = if query.q.trim() == "*" {
            Vec::new()
        } else {
            terms(&query.q)
        };
        let cores = self.cores.lock();
        let searched: Vec<&Core> = if options.multicore {
            cores.values().filter(|c| c.created).collect()
        } else {
            match cores.get(core) {
                Some(c) if c.created => vec![c],
                _ => return Err(Error::search_unavailable(format!("no such core: {}", core))),
            }
        };

        let mut matched: Vec<(SearchHit, &StoredDoc)> = Vec::new();
        for c in searched {
            for (id, doc) in &c.committed {
                if !doc.matches_filters(&query.filters) {
                    continue;
                }
                if let Some((score, highlights)) = score(doc, &query_terms, options.highlight) {
                    matched.push((
                        SearchHit {
                            id: id.clone(),
                            score,
                            highlights,
                        },
                        doc,
                    ));
                }
            }
        }

        if options.sort.is_empty() {
            matched.sort_by(|a, b| {
                b.0.score
                    .total_cmp(&a.0.score)
                    .then_with(|| a.0.id.cmp(&b.0.id))
            });
        } else {
            matched.sort_by(|a, b| {
                for (field, descending) in &options.sort {
                    let ordering = match (a.1.fields.get(field), b.1.fields.get(field)) {
                        (Some(x), Some(y)) => compare(x, y).unwrap_or(std::cmp::Ordering::Equal),
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    };
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                a.0.id.cmp(&b.0.id)
            });
        }

        let total = matched.len() as u64;
        let limit = options.limit.unwrap_or(usize::MAX);
        let hits = matched
            .into_iter()
            .skip(options.offset)
            .take(limit)
            .map(|(hit, _)| hit)
            .collect();
        Ok(SearchResults { total, hits })
    }

    async fn push_config(&self, core: &str, files: &ConfigFiles) -> Result<()> {
        self.check_available()?;
        self.cores.lock().entry(core.to_string()).or_default().published = Some(files.clone());
        self.stats.lock().config_pushes += 1;
        Ok(())
    }

    async fn deployed_config(&self, core: &str) -> Result<Option<ConfigFiles>> {
        self.check_available()?;
        Ok(self.cores.lock().get(core).and_then(|c| c.deployed.clone()))
    }

    async fn reload_or_create_core(&self, core: &str) -> Result<()> {
        self.check_available()?;
        let forced = self.deploy_override.lock().clone();
        let mut cores = self.cores.lock();
        let c = cores.entry(core.to_string()).or_default();
        c.created = true;
        c.deployed = forced.or_else(|| c.published.clone());
        drop(cores);
        self.stats.lock().reloads += 1;
        Ok(())
    }
}
