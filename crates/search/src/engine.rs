//! Search-engine collaborator interface
//!
//! One core per collection holds that collection's projections. The engine's
//! client (HTTP transport, multipart encoding, distribution of config files to
//! cluster members) lives behind [`SearchEngine`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use widesync_core::{Error, Result};

/// Config files deployed to a core, by file name
pub type ConfigFiles = BTreeMap<String, String>;

/// A structured search document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    /// Unique document id
    pub id: String,
    /// Field values; arrays are multi-valued
    pub fields: BTreeMap<String, Value>,
}

/// Binary content submitted for text extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Field the extracted text is indexed under
    pub field: String,
    /// MIME type of `bytes`
    pub content_type: String,
    /// Raw content
    pub bytes: Vec<u8>,
}

/// A document carrying attachments, submitted as a multipart request
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPayload {
    /// Unique document id
    pub id: String,
    /// Structured fields sent alongside the attachments
    pub literals: BTreeMap<String, Value>,
    /// Binary content for extraction
    pub attachments: Vec<Attachment>,
}

/// What [`SearchEngine::submit`] accepts
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Structured fields only
    Document(SearchDocument),
    /// Fields plus attachments
    Multipart(MultipartPayload),
}

impl Submission {
    /// Document id of the submission
    pub fn id(&self) -> &str {
        match self {
            Submission::Document(d) => &d.id,
            Submission::Multipart(m) => &m.id,
        }
    }
}

/// Options for [`SearchEngine::submit`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Ask the engine to commit on its own within this window
    pub commit_within: Option<Duration>,
}

/// A search query: free text plus exact-match field filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free-text query; empty or `*` matches everything
    #[serde(default)]
    pub q: String,
    /// Exact-match filters by field
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
}

impl SearchQuery {
    /// Free-text query without filters
    pub fn text(q: impl Into<String>) -> Self {
        SearchQuery {
            q: q.into(),
            filters: BTreeMap::new(),
        }
    }

    /// Add an exact-match filter (builder pattern)
    pub fn filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }
}

/// What [`SearchEngine::delete`] removes
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    /// One document by id
    Id(String),
    /// Every document matching a query
    Query(SearchQuery),
}

/// Options for [`SearchEngine::search`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Hits to skip
    #[serde(default)]
    pub offset: usize,
    /// Maximum number of hits
    #[serde(default)]
    pub limit: Option<usize>,
    /// (field, descending) pairs; score order when empty
    #[serde(default)]
    pub sort: Vec<(String, bool)>,
    /// Return highlighted snippets
    #[serde(default)]
    pub highlight: bool,
    /// Search every core rather than only the named one
    #[serde(default)]
    pub multicore: bool,
}

/// One ranked hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Document id
    pub id: String,
    /// Relevance score
    pub score: f64,
    /// Highlighted snippets, when requested
    pub highlights: Vec<String>,
}

/// Ranked results of a search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Matches before offset/limit
    pub total: u64,
    /// Hits after offset/limit, in rank order
    pub hits: Vec<SearchHit>,
}

/// A caller's search passthrough, parsed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    /// Query to run
    pub query: SearchQuery,
    /// Paging, sort and scope
    pub options: SearchOptions,
}

impl SearchRequest {
    /// Parse the value a caller put under the search field of a predicate.
    ///
    /// A string is a free-text query. An object may carry `q`, `filters`,
    /// `offset`, `limit`, `sort` (`[["field", true]]`, true = descending) and
    /// `highlight`.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(q) => Ok(SearchRequest {
                query: SearchQuery::text(q.clone()),
                options: SearchOptions::default(),
            }),
            Value::Object(map) => {
                let query = SearchQuery {
                    q: map
                        .get("q")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    filters: match map.get("filters") {
                        Some(Value::Object(f)) => f.clone().into_iter().collect(),
                        None | Some(Value::Null) => BTreeMap::new(),
                        Some(other) => {
                            return Err(Error::invalid_input(format!(
                                "search filters must be an object, got {}",
                                other
                            )))
                        }
                    },
                };
                let mut rest: Map<String, Value> = map.clone();
                rest.remove("q");
                rest.remove("filters");
                let options: SearchOptions = serde_json::from_value(Value::Object(rest))
                    .map_err(|e| Error::invalid_input(format!("invalid search options: {}", e)))?;
                Ok(SearchRequest { query, options })
            }
            other => Err(Error::invalid_input(format!(
                "search predicate must be a string or object, got {}",
                other
            ))),
        }
    }
}

/// The search engine
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Add or replace a document
    async fn submit(&self, core: &str, submission: Submission, options: &SubmitOptions)
        -> Result<()>;

    /// Remove documents by id or query
    async fn delete(&self, core: &str, target: &DeleteTarget) -> Result<()>;

    /// Make pending changes visible to searches
    async fn commit(&self, core: &str) -> Result<()>;

    async fn search(
        &self,
        core: &str,
        query: &SearchQuery,
        options: &SearchOptions,
    ) -> Result<SearchResults>;

    /// Publish config files for a core
    async fn push_config(&self, core: &str, files: &ConfigFiles) -> Result<()>;

    /// Config files the core is currently running with
    async fn deployed_config(&self, core: &str) -> Result<Option<ConfigFiles>>;

    /// Reload the core with its published config, creating it if needed
    async fn reload_or_create_core(&self, core: &str) -> Result<()>;
}
