//! Error types for widesync
//!
//! This module defines all error types surfaced by the mapping, mutation and
//! search layers. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! # Categories
//!
//! | Category | Variants | Description |
//! |----------|----------|-------------|
//! | Document | `NotAnArray`, `RecordNotFound`, `CorruptRecord` | Shape of stored data |
//! | Schema | `SchemaMigrationFailed` | Column-store schema alteration |
//! | Search | `SearchUnavailable`, `SearchSchemaMismatch` | Search engine collaborator |
//! | Validation | `InvalidPath`, `InvalidKey`, `InvalidInput`, `Limit` | Bad caller input |
//! | System | `Store`, `Config`, `Serialization` | Infrastructure |
//!
//! Errors are `Clone`: a coalesced migration or provisioning attempt hands its
//! single outcome to every caller waiting on it.

use crate::limits::LimitError;
use thiserror::Error;

/// Result type alias for widesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for widesync
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ==================== Document ====================
    /// Array operation attempted on a value that exists but is not an array
    #[error("not an array: {path}")]
    NotAnArray { path: String },

    /// Remove-intent mutation addressed a document that does not exist
    #[error("record not found: {collection}/{key}")]
    RecordNotFound { collection: String, key: String },

    /// A flat row could not be reconstructed into a document
    #[error("corrupt record in {collection}: {reason}")]
    CorruptRecord { collection: String, reason: String },

    // ==================== Schema ====================
    /// The column store rejected a schema alteration
    #[error("schema migration failed for {collection}: {reason}")]
    SchemaMigrationFailed { collection: String, reason: String },

    // ==================== Search ====================
    /// Search is enabled but the engine cannot be reached
    #[error("search unavailable: {reason}")]
    SearchUnavailable { reason: String },

    /// Deployed search schema could not be reconciled with the desired one
    #[error("search schema mismatch for {collection}: {reason}")]
    SearchSchemaMismatch { collection: String, reason: String },

    // ==================== Validation ====================
    /// Malformed document path
    #[error("invalid path: {reason}")]
    InvalidPath { reason: String },

    /// Malformed or mismatched primary key
    #[error("invalid key: {reason}")]
    InvalidKey { reason: String },

    /// Any other invalid caller input
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Document or path limit exceeded
    #[error(transparent)]
    Limit(#[from] LimitError),

    // ==================== System ====================
    /// Column-store collaborator failure
    #[error("column store error: {reason}")]
    Store { reason: String },

    /// Configuration could not be read or parsed
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Serialization or deserialization failure
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl Error {
    /// Create an `InvalidPath` error
    pub fn invalid_path(reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            reason: reason.into(),
        }
    }

    /// Create an `InvalidKey` error
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Error::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create an `InvalidInput` error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create a `Store` error
    pub fn store(reason: impl Into<String>) -> Self {
        Error::Store {
            reason: reason.into(),
        }
    }

    /// Create a `Config` error
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config {
            reason: reason.into(),
        }
    }

    /// Create a `SearchUnavailable` error
    pub fn search_unavailable(reason: impl Into<String>) -> Self {
        Error::SearchUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a `CorruptRecord` error
    pub fn corrupt(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CorruptRecord {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    /// True for failures raised by the search engine collaborator.
    ///
    /// These never abort a mutation; the column-store write stands.
    pub fn is_search_failure(&self) -> bool {
        matches!(
            self,
            Error::SearchUnavailable { .. } | Error::SearchSchemaMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_an_array() {
        let err = Error::NotAnArray {
            path: "tags".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("not an array"));
        assert!(msg.contains("tags"));
    }

    #[test]
    fn test_error_display_record_not_found() {
        let err = Error::RecordNotFound {
            collection: "items".to_string(),
            key: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "record not found: items/abc");
    }

    #[test]
    fn test_error_display_migration() {
        let err = Error::SchemaMigrationFailed {
            collection: "items".to_string(),
            reason: "timeout".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("schema migration failed"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{oops");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn test_search_failure_classification() {
        assert!(Error::search_unavailable("down").is_search_failure());
        assert!(!Error::store("down").is_search_failure());
        assert!(!Error::corrupt("c", "bad").is_search_failure());
    }

    #[test]
    fn test_error_from_limit() {
        let err: Error = LimitError::PathTooLong {
            length: 300,
            max: 256,
        }
        .into();
        assert!(matches!(err, Error::Limit(_)));
        assert!(err.to_string().contains("300"));
    }
}
