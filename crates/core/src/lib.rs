//! Core types for widesync
//!
//! This crate holds the pure, I/O-free half of the system:
//! - `path`: dot-separated document paths and path access on JSON values
//! - `key`: primary keys and the tagged composite-key encoding
//! - `flatten`: nested document <-> flat column row conversion
//! - `predicate`: caller query predicates and field selection
//! - `limits`: document size, nesting and path-length limits
//! - `error`: the error type shared by every widesync crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flatten;
pub mod key;
pub mod limits;
pub mod path;
pub mod predicate;

pub use error::{Error, Result};
pub use flatten::{
    flatten, primary_key_value, unflatten, unflatten_value, FlatRow, FlattenMode, ID_FIELD,
    LEGACY_ID_FIELD, RESERVED_PREFIX,
};
pub use key::{decode_composite, encode_composite, PrimaryKey, COMPOSITE_KEY_TAG};
pub use limits::{LimitError, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH, MAX_PATH_LENGTH};
pub use path::{delete_at_path, get_at_path, is_array_index, join, set_at_path, split, DocPath, Segment};
pub use predicate::{Comparison, Condition, FieldSelection, Predicate, SEARCH_FIELD};
