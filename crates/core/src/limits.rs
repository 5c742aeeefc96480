//! Document limits
//!
//! | Limit | Value | Constant |
//! |-------|-------|----------|
//! | Max document size | 16 MB | [`MAX_DOCUMENT_SIZE`] |
//! | Max nesting depth | 100 levels | [`MAX_NESTING_DEPTH`] |
//! | Max path length | 256 segments | [`MAX_PATH_LENGTH`] |
//!
//! Every distinct leaf path becomes a physical column, so these limits also
//! bound how fast a collection's schema can grow from a single write.

use serde_json::Value;
use thiserror::Error;

/// Maximum document size in bytes (16 MB)
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Maximum nesting depth in a document (100 levels)
///
/// Prevents stack overflow in the recursive flattener.
pub const MAX_NESTING_DEPTH: usize = 100;

/// Maximum path length in segments (256 segments)
pub const MAX_PATH_LENGTH: usize = 256;

/// Error type for document limit violations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimitError {
    /// Document exceeds maximum size
    #[error("document size {size} exceeds maximum of {max} bytes")]
    DocumentTooLarge {
        /// Actual document size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Document nesting exceeds maximum depth
    #[error("document nesting depth {depth} exceeds maximum of {max} levels")]
    NestingTooDeep {
        /// Actual nesting depth
        depth: usize,
        /// Maximum allowed depth
        max: usize,
    },

    /// Path exceeds maximum length
    #[error("path length {length} exceeds maximum of {max} segments")]
    PathTooLong {
        /// Actual path length
        length: usize,
        /// Maximum allowed length
        max: usize,
    },
}

/// Nesting depth of a value: 0 for scalars, +1 per object/array level.
pub fn nesting_depth(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => 0,
        Value::Array(arr) => 1 + arr.iter().map(nesting_depth).max().unwrap_or(0),
        Value::Object(obj) => 1 + obj.values().map(nesting_depth).max().unwrap_or(0),
    }
}

/// Validate size and nesting depth of a document about to be written.
pub fn validate_document(value: &Value) -> Result<(), LimitError> {
    let depth = nesting_depth(value);
    if depth > MAX_NESTING_DEPTH {
        return Err(LimitError::NestingTooDeep {
            depth,
            max: MAX_NESTING_DEPTH,
        });
    }
    let size = value.to_string().len();
    if size > MAX_DOCUMENT_SIZE {
        return Err(LimitError::DocumentTooLarge {
            size,
            max: MAX_DOCUMENT_SIZE,
        });
    }
    Ok(())
}

/// Validate a path's segment count.
pub fn validate_path_length(length: usize) -> Result<(), LimitError> {
    if length > MAX_PATH_LENGTH {
        Err(LimitError::PathTooLong {
            length,
            max: MAX_PATH_LENGTH,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nesting_depth() {
        assert_eq!(nesting_depth(&json!(1)), 0);
        assert_eq!(nesting_depth(&json!({"a": 1})), 1);
        assert_eq!(nesting_depth(&json!({"a": [1, {"b": 2}]})), 3);
    }

    #[test]
    fn test_too_deep_document_rejected() {
        let mut value = json!(1);
        for _ in 0..(MAX_NESTING_DEPTH + 1) {
            value = json!({ "n": value });
        }
        assert!(matches!(
            validate_document(&value),
            Err(LimitError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn test_path_length() {
        assert!(validate_path_length(MAX_PATH_LENGTH).is_ok());
        assert!(validate_path_length(MAX_PATH_LENGTH + 1).is_err());
    }
}
