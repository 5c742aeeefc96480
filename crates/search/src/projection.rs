//! Search projections
//!
//! A projection is the indexable subset of one document, flattened and
//! renamed so the engine's dynamic-field rules can type it:
//!
//! | Source | Projected as |
//! |--------|--------------|
//! | string | `<name>_t` |
//! | integer | `<name>_l` |
//! | float | `<name>_d` |
//! | boolean | `<name>_b` |
//! | `timestamp` field | `<name>_dt`, RFC 3339 UTC |
//! | `binary` field | multipart attachment, text extracted by the engine |
//! | `excluded` field | nothing |
//!
//! `<name>` is the column path with array indexes dropped and `.` replaced by
//! `_`, so every element of `tags.0`, `tags.1`, ... lands in one multi-valued
//! `tags_t`. A field's declared type and search mode apply to everything
//! beneath it.

use crate::engine::{Attachment, MultipartPayload, SearchDocument, Submission};
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;
use widesync_core::{
    flatten, is_array_index, FlattenMode, PrimaryKey, Segment, ID_FIELD, RESERVED_PREFIX,
};
use widesync_engine::schema::{CollectionSchema, FieldDef, SearchMode};
use widesync_engine::store::ColumnType;

/// Field holding the owning collection
pub const COLLECTION_FIELD: &str = "collection_s";

/// Field holding the document's key token
pub const KEY_FIELD: &str = "key_s";

/// Content type given to extracted attachments
pub const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// The search-side rendering of one document
#[derive(Debug, Clone, PartialEq)]
pub struct SearchProjection {
    /// Search document id
    pub id: String,
    /// Type-suffixed fields
    pub fields: BTreeMap<String, Value>,
    /// Binary fields for extraction
    pub attachments: Vec<Attachment>,
}

impl SearchProjection {
    /// Structured document, or a multipart payload when there are attachments
    pub fn into_submission(self) -> Submission {
        if self.attachments.is_empty() {
            Submission::Document(SearchDocument {
                id: self.id,
                fields: self.fields,
            })
        } else {
            Submission::Multipart(MultipartPayload {
                id: self.id,
                literals: self.fields,
                attachments: self.attachments,
            })
        }
    }

    fn add(&mut self, name: String, value: Value) {
        match self.fields.get_mut(&name) {
            None => {
                self.fields.insert(name, value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
}

/// Project `document` of `schema`'s collection
pub fn project_document(
    schema: &CollectionSchema,
    key: &PrimaryKey,
    document: &Value,
) -> SearchProjection {
    let id = key.to_token();
    let mut projection = SearchProjection {
        id: id.clone(),
        fields: BTreeMap::new(),
        attachments: Vec::new(),
    };

    // array elements in index order, not the row's lexical column order
    let mut columns: Vec<(String, Value)> =
        flatten(document, FlattenMode::Write).into_iter().collect();
    columns.sort_by_cached_key(|(column, _)| {
        column.split('.').map(Segment::parse).collect::<Vec<_>>()
    });

    for (column, value) in columns {
        if value.is_null()
            || column == ID_FIELD
            || column.starts_with(RESERVED_PREFIX)
            || schema.is_primary_key(&column)
        {
            continue;
        }
        let field = governing_field(schema, &column);
        let name = field_name(&column);
        match field.as_ref().map(|f| (f.search, f.column_type)) {
            Some((SearchMode::Excluded, _)) => {}
            Some((SearchMode::Binary, _)) => match decode_binary(&value) {
                Some(bytes) => projection.attachments.push(Attachment {
                    field: name,
                    content_type: ATTACHMENT_CONTENT_TYPE.to_string(),
                    bytes,
                }),
                None => warn!(
                    target: "widesync::search",
                    collection = schema.name(),
                    column = %column,
                    "Binary field is not base64 text; not indexed"
                ),
            },
            Some((_, ColumnType::Timestamp)) => match to_timestamp(&value) {
                Some(ts) => projection.add(format!("{}_dt", name), Value::String(ts)),
                None => warn!(
                    target: "widesync::search",
                    collection = schema.name(),
                    column = %column,
                    value = %value,
                    "Timestamp field is not a date; not indexed"
                ),
            },
            Some((_, ColumnType::Blob)) => {}
            _ => {
                if let Some(suffix) = suffix_for(&value) {
                    projection.add(format!("{}_{}", name, suffix), value);
                }
            }
        }
    }

    projection
        .fields
        .insert(COLLECTION_FIELD.to_string(), Value::String(schema.name().to_string()));
    projection
        .fields
        .insert(KEY_FIELD.to_string(), Value::String(id));
    projection
}

/// Closest declared field at or above `column` whose definition is not the
/// discovered default
fn governing_field(schema: &CollectionSchema, column: &str) -> Option<FieldDef> {
    let segments: Vec<&str> = column.split('.').collect();
    (1..=segments.len()).rev().find_map(|n| {
        schema
            .field(&segments[..n].join("."))
            .filter(|f| f.column_type != ColumnType::Object || f.search != SearchMode::Indexed)
    })
}

/// Column path without array indexes, joined with `_`
pub fn field_name(column: &str) -> String {
    column
        .split('.')
        .filter(|s| !is_array_index(s))
        .collect::<Vec<_>>()
        .join("_")
}

fn suffix_for(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(_) => Some("t"),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some("l"),
        Value::Number(_) => Some("d"),
        Value::Bool(_) => Some("b"),
        _ => None,
    }
}

fn decode_binary(value: &Value) -> Option<Vec<u8>> {
    value
        .as_str()
        .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
}

/// RFC 3339 UTC rendering of a date string or epoch milliseconds
pub fn to_timestamp(value: &Value) -> Option<String> {
    let parsed: DateTime<Utc> = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single()?,
        _ => return None,
    };
    Some(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}
