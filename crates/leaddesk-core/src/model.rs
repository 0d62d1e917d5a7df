// Document model: paths, collection selectors, and opaque records.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// DocPath
// ---------------------------------------------------------------------------

/// Slash-separated document path alternating collection and document ids,
/// e.g. `users/u1/mortgages/m1`. Always has an even, non-zero number of
/// non-empty segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(String);

impl DocPath {
    pub fn parse(path: &str) -> Result<Self, CoreError> {
        let trimmed = path.trim_matches('/');
        let segments: Vec<&str> = trimmed.split('/').collect();
        if trimmed.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(CoreError::invalid(format!(
                "document path `{path}` has empty segments"
            )));
        }
        if segments.len() % 2 != 0 {
            return Err(CoreError::invalid(format!(
                "document path `{path}` must have an even number of segments"
            )));
        }
        Ok(DocPath(trimmed.to_string()))
    }

    /// Path of document `id` inside the collection at `collection_path`.
    pub fn child(collection_path: &str, id: &str) -> Result<Self, CoreError> {
        Self::parse(&format!("{}/{}", collection_path.trim_matches('/'), id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments().nth(index)
    }

    /// The document's own id (last segment).
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Everything before the last segment: the containing collection's path.
    pub fn collection_path(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// Id of the containing collection (second-to-last segment).
    pub fn collection_id(&self) -> &str {
        let parent = self.collection_path();
        parent.rsplit('/').next().unwrap_or(parent)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocPath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DocPath::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(path: DocPath) -> Self {
        path.0
    }
}

// ---------------------------------------------------------------------------
// Collection selectors
// ---------------------------------------------------------------------------

/// Which documents a query or subscription covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Every collection with this id, wherever it is nested.
    Group(String),
    /// Exactly the collection at this path (odd number of segments).
    Path(String),
}

impl Collection {
    pub fn group(id: impl Into<String>) -> Self {
        Collection::Group(id.into())
    }

    pub fn path(path: impl Into<String>) -> Self {
        Collection::Path(path.into().trim_matches('/').to_string())
    }

    /// Reject collection paths that point at a document instead.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Collection::Group(id) if id.is_empty() || id.contains('/') => Err(
                CoreError::invalid(format!("collection group id `{id}` is not a single segment")),
            ),
            Collection::Path(path)
                if path.is_empty()
                    || path.split('/').any(|s| s.is_empty())
                    || path.split('/').count() % 2 == 0 =>
            {
                Err(CoreError::invalid(format!(
                    "collection path `{path}` must have an odd number of segments"
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn matches(&self, doc: &DocPath) -> bool {
        match self {
            Collection::Group(id) => doc.collection_id() == id,
            Collection::Path(path) => doc.collection_path() == path,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::Group(id) => write!(f, "group:{id}"),
            Collection::Path(path) => f.write_str(path),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// An opaque document read from the store. The core never mutates records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub path: DocPath,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(path: DocPath, fields: Map<String, Value>) -> Self {
        Self { path, fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Numeric field value, or `None` when missing or not a number.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.fields.get(field).and_then(parse_timestamp)
    }
}

// ---------------------------------------------------------------------------
// Field value helpers
// ---------------------------------------------------------------------------

/// Canonical on-disk form for timestamps: RFC 3339, UTC, millisecond precision.
/// Strings in this form sort chronologically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp field. Accepts RFC 3339 strings, integer epoch
/// seconds, and `{seconds, nanos}` objects.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::Object(obj) => {
            let secs = obj.get("seconds").and_then(Value::as_i64)?;
            let nanos = obj.get("nanos").and_then(Value::as_u64).unwrap_or(0);
            Utc.timestamp_opt(secs, nanos as u32).single()
        }
        _ => None,
    }
}

/// Ordering used by "most recent" queries: numbers numerically, timestamps
/// chronologically, other strings lexically. Mixed kinds order numbers first.
pub fn compare_field_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        _ => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}
