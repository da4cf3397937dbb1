//! The retrievable unit stored in a [`crate::VectorStore`] collection.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A metadata value drawn from the fixed scalar vocabulary a collection uses
/// (`crop`, `market`, `district`, `season`, `source_collection`, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl MetadataValue {
    /// Render as the text form used for equality comparisons in filters and
    /// for `WHERE json_extract(...) = ?` parameter binding.
    pub fn as_sql_text(&self) -> String {
        match self {
            MetadataValue::String(s) => s.clone(),
            MetadataValue::Integer(i) => i.to_string(),
            MetadataValue::Float(f) => f.to_string(),
            MetadataValue::Bool(b) => b.to_string(),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql_text())
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Metadata attached to a [`Document`]. Keys are drawn from a fixed
/// vocabulary per collection; this type places no restriction on them
/// itself — the vocabulary is a convention enforced by callers (the
/// `Retriever` in `krishimitra-core`).
pub type Metadata = FxHashMap<String, MetadataValue>;

/// A single retrievable record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_matches(&self, key: &str, expected: &MetadataValue) -> bool {
        self.metadata.get(key).is_some_and(|v| v == expected)
    }
}
