//! The `VectorStore` contract: durable nearest-neighbor storage with
//! metadata filtering. See spec §4.1.

use crate::document::{Document, Metadata, MetadataValue};
use crate::error::StoreError;
use async_trait::async_trait;

/// A conjunction of equality predicates on document metadata. An empty
/// filter matches every document (absence means no constraint, per spec).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<(String, MetadataValue)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.predicates.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> &[(String, MetadataValue)] {
        &self.predicates
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.predicates
            .iter()
            .all(|(key, value)| metadata.get(key).is_some_and(|v| v == value))
    }
}

/// A document returned from [`VectorStore::search`] paired with its cosine
/// similarity score against the query embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Durable, metadata-filterable nearest-neighbor storage. One named
/// collection per `IntentLabel`, each with a fixed embedding dimension for
/// its lifetime (invariant 4, spec §3).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent. Fails with [`StoreError::DimensionConflict`] if `name`
    /// already exists with a different `dim`.
    async fn create_collection(&self, name: &str, dim: usize) -> Result<(), StoreError>;

    /// Atomic per-batch upsert. Fails with [`StoreError::ShapeMismatch`] if
    /// any embedding's length differs from the collection's declared
    /// dimension.
    async fn upsert(
        &self,
        name: &str,
        docs: Vec<(Document, Vec<f32>)>,
    ) -> Result<(), StoreError>;

    /// Cosine-similarity search, descending by score, at most `k` hits.
    /// Returns fewer than `k` if the collection holds fewer matches.
    async fn search(
        &self,
        name: &str,
        query_embedding: &[f32],
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredDocument>, StoreError>;

    /// Drop and recreate `name` as a single logical step: concurrent
    /// readers observe either the old or the new version, never a partial
    /// state.
    async fn rebuild(&self, name: &str, dim: usize) -> Result<(), StoreError>;

    /// Snapshot of currently known collection names.
    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
