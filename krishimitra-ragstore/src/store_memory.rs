//! An in-memory [`VectorStore`] used for tests and fast iteration. Durable
//! persistence is delegated to [`crate::store_sqlite::SqliteVectorStore`];
//! this implementation exists for the same reason `weavegraph` pairs its
//! durable checkpointers with an `InMemoryCheckpointer`: determinism and
//! speed in test fixtures.

use crate::document::Document;
use crate::error::StoreError;
use crate::store::{cosine_similarity, Filter, ScoredDocument, VectorStore};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

struct Collection {
    dim: usize,
    docs: Vec<(Document, Vec<f32>)>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<FxHashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, name: &str, dim: usize) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        match collections.get(name) {
            Some(existing) if existing.dim != dim => Err(StoreError::DimensionConflict {
                name: name.to_string(),
                existing: existing.dim,
                requested: dim,
            }),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection {
                        dim,
                        docs: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert(
        &self,
        name: &str,
        docs: Vec<(Document, Vec<f32>)>,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })?;
        for (_, embedding) in &docs {
            if embedding.len() != collection.dim {
                return Err(StoreError::ShapeMismatch {
                    name: name.to_string(),
                    expected: collection.dim,
                    got: embedding.len(),
                });
            }
        }
        for (doc, embedding) in docs {
            if let Some(slot) = collection.docs.iter_mut().find(|(d, _)| d.id == doc.id) {
                *slot = (doc, embedding);
            } else {
                collection.docs.push((doc, embedding));
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        query_embedding: &[f32],
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredDocument>, StoreError> {
        let collections = self.collections.read().await;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })?;
        let mut scored: Vec<ScoredDocument> = collection
            .docs
            .iter()
            .filter(|(doc, _)| filter.matches(&doc.metadata))
            .map(|(doc, embedding)| ScoredDocument {
                document: doc.clone(),
                score: cosine_similarity(query_embedding, embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn rebuild(&self, name: &str, dim: usize) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.insert(
            name.to_string(),
            Collection {
                dim,
                docs: Vec::new(),
            },
        );
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    #[tokio::test]
    async fn search_orders_by_descending_score_and_respects_k() {
        let store = InMemoryVectorStore::new();
        store.create_collection("prices", 2).await.unwrap();
        store
            .upsert(
                "prices",
                vec![
                    (Document::new("a", "low"), vec![1.0, 0.0]),
                    (Document::new("b", "high"), vec![0.9, 0.1]),
                    (Document::new("c", "mid"), vec![0.5, 0.5]),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search("prices", &[1.0, 0.0], 2, &Filter::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[0].document.id, "a");
    }

    #[tokio::test]
    async fn k_zero_returns_empty_without_error() {
        let store = InMemoryVectorStore::new();
        store.create_collection("prices", 2).await.unwrap();
        store
            .upsert("prices", vec![(Document::new("a", "x"), vec![1.0, 0.0])])
            .await
            .unwrap();
        let hits = store
            .search("prices", &[1.0, 0.0], 0, &Filter::new())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn dimension_conflict_on_recreate() {
        let store = InMemoryVectorStore::new();
        store.create_collection("soil", 4).await.unwrap();
        let err = store.create_collection("soil", 8).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionConflict { .. }));
    }

    #[tokio::test]
    async fn shape_mismatch_on_upsert() {
        let store = InMemoryVectorStore::new();
        store.create_collection("soil", 4).await.unwrap();
        let err = store
            .upsert("soil", vec![(Document::new("a", "x"), vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
    }

    #[tokio::test]
    async fn search_missing_collection_is_not_found() {
        let store = InMemoryVectorStore::new();
        let err = store
            .search("missing", &[1.0], 1, &Filter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn filter_restricts_results() {
        let store = InMemoryVectorStore::new();
        store.create_collection("prices", 2).await.unwrap();
        store
            .upsert(
                "prices",
                vec![
                    (
                        Document::new("a", "tomato").with_field("market", "Bargarh"),
                        vec![1.0, 0.0],
                    ),
                    (
                        Document::new("b", "tomato").with_field("market", "Cuttack"),
                        vec![1.0, 0.0],
                    ),
                ],
            )
            .await
            .unwrap();
        let filter = Filter::new().eq("market", "Bargarh");
        let hits = store
            .search("prices", &[1.0, 0.0], 10, &filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "a");
    }

    #[tokio::test]
    async fn rebuild_is_idempotent_for_search_results() {
        let store = InMemoryVectorStore::new();
        store.create_collection("prices", 2).await.unwrap();
        store
            .upsert("prices", vec![(Document::new("a", "x"), vec![1.0, 0.0])])
            .await
            .unwrap();
        store.rebuild("prices", 2).await.unwrap();
        store
            .upsert("prices", vec![(Document::new("a", "x"), vec![1.0, 0.0])])
            .await
            .unwrap();
        let first = store
            .search("prices", &[1.0, 0.0], 5, &Filter::new())
            .await
            .unwrap();
        store.rebuild("prices", 2).await.unwrap();
        store
            .upsert("prices", vec![(Document::new("a", "x"), vec![1.0, 0.0])])
            .await
            .unwrap();
        let second = store
            .search("prices", &[1.0, 0.0], 5, &Filter::new())
            .await
            .unwrap();
        assert_eq!(first.len(), second.len());
    }
}
