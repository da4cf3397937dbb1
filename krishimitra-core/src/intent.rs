//! Routing and complexity decisions (spec §4.4). The heuristic pre-pass is a
//! curated lexicon scan — a fast path mirroring the retrieval-before-LLM
//! shape of [`crate::retriever::Retriever`] — falling through to an LLM call
//! via [`crate::llm::LLMClient::generate_structured`] only when the heuristic
//! is ambiguous.

use crate::error::EngineError;
use crate::llm::{GenerateParams, LLMClient, Message};
use crate::telemetry::log_degraded;
use crate::types::{sequence_subtasks, IntentDecision, IntentLabel, Query};
use serde_json::{json, Value};
use std::sync::Arc;

/// One lexicon entry: tokens that, if present, contribute to a label's
/// heuristic score.
struct LexiconEntry {
    label: IntentLabel,
    tokens: &'static [&'static str],
}

const LEXICON: &[LexiconEntry] = &[
    LexiconEntry {
        label: IntentLabel::MarketPrice,
        tokens: &["price", "mandi", "rate", "cost", "sell for", "market price"],
    },
    LexiconEntry {
        label: IntentLabel::Weather,
        tokens: &["rain", "forecast", "weather", "temperature", "humidity"],
    },
    LexiconEntry {
        label: IntentLabel::PestControl,
        tokens: &["pest", "insect", "infestation", "disease", "fungus"],
    },
    LexiconEntry {
        label: IntentLabel::Fertilizer,
        tokens: &["fertilizer", "urea", "npk", "nutrient", "manure"],
    },
    LexiconEntry {
        label: IntentLabel::Soil,
        tokens: &["soil", "ph", "topsoil", "loam"],
    },
    LexiconEntry {
        label: IntentLabel::GovernmentScheme,
        tokens: &["scheme", "subsidy", "msp", "government", "yojana"],
    },
    LexiconEntry {
        label: IntentLabel::CropAdvisory,
        tokens: &["crop", "sowing", "harvest", "yield", "variety"],
    },
];

/// Markers that force a fall-through to the LLM pass even with a clear
/// heuristic winner (spec §4.4 step 1: "conjunctive/comparison markers").
const CONJUNCTIVE_MARKERS: &[&str] = &["and then", "compare", "both", "also tell"];

const CONFIDENCE_FLOOR: f32 = 0.3;
const TIE_BREAK_MARGIN: f32 = 0.1;

pub struct IntentClassifier {
    client: Arc<dyn LLMClient>,
    model: String,
}

impl IntentClassifier {
    pub fn new(client: Arc<dyn LLMClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub async fn classify(&self, query: &Query) -> IntentDecision {
        if let Some(decision) = heuristic_pass(&query.text) {
            return decision;
        }

        match self.llm_pass(query).await {
            Ok(decision) => validate_and_coerce(decision),
            Err(err) => {
                log_degraded("intent_classifier", &err.to_string());
                IntentDecision::simple(IntentLabel::General, 0.0)
            }
        }
    }

    async fn llm_pass(&self, query: &Query) -> Result<RawDecision, EngineError> {
        let schema = classification_schema();
        let messages = vec![
            Message::system(CLASSIFIER_PREAMBLE),
            Message::user(query.text.clone()),
        ];
        let params = GenerateParams {
            timeout_ms: GenerateParams::structured_timeout_ms(),
            ..GenerateParams::default()
        };
        let value = self
            .client
            .generate_structured(&messages, &self.model, &schema, &params)
            .await?;
        parse_raw_decision(&value)
    }
}

const CLASSIFIER_PREAMBLE: &str = "You are an intent classifier for an agricultural assistant. \
Classify the user's query into one label and decide whether it requires decomposition into \
subtasks. Emit is_complex=true with at least two subtasks only when the query cannot be answered \
by a single retrieval-and-generation pass: it needs data from two collections, needs comparison \
across dimensions, or has explicit sequencing.";

fn classification_schema() -> Value {
    json!({
        "required": ["label", "confidence", "is_complex", "subtasks"],
        "properties": {
            "label": {"type": "string"},
            "confidence": {"type": "number"},
            "is_complex": {"type": "boolean"},
            "subtasks": {"type": "array"},
        }
    })
}

struct RawDecision {
    label: String,
    confidence: f32,
    is_complex: bool,
    subtasks: Vec<(String, String)>,
}

fn parse_raw_decision(value: &Value) -> Result<RawDecision, EngineError> {
    let label = value
        .get("label")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::SchemaViolation { attempts: 1 })?
        .to_string();
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| EngineError::SchemaViolation { attempts: 1 })? as f32;
    let is_complex = value
        .get("is_complex")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let subtasks = value
        .get("subtasks")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let description = item.get("description").and_then(Value::as_str)?;
                    let intent_type = item.get("intent_type").and_then(Value::as_str)?;
                    Some((description.to_string(), intent_type.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(RawDecision {
        label,
        confidence,
        is_complex,
        subtasks,
    })
}

/// Apply spec §4.4 step 3 validation & coercion to an LLM-produced decision.
fn validate_and_coerce(raw: RawDecision) -> IntentDecision {
    let label = IntentLabel::parse_label(&raw.label);
    let confidence = raw.confidence.clamp(0.0, 1.0);

    let subtasks = sequence_subtasks(
        raw.subtasks
            .into_iter()
            .map(|(description, intent_type)| (description, IntentLabel::parse_label(&intent_type)))
            .collect(),
    );

    let mut decision = if raw.is_complex {
        IntentDecision::complex(label, confidence, subtasks)
    } else {
        IntentDecision::simple(label, confidence)
    };

    if decision.confidence < CONFIDENCE_FLOOR {
        decision.label = IntentLabel::General;
    }

    decision
}

/// Score each lexicon label against `text` and return a decision if exactly
/// one label wins unambiguously and no conjunctive marker is present (spec
/// §4.4 step 1, tie-break rule).
fn heuristic_pass(text: &str) -> Option<IntentDecision> {
    let lowered = text.to_lowercase();

    if CONJUNCTIVE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return None;
    }

    let mut scores: Vec<(IntentLabel, f32)> = LEXICON
        .iter()
        .map(|entry| {
            let hits = entry
                .tokens
                .iter()
                .filter(|token| lowered.contains(*token))
                .count();
            (entry.label, hits as f32)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    match scores.as_slice() {
        [] => None,
        [(label, _)] => Some(IntentDecision::simple(*label, 0.9)),
        [(label, top), (_, second), ..] if top - second >= TIE_BREAK_MARGIN => {
            Some(IntentDecision::simple(*label, 0.9))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLLMClient, Scripted};

    #[test]
    fn heuristic_pass_wins_on_clear_single_label() {
        let decision = heuristic_pass("what is the mandi price for wheat today");
        let decision = decision.expect("expected a heuristic decision");
        assert_eq!(decision.label, IntentLabel::MarketPrice);
        assert!(!decision.is_complex);
    }

    #[test]
    fn heuristic_pass_falls_through_on_conjunctive_marker() {
        let decision = heuristic_pass("what is the mandi price and then compare with weather forecast");
        assert!(decision.is_none());
    }

    #[test]
    fn heuristic_pass_falls_through_on_ambiguous_tie() {
        let decision = heuristic_pass("tell me about soil and fertilizer");
        assert!(decision.is_none());
    }

    #[tokio::test]
    async fn llm_pass_coerces_low_confidence_to_general() {
        let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![Scripted::Structured(json!({
            "label": "weather",
            "confidence": 0.1,
            "is_complex": false,
            "subtasks": []
        }))]));
        let classifier = IntentClassifier::new(client, "local-default");
        let decision = classifier.classify(&Query::new("xyzzy plugh")).await;
        assert_eq!(decision.label, IntentLabel::General);
    }

    #[tokio::test]
    async fn llm_pass_coerces_complex_with_one_subtask_to_simple() {
        let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![Scripted::Structured(json!({
            "label": "crop_advisory",
            "confidence": 0.8,
            "is_complex": true,
            "subtasks": [{"description": "only one", "intent_type": "soil"}]
        }))]));
        let classifier = IntentClassifier::new(client, "local-default");
        let decision = classifier.classify(&Query::new("xyzzy plugh")).await;
        assert!(!decision.is_complex);
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_general() {
        let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![Scripted::Fail(
            crate::llm::mock::MockFailure::Unavailable,
        )]));
        let classifier = IntentClassifier::new(client, "local-default");
        let decision = classifier.classify(&Query::new("xyzzy plugh")).await;
        assert_eq!(decision.label, IntentLabel::General);
        assert_eq!(decision.confidence, 0.0);
        assert!(!decision.is_complex);
    }
}
