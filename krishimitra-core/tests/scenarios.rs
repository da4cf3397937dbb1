//! End-to-end scenarios exercised through the `Engine` facade rather than
//! individual modules, matching the six concrete cases in spec §8: a
//! simple market-price query, a complex multi-step query, out-of-order
//! subtask execution, subtask failure blocking completion, a degraded
//! classifier when structured generation fails, and a rebuild racing
//! readers.

use krishimitra_core::config::Config;
use krishimitra_core::engine::Engine;
use krishimitra_core::error::EngineError;
use krishimitra_core::llm::mock::{MockFailure, Scripted};
use krishimitra_core::llm::{LLMClient, MockLLMClient};
use krishimitra_core::retriever::{StubWeatherCollaborator, WeatherCollaborator};
use krishimitra_core::types::{AnswerOutcome, AnswerParams, IntentLabel, Query, WorkflowState};
use krishimitra_ragstore::{EmbeddingFunction, HashEmbedder, InMemoryVectorStore, VectorStore};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn build_engine(client: Arc<dyn LLMClient>) -> Engine {
    let config = Config {
        vector_store_path: "unused".to_string(),
        ..Config::default()
    };
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let embedder: Arc<dyn EmbeddingFunction> = Arc::new(HashEmbedder::new(16));
    let weather: Arc<dyn WeatherCollaborator> = Arc::new(StubWeatherCollaborator);
    Engine::new(&config, store, embedder, weather, client)
}

/// Scenario 1: a simple market-price query returns a direct, grounded
/// answer without ever touching the workflow manager.
#[tokio::test]
async fn simple_market_price_query_returns_direct_answer() {
    let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::always_text("tomato is 20rs/kg today"));
    let engine = build_engine(client);
    let query = Query::new("what is the price of tomato today");
    let response = engine
        .answer(query, AnswerParams::default(), &CancellationToken::new())
        .await
        .unwrap();

    match response.outcome {
        AnswerOutcome::Direct { intent, response, .. } => {
            assert_eq!(intent, IntentLabel::MarketPrice);
            assert!(response.contains("20rs"));
        }
        AnswerOutcome::Workflow { .. } => panic!("expected a direct answer"),
    }
}

/// Scenario 2: a complex query decomposes into a real, independently
/// trackable workflow; each subtask executes in order, then finalizes into
/// a synthesized summary.
#[tokio::test]
async fn complex_query_executes_subtasks_in_order_then_finalizes() {
    let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![
        Scripted::Structured(json!({
            "label": "complex",
            "confidence": 0.9,
            "is_complex": true,
            "subtasks": [
                {"description": "check soil ph for paddy", "intent_type": "soil"},
                {"description": "recommend a fertilizer schedule", "intent_type": "fertilizer"},
                {"description": "list subsidy schemes for paddy farmers", "intent_type": "government_scheme"}
            ]
        })),
        Scripted::Text("soil is slightly acidic".to_string()),
        Scripted::Text("apply urea in split doses".to_string()),
        Scripted::Text("PM-KISAN applies".to_string()),
        Scripted::Text("final synthesized answer".to_string()),
    ]));
    let engine = build_engine(client);
    let token = CancellationToken::new();

    let response = engine
        .answer(
            Query::new("help me plan paddy cultivation end to end"),
            AnswerParams::default(),
            &token,
        )
        .await
        .unwrap();

    let AnswerOutcome::Workflow { workflow_id, subtasks } = response.outcome else {
        panic!("expected a workflow handoff");
    };
    assert_eq!(subtasks.len(), 3);
    assert_ne!(workflow_id, uuid::Uuid::nil());

    for index in 0..3 {
        let result = engine.workflow_execute(workflow_id, index, &token).await.unwrap();
        assert!(result.completed);
        assert!(result.error.is_none());
    }

    let status = engine.workflow_status(workflow_id, &token).await.unwrap();
    assert_eq!(status.progress.completed, 3);
    assert_eq!(status.progress.total, 3);

    let summary = engine.workflow_summary(workflow_id, &token).await.unwrap();
    assert!(summary.completed);
    assert_eq!(summary.summary, "final synthesized answer");

    let status = engine.workflow_status(workflow_id, &token).await.unwrap();
    assert_eq!(status.status, WorkflowState::Completed);
}

/// Scenario 3: executing subtasks out of order is rejected without
/// mutating workflow state.
#[tokio::test]
async fn out_of_order_subtask_execution_is_rejected() {
    let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![Scripted::Structured(json!({
        "label": "complex",
        "confidence": 0.9,
        "is_complex": true,
        "subtasks": [
            {"description": "check soil ph", "intent_type": "soil"},
            {"description": "recommend fertilizer", "intent_type": "fertilizer"}
        ]
    }))]));
    let engine = build_engine(client);
    let token = CancellationToken::new();

    let response = engine
        .answer(Query::new("soil then fertilizer"), AnswerParams::default(), &token)
        .await
        .unwrap();
    let AnswerOutcome::Workflow { workflow_id, .. } = response.outcome else {
        panic!("expected a workflow handoff");
    };

    let err = engine.workflow_execute(workflow_id, 1, &token).await.unwrap_err();
    assert!(matches!(err, EngineError::OutOfOrder { expected: 0, got: 1 }));

    let status = engine.workflow_status(workflow_id, &token).await.unwrap();
    assert_eq!(status.progress.completed, 0);
}

/// Scenario 4: a subtask failure transitions the workflow to `errored`,
/// blocking further execution and summarization.
#[tokio::test]
async fn subtask_failure_blocks_further_execution_and_summary() {
    let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![
        Scripted::Structured(json!({
            "label": "complex",
            "confidence": 0.9,
            "is_complex": true,
            "subtasks": [
                {"description": "check soil ph", "intent_type": "soil"},
                {"description": "recommend fertilizer", "intent_type": "fertilizer"}
            ]
        })),
        Scripted::Fail(MockFailure::Unavailable),
    ]));
    let engine = build_engine(client);
    let token = CancellationToken::new();

    let response = engine
        .answer(Query::new("soil then fertilizer"), AnswerParams::default(), &token)
        .await
        .unwrap();
    let AnswerOutcome::Workflow { workflow_id, .. } = response.outcome else {
        panic!("expected a workflow handoff");
    };

    let first = engine.workflow_execute(workflow_id, 0, &token).await.unwrap();
    assert!(first.error.is_some());

    let err = engine.workflow_execute(workflow_id, 1, &token).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowErrored { .. }));

    let err = engine.workflow_summary(workflow_id, &token).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowErrored { .. }));
}

/// Scenario 5: when the classifier's structured call returns a shape that
/// doesn't conform to the schema, classification degrades to `General`
/// with zero confidence rather than the whole request failing.
#[tokio::test]
async fn malformed_structured_output_degrades_to_general_intent() {
    let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![
        Scripted::Structured(json!({"not": "the expected shape"})),
        Scripted::Text("a fallback answer grounded in whatever context was found".to_string()),
    ]));
    let engine = build_engine(client);
    let query = Query::new("tell me something about farming, nothing specific");
    let response = engine
        .answer(query, AnswerParams::default(), &CancellationToken::new())
        .await
        .unwrap();

    match response.outcome {
        AnswerOutcome::Direct { intent, .. } => assert_eq!(intent, IntentLabel::General),
        AnswerOutcome::Workflow { .. } => panic!("expected a direct, degraded answer"),
    }
}

/// Scenario 6: rebuilding a collection while other queries are in flight
/// does not corrupt state — in-flight reads observe either the old or
/// rebuilt (empty) collection, never a partial one.
#[tokio::test]
async fn rebuild_is_safe_alongside_concurrent_reads() {
    let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::always_text("ok"));
    let engine = Arc::new(build_engine(client));
    let token = CancellationToken::new();

    let mut readers = Vec::new();
    for _ in 0..5 {
        let engine = engine.clone();
        let token = token.clone();
        readers.push(tokio::spawn(async move {
            engine
                .answer(Query::new("wheat price in bargarh"), AnswerParams::default(), &token)
                .await
        }));
    }

    let rebuilt = engine
        .rebuild_index(Some("prices".to_string()), &token)
        .await
        .unwrap();
    assert_eq!(rebuilt, vec!["prices".to_string()]);

    for reader in readers {
        reader.await.unwrap().unwrap();
    }
}

/// A cancelled token short-circuits before any effect is applied.
#[tokio::test]
async fn cancellation_applies_no_partial_effects() {
    let client: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![Scripted::Structured(json!({
        "label": "complex",
        "confidence": 0.9,
        "is_complex": true,
        "subtasks": [
            {"description": "a", "intent_type": "soil"},
            {"description": "b", "intent_type": "fertilizer"}
        ]
    }))]));
    let engine = build_engine(client);
    let token = CancellationToken::new();
    token.cancel();

    let err = engine
        .answer(Query::new("soil then fertilizer"), AnswerParams::default(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}
