//! Single-shot answering (spec §4.6): classify, retrieve, assemble a
//! grounded prompt, generate. Complex queries are handed off rather than
//! executed inline — the caller drives [`crate::workflow::WorkflowManager`]
//! from the returned subtasks.

use crate::error::EngineError;
use crate::intent::IntentClassifier;
use crate::llm::{GenerateParams, LLMClient, Message};
use crate::retriever::Retriever;
use crate::telemetry::log_degraded;
use crate::types::{AnswerOutcome, AnswerParams, IntentLabel, Query, RetrievalContext};
use std::sync::Arc;

const SYSTEM_PREAMBLE: &str = "You are an assistant answering agricultural queries for farmers. \
Ground your answer only in the provided context; never invent facts beyond it. If the context is \
empty, say plainly that no relevant information was found rather than guessing.";

pub struct QueryPipeline {
    classifier: Arc<IntentClassifier>,
    retriever: Arc<Retriever>,
    client: Arc<dyn LLMClient>,
    default_top_k: usize,
    default_model: String,
}

impl QueryPipeline {
    pub fn new(
        classifier: Arc<IntentClassifier>,
        retriever: Arc<Retriever>,
        client: Arc<dyn LLMClient>,
        default_top_k: usize,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            retriever,
            client,
            default_top_k,
            default_model: default_model.into(),
        }
    }

    pub async fn answer(&self, query: &Query, params: &AnswerParams) -> Result<AnswerOutcome, EngineError> {
        let decision = self.classifier.classify(query).await;

        if decision.is_complex {
            // The pipeline itself never registers a workflow — it has no
            // handle to a `WorkflowManager` and isn't the owner of workflow
            // identity. `workflow_id` here is a placeholder the caller
            // (`crate::engine::Engine::answer`) replaces with the id
            // `WorkflowManager::start` actually assigns.
            return Ok(AnswerOutcome::Workflow {
                workflow_id: uuid::Uuid::nil(),
                subtasks: decision.subtasks,
            });
        }

        let top_k = params.top_k.or(query.top_k).unwrap_or(self.default_top_k);
        let context = self.retriever.retrieve(&query.text, decision.label, top_k).await?;

        let model = params
            .model
            .clone()
            .or_else(|| query.model.clone())
            .unwrap_or_else(|| self.default_model.clone());

        let response = self
            .generate_grounded(&query.text, &context, &model)
            .await?;

        Ok(AnswerOutcome::Direct {
            response,
            intent: decision.label,
            context_summary: summarize_context(&context),
        })
    }

    /// Run a subtask of a decomposed workflow through the same
    /// embed→retrieve→prompt→generate shape as a top-level answer, scoped
    /// to the subtask's own intent (spec §4.7 `execute_subtask`).
    pub async fn answer_subtask(
        &self,
        subtask_text: &str,
        intent: IntentLabel,
        top_k: usize,
        model: &str,
    ) -> Result<String, EngineError> {
        let context = self.retriever.retrieve(subtask_text, intent, top_k).await?;
        self.generate_grounded(subtask_text, &context, model).await
    }

    async fn generate_grounded(
        &self,
        query_text: &str,
        context: &RetrievalContext,
        model: &str,
    ) -> Result<String, EngineError> {
        let context_block = if context.assembled_text.is_empty() {
            log_degraded("retriever", "no relevant context was retrieved for this query");
            "(no relevant context was found)".to_string()
        } else {
            context.assembled_text.clone()
        };
        let messages = vec![
            Message::system(SYSTEM_PREAMBLE),
            Message::user(format!("Query: {query_text}\n\nContext:\n{context_block}")),
        ];
        self.client
            .generate(&messages, model, &GenerateParams::default())
            .await
    }
}

fn summarize_context(context: &RetrievalContext) -> String {
    if context.hits.is_empty() {
        "no supporting context found".to_string()
    } else {
        format!("{} supporting document(s) retrieved", context.hits.len())
    }
}
