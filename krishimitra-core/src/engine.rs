//! The `Engine` facade (SPEC_FULL §6): the External Interfaces table from
//! spec §6 realized as plain async methods over the wired-together
//! collaborators (`IntentClassifier`, `Retriever`, `QueryPipeline`,
//! `WorkflowManager`). This is the one type a caller (the out-of-scope HTTP
//! surface, SMS gateway, ...) actually holds.
//!
//! Every method accepts a [`CancellationToken`] (spec §5: "every operation
//! accepts a cancellation signal"). Cancellation is cooperative: the
//! in-flight future is raced against the token and, if the token fires
//! first, [`EngineError::Cancelled`] is returned and the future is dropped
//! without its effects being applied — partial `SubtaskResult`s are never
//! persisted (spec §5: "any partial SubtaskResult is discarded").

use crate::config::{Config, HASH_EMBEDDER_DIM, HASH_EMBEDDER_IDENTIFIER};
use crate::error::EngineError;
use crate::intent::IntentClassifier;
use crate::llm::{LLMClient, LLMProvider, RigLLMClient};
use crate::pipeline::QueryPipeline;
use crate::retriever::{Retriever, StubWeatherCollaborator, WeatherCollaborator};
use crate::types::{
    AnswerOutcome, AnswerParams, Progress, Query, SubtaskResult, SubtaskSpec, WorkflowId,
    WorkflowState, MAX_QUERY_LEN,
};
use crate::workflow::WorkflowManager;
use krishimitra_ragstore::{
    EmbeddingFunction, HashEmbedder, RigEmbedder, SqliteVectorStore, VectorStore, COLLECTION_NAMES,
};
use rig::prelude::*;
use rig::providers::{gemini, ollama, openai};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// `{response, intent}` for a direct answer, or `{workflow_id, subtasks}`
/// for a handoff, plus the `is_workflow` discriminant spec §6 puts on the
/// wire. Wraps [`AnswerOutcome`] rather than duplicating its fields.
#[derive(Clone, Debug)]
pub struct AnswerResponse {
    pub outcome: AnswerOutcome,
}

impl AnswerResponse {
    pub fn is_workflow(&self) -> bool {
        matches!(self.outcome, AnswerOutcome::Workflow { .. })
    }
}

#[derive(Clone, Debug)]
pub struct WorkflowStatus {
    pub status: WorkflowState,
    pub progress: Progress,
    pub subtasks: Vec<SubtaskSpec>,
    pub completed: Vec<SubtaskResult>,
}

#[derive(Clone, Debug)]
pub struct WorkflowSummary {
    pub summary: String,
    pub completed: bool,
}

pub struct Engine {
    pipeline: Arc<QueryPipeline>,
    workflow_manager: Arc<WorkflowManager>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingFunction>,
}

impl Engine {
    /// Wire an `Engine` from already-constructed collaborators. This is the
    /// constructor tests use (with [`crate::llm::MockLLMClient`] and
    /// [`krishimitra_ragstore::InMemoryVectorStore`]); production call sites
    /// generally prefer [`Engine::bootstrap`].
    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingFunction>,
        weather: Arc<dyn WeatherCollaborator>,
        llm_client: Arc<dyn LLMClient>,
    ) -> Self {
        let classifier = Arc::new(IntentClassifier::new(llm_client.clone(), config.default_model.clone()));
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            embedder.clone(),
            weather,
            config.context_byte_budget,
        ));
        let pipeline = Arc::new(QueryPipeline::new(
            classifier,
            retriever,
            llm_client,
            config.default_top_k,
            config.default_model.clone(),
        ));
        let workflow_manager = WorkflowManager::new(
            pipeline.clone(),
            config.workflow_ttl_seconds,
            config.workflow_cap,
            config.default_top_k,
            config.default_model.clone(),
        );
        Self {
            pipeline,
            workflow_manager,
            store,
            embedder,
        }
    }

    /// Build an `Engine` straight from [`Config`]: a `SqliteVectorStore` at
    /// `config.vector_store_path`, a `RigLLMClient` for `config.default_provider`,
    /// an embedder selected by `config.embedding_model` (see
    /// [`build_embedder`] — spec §1 Non-goals only excludes "producing
    /// embeddings from scratch," not choosing which embedder implementation
    /// is used), and the honest [`StubWeatherCollaborator`] for the
    /// out-of-scope weather proxy.
    pub async fn bootstrap(config: Config) -> Result<Self, EngineError> {
        let store: Arc<dyn VectorStore> = Arc::new(
            SqliteVectorStore::open(&config.vector_store_path)
                .await
                .map_err(EngineError::from)?,
        );
        let embedder = build_embedder(&config);
        let weather: Arc<dyn WeatherCollaborator> = Arc::new(StubWeatherCollaborator);
        let llm_client: Arc<dyn LLMClient> = Arc::new(RigLLMClient::with_concurrency(
            config.default_provider,
            config.llm_retry_max,
            config.llm_retry_base_ms,
            config.llm_retry_cap_ms,
            config.llm_max_concurrency,
        ));
        Ok(Self::new(&config, store, embedder, weather, llm_client))
    }

    /// `answer(query, params?)` (spec §6). Validates `query.text`'s length
    /// (spec §8 boundary: "Query length > configured maximum is
    /// rejected") before classifying. On a complex decision, registers the
    /// subtasks with the [`WorkflowManager`] rather than returning the
    /// pipeline's placeholder id.
    pub async fn answer(
        &self,
        query: Query,
        params: AnswerParams,
        cancel: &CancellationToken,
    ) -> Result<AnswerResponse, EngineError> {
        if query.text.len() > MAX_QUERY_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "query length {} exceeds the maximum of {MAX_QUERY_LEN}",
                query.text.len()
            )));
        }
        if query.text.trim().is_empty() {
            return Err(EngineError::InvalidArgument("query text must not be empty".to_string()));
        }

        let outcome = cancellable(cancel, self.pipeline.answer(&query, &params)).await?;

        let outcome = match outcome {
            AnswerOutcome::Workflow { subtasks, .. } => {
                let workflow_id = self
                    .workflow_manager
                    .start(query.text.clone(), subtasks.clone())
                    .await?;
                AnswerOutcome::Workflow { workflow_id, subtasks }
            }
            direct => direct,
        };

        Ok(AnswerResponse { outcome })
    }

    /// `workflow_execute(workflow_id, index)` (spec §6).
    pub async fn workflow_execute(
        &self,
        workflow_id: WorkflowId,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<SubtaskResult, EngineError> {
        cancellable(cancel, self.workflow_manager.execute_subtask(workflow_id, index)).await
    }

    /// `workflow_summary(workflow_id)` (spec §6).
    pub async fn workflow_summary(
        &self,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> Result<WorkflowSummary, EngineError> {
        let view = cancellable(cancel, self.workflow_manager.finalize_or_fetch(workflow_id)).await?;
        Ok(WorkflowSummary {
            summary: view.summary,
            completed: view.completed,
        })
    }

    /// `workflow_status(workflow_id)` (spec §6).
    pub async fn workflow_status(
        &self,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> Result<WorkflowStatus, EngineError> {
        let view = cancellable(cancel, self.workflow_manager.status(workflow_id)).await?;
        Ok(WorkflowStatus {
            status: view.status,
            progress: view.progress,
            subtasks: view.subtasks,
            completed: view.completed,
        })
    }

    /// `rebuild_index(collection_name?)` (spec §6). Repopulating a
    /// collection's contents from reference datasets is CSV ingestion and
    /// explicitly out of scope (spec §1); this drops and recreates the
    /// named collection(s) at the current embedding dimension, leaving them
    /// empty for the caller's own (out-of-scope) loader to repopulate.
    pub async fn rebuild_index(
        &self,
        collection_name: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, EngineError> {
        let names: Vec<String> = match collection_name {
            Some(name) => vec![name],
            None => COLLECTION_NAMES.iter().map(|s| s.to_string()).collect(),
        };
        let dim = self.embedder.dim();

        cancellable(cancel, async {
            for name in &names {
                self.store.rebuild(name, dim).await.map_err(EngineError::from)?;
            }
            Ok(names.clone())
        })
        .await
    }

    /// Render an `EngineError` for display to the end caller — the
    /// out-of-scope HTTP/SMS front door this crate hands errors to. Strips
    /// internal detail per spec §7 rather than forwarding `EngineError`'s
    /// full `Display` text, which any in-process Rust caller gets directly
    /// from the `Result`.
    pub fn describe_error(err: &EngineError) -> String {
        err.public_message()
    }
}

/// Select the embedder `config.embedding_model` names: the deterministic,
/// network-free [`HashEmbedder`] for the reserved
/// [`HASH_EMBEDDER_IDENTIFIER`], otherwise a [`RigEmbedder`] wrapping
/// `config.default_provider`'s `rig-core` embedding model of that name.
fn build_embedder(config: &Config) -> Arc<dyn EmbeddingFunction> {
    if config.embedding_model == HASH_EMBEDDER_IDENTIFIER {
        return Arc::new(HashEmbedder::new(HASH_EMBEDDER_DIM));
    }
    match config.default_provider {
        LLMProvider::HostedA => Arc::new(RigEmbedder::new(
            openai::Client::from_env().embedding_model(&config.embedding_model),
        )),
        LLMProvider::HostedB => Arc::new(RigEmbedder::new(
            gemini::Client::from_env().embedding_model(&config.embedding_model),
        )),
        LLMProvider::Local => Arc::new(RigEmbedder::new(
            ollama::Client::new().embedding_model(&config.embedding_model),
        )),
    }
}

/// Race `fut` against `cancel`, returning [`EngineError::Cancelled`] if the
/// token fires first. `biased` favors observing an already-cancelled token
/// over a future that happens to resolve in the same poll.
async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = fut => result,
    }
}
