//! Core domain model (spec §3). Types here enforce their invariants at
//! construction rather than leaving callers to maintain them by
//! convention — e.g. [`IntentDecision::new`] cannot produce
//! `is_complex=true` with fewer than two subtasks (invariant 5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed (but extensible) intent taxonomy. Unknown labels recovered
/// from older persisted data, or emitted by a misbehaving LLM, fall back to
/// [`IntentLabel::General`] rather than failing to parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum IntentLabel {
    MarketPrice,
    Weather,
    PestControl,
    Fertilizer,
    Soil,
    GovernmentScheme,
    CropAdvisory,
    General,
    Complex,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::MarketPrice => "market_price",
            IntentLabel::Weather => "weather",
            IntentLabel::PestControl => "pest_control",
            IntentLabel::Fertilizer => "fertilizer",
            IntentLabel::Soil => "soil",
            IntentLabel::GovernmentScheme => "government_scheme",
            IntentLabel::CropAdvisory => "crop_advisory",
            IntentLabel::General => "general",
            IntentLabel::Complex => "complex",
        }
    }

    /// Heuristic fallback used to coerce an unknown label string (spec
    /// §4.4 validation step 3: "If any subtask.intent_type is unknown,
    /// replace with general").
    pub fn parse_label(raw: &str) -> IntentLabel {
        match raw {
            "market_price" => IntentLabel::MarketPrice,
            "weather" => IntentLabel::Weather,
            "pest_control" => IntentLabel::PestControl,
            "fertilizer" => IntentLabel::Fertilizer,
            "soil" => IntentLabel::Soil,
            "government_scheme" => IntentLabel::GovernmentScheme,
            "crop_advisory" => IntentLabel::CropAdvisory,
            "complex" => IntentLabel::Complex,
            _ => IntentLabel::General,
        }
    }

    /// The vector store collection name for this label (spec §6:
    /// "one vector collection per IntentLabel... lowercase,
    /// underscore-separated").
    pub fn collection_name(&self) -> &'static str {
        self.as_str()
    }
}

/// The user utterance plus optional per-call hints. Immutable within a
/// single execution.
#[derive(Clone, Debug)]
pub struct Query {
    pub text: String,
    pub top_k: Option<usize>,
    pub provider: Option<crate::llm::LLMProvider>,
    pub model: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: None,
            provider: None,
            model: None,
        }
    }
}

/// The maximum accepted query length (spec §8: "Query length > configured
/// maximum is rejected").
pub const MAX_QUERY_LEN: usize = 4000;

/// One atomic step of a decomposed workflow.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub description: String,
    pub intent_type: IntentLabel,
    pub order_index: usize,
}

/// Assign contiguous, strictly increasing `order_index` values to a list of
/// `(description, intent_type)` pairs, per invariant: "order_index is
/// contiguous from 0 and strictly increasing within a workflow".
pub fn sequence_subtasks(specs: Vec<(String, IntentLabel)>) -> Vec<SubtaskSpec> {
    specs
        .into_iter()
        .enumerate()
        .map(|(order_index, (description, intent_type))| SubtaskSpec {
            description,
            intent_type,
            order_index,
        })
        .collect()
}

/// `{label, confidence, is_complex, subtasks?}` — invariant-checked at
/// construction (spec invariant 5: `is_complex=true` requires
/// `len(subtasks) >= 2`, otherwise coerced to `is_complex=false`).
#[derive(Clone, Debug, PartialEq)]
pub struct IntentDecision {
    pub label: IntentLabel,
    pub confidence: f32,
    pub is_complex: bool,
    pub subtasks: Vec<SubtaskSpec>,
}

impl IntentDecision {
    pub fn simple(label: IntentLabel, confidence: f32) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            is_complex: false,
            subtasks: Vec::new(),
        }
    }

    /// Construct a decision from a candidate subtask list, coercing
    /// `is_complex` down to `false` if fewer than two subtasks survive
    /// (invariant 5; spec §4.4 validation step 3 also performs this
    /// coercion explicitly).
    pub fn complex(label: IntentLabel, confidence: f32, subtasks: Vec<SubtaskSpec>) -> Self {
        let is_complex = subtasks.len() >= 2;
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            is_complex,
            subtasks: if is_complex { subtasks } else { Vec::new() },
        }
    }
}

/// A single retrievable record, re-exported at this layer so callers don't
/// need to depend on `krishimitra-ragstore` directly for the common case.
pub use krishimitra_ragstore::Document;

/// Ordered evidence assembled for a query (spec §3/§4.5).
#[derive(Clone, Debug, Default)]
pub struct RetrievalContext {
    pub hits: Vec<Document>,
    pub scores: Vec<f32>,
    pub assembled_text: String,
}

pub type WorkflowId = Uuid;

/// `{order_index, completed, response?, error?}` — exactly one of
/// `response`/`error` is set when `completed=true` (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub order_index: usize,
    pub completed: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl SubtaskResult {
    pub fn success(order_index: usize, response: impl Into<String>) -> Self {
        Self {
            order_index,
            completed: true,
            response: Some(response.into()),
            error: None,
        }
    }

    pub fn failure(order_index: usize, error: impl Into<String>) -> Self {
        Self {
            order_index,
            completed: true,
            response: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Pending,
    Running,
    Completed,
    Errored,
}

/// A persistent record of a decomposed query and its ordered subtask
/// executions (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: WorkflowId,
    pub original_query: String,
    pub subtasks: Vec<SubtaskSpec>,
    pub completed: Vec<SubtaskResult>,
    pub status: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: Option<String>,
}

impl Workflow {
    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.completed.len(),
            total: self.subtasks.len(),
        }
    }
}

/// `len(completed)/len(subtasks)` as a small value type rather than ad hoc
/// float math at each call site (SPEC_FULL §11).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}

/// Caller-supplied overrides for [`crate::engine::Engine::answer`].
#[derive(Clone, Debug, Default)]
pub struct AnswerParams {
    pub top_k: Option<usize>,
    pub provider: Option<crate::llm::LLMProvider>,
    pub model: Option<String>,
}

/// The result of `answer`: either a direct response, or a handoff to the
/// workflow manager for a complex query (spec §4.6 step 2, §6).
#[derive(Clone, Debug)]
pub enum AnswerOutcome {
    Direct {
        response: String,
        intent: IntentLabel,
        context_summary: String,
    },
    Workflow {
        workflow_id: WorkflowId,
        subtasks: Vec<SubtaskSpec>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowStatusView {
    pub status: WorkflowState,
    pub progress: Progress,
    pub subtasks: Vec<SubtaskSpec>,
    pub completed: Vec<SubtaskResult>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowSummaryView {
    pub summary: String,
    pub completed: bool,
}
