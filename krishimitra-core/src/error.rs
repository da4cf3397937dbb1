//! Error taxonomy for the agricultural query core (spec §7).
//!
//! A single enum at the crate boundary, in the style of
//! `weavegraph::node::NodeError`: `thiserror` for the `Display`/`source`
//! chain, `miette::Diagnostic` for structured codes and operator-facing
//! help text. Leaf modules raise the specific variant; nothing upstream
//! re-wraps it in a generic `anyhow::Error`.

use krishimitra_ragstore::StoreError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    #[diagnostic(code(krishimitra::invalid_argument))]
    InvalidArgument(String),

    #[error("not found: {0}")]
    #[diagnostic(code(krishimitra::not_found))]
    NotFound(String),

    #[error("workflow subtask requested out of order: expected index {expected}, got {got}")]
    #[diagnostic(
        code(krishimitra::out_of_order),
        help("subtasks must be executed strictly in order; re-issue with index {expected}")
    )]
    OutOfOrder { expected: usize, got: usize },

    #[error("workflow is not yet complete: {completed}/{total} subtasks done")]
    #[diagnostic(code(krishimitra::incomplete))]
    Incomplete { completed: usize, total: usize },

    #[error("workflow {workflow_id} has errored and cannot proceed")]
    #[diagnostic(
        code(krishimitra::workflow_errored),
        help("inspect workflow_status for the failing subtask before retrying")
    )]
    WorkflowErrored { workflow_id: String },

    #[error("LLM structured output did not conform to schema after {attempts} attempts")]
    #[diagnostic(code(krishimitra::schema_violation))]
    SchemaViolation { attempts: u32 },

    #[error("upstream authentication failed")]
    #[diagnostic(code(krishimitra::upstream_auth))]
    UpstreamAuth,

    #[error("upstream quota exceeded")]
    #[diagnostic(code(krishimitra::upstream_quota))]
    UpstreamQuota,

    #[error("upstream busy: connection pool exhausted")]
    #[diagnostic(code(krishimitra::upstream_busy))]
    UpstreamBusy,

    #[error("upstream unavailable: {0}")]
    #[diagnostic(code(krishimitra::upstream_unavailable))]
    UpstreamUnavailable(String),

    #[error("content refused by provider: {0}")]
    #[diagnostic(code(krishimitra::content_refused))]
    ContentRefused(String),

    #[error("vector store dimension conflict")]
    #[diagnostic(code(krishimitra::dimension_conflict))]
    DimensionConflict,

    #[error("vector store shape mismatch")]
    #[diagnostic(code(krishimitra::shape_mismatch))]
    ShapeMismatch,

    #[error("operation cancelled")]
    #[diagnostic(code(krishimitra::cancelled))]
    Cancelled,

    #[error("internal error: {0}")]
    #[diagnostic(code(krishimitra::internal), help("this represents a bug; check logs for the full chain"))]
    Internal(String),
}

impl EngineError {
    /// Construct `Internal`, logging it with `tracing::error!` at the point
    /// of construction so spec §7's "`InternalError` is always logged with a
    /// stack trace" holds regardless of which call site raises it.
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(error = %message, "internal error");
        EngineError::Internal(message)
    }

    /// Message safe to show to the end caller once this error crosses the
    /// `Engine` boundary, per spec §7 ("user-facing messages strip internal
    /// details"). This is the function any out-of-scope front door (HTTP,
    /// SMS) calls to render an error for display.
    pub fn public_message(&self) -> String {
        public_message(self)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { name } => EngineError::NotFound(format!("collection '{name}'")),
            StoreError::DimensionConflict { .. } => EngineError::DimensionConflict,
            StoreError::ShapeMismatch { .. } => EngineError::ShapeMismatch,
            StoreError::InvalidArgument(msg) => EngineError::InvalidArgument(msg),
            StoreError::Backend(msg) => EngineError::internal(msg),
        }
    }
}

/// Strip internal detail from an error for the caller-facing surface, per
/// spec §7 ("user-facing messages strip internal details"). `InternalError`
/// is logged in full with `tracing::error!` at its construction site
/// ([`EngineError::internal`]) before this ever runs.
pub fn public_message(err: &EngineError) -> String {
    match err {
        EngineError::Internal(_) => "an internal error occurred".to_string(),
        other => other.to_string(),
    }
}
