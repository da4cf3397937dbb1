//! # krishimitra-core
//!
//! Intent classification, semantic retrieval, LLM abstraction, and workflow
//! orchestration for an agricultural query-answering assistant.
//!
//! The durable collaborators this crate assumes rather than builds —
//! persistent nearest-neighbor search and a pretrained embedding function —
//! live in [`krishimitra_ragstore`], re-exported here for convenience.
//!
//! ## Quick start
//!
//! ```no_run
//! use krishimitra_core::config::Config;
//! use krishimitra_core::engine::Engine;
//! use krishimitra_core::types::{AnswerParams, Query};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), krishimitra_core::error::EngineError> {
//! let engine = Engine::bootstrap(Config::from_env()).await?;
//! let query = Query::new("What is the price of tomato in Bargarh today?");
//! let response = engine.answer(query, AnswerParams::default(), &CancellationToken::new()).await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`types`] — the domain model (spec §3): `Query`, `IntentLabel`,
//!   `IntentDecision`, `Workflow`, `SubtaskResult`, ...
//! - [`error`] — the `EngineError` taxonomy (spec §7).
//! - [`llm`] — provider-polymorphic text generation (spec §4.3).
//! - [`intent`] — routing and complexity classification (spec §4.4).
//! - [`retriever`] — evidence assembly via fan-out vector search (spec §4.5).
//! - [`pipeline`] — single-shot classify→retrieve→generate (spec §4.6).
//! - [`workflow`] — the decomposed-query state machine (spec §4.7).
//! - [`engine`] — the `Engine` facade implementing spec §6's external
//!   interface table.
//! - [`config`] — recognized configuration keys (spec §6).
//! - [`telemetry`] — tracing setup and the `degraded` marker (spec §7).

pub mod config;
pub mod engine;
pub mod error;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod retriever;
pub mod telemetry;
pub mod types;
pub mod workflow;

pub use krishimitra_ragstore as ragstore;
