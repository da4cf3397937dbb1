//! Persistent vector storage and embedding abstraction.
//!
//! This crate provides the two leaf collaborators the agricultural query
//! core assumes rather than builds itself (see the parent spec's
//! Non-goals): a durable nearest-neighbor [`VectorStore`] and a
//! deterministic [`EmbeddingFunction`]. Everything above this crate
//! (intent classification, retrieval routing, workflow orchestration)
//! lives in `krishimitra-core` and depends only on the traits here.

pub mod document;
pub mod embedding;
pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;

pub use document::{Document, Metadata, MetadataValue};
pub use embedding::{EmbeddingFunction, HashEmbedder, RigEmbedder};
pub use error::StoreError;
pub use store::{Filter, ScoredDocument, VectorStore};
pub use store_memory::InMemoryVectorStore;
pub use store_sqlite::SqliteVectorStore;

/// The fixed set of persisted collections reference data is loaded into
/// (spec §2: "market prices, soil, pest control, fertilizers, schemes").
/// Populating them is CSV ingestion, explicitly out of scope (spec §1);
/// this list exists so `rebuild_index` and routing code share one source
/// of truth for the names instead of repeating string literals.
pub const COLLECTION_NAMES: &[&str] = &["prices", "soil", "pest_control", "fertilizers", "schemes"];
