//! Recognized configuration keys (spec §6), resolved in priority order:
//! explicit override > environment variable (via `dotenvy`) > hard
//! default. Mirrors `weavegraph::runtimes::RuntimeConfig`'s
//! `resolve_sqlite_db_name` pattern, generalized to every key in the spec's
//! Configuration table.

use crate::llm::LLMProvider;

/// Sentinel `embedding_model` value selecting the deterministic, network-free
/// [`krishimitra_ragstore::HashEmbedder`] instead of a provider-backed
/// [`krishimitra_ragstore::RigEmbedder`]. Any other value is passed straight
/// through to `rig-core` as the embedding model name for `default_provider`.
pub const HASH_EMBEDDER_IDENTIFIER: &str = "hash-embedder-v1";

/// Embedding dimension used when `embedding_model` selects the hash fallback.
pub const HASH_EMBEDDER_DIM: usize = 256;

#[derive(Clone, Debug)]
pub struct Config {
    pub vector_store_path: String,
    pub embedding_model: String,
    pub default_top_k: usize,
    pub default_provider: LLMProvider,
    pub default_model: String,
    pub workflow_ttl_seconds: u64,
    pub workflow_cap: usize,
    pub context_byte_budget: usize,
    pub llm_retry_max: u32,
    pub llm_retry_base_ms: u64,
    pub llm_retry_cap_ms: u64,
    /// Bounded connection-pool size for the LLM client (spec §5:
    /// "pool exhaustion ... surfaces UpstreamBusy"). Not a spec.md key, but
    /// required to realize the concurrency model described in SPEC_FULL §5.
    pub llm_max_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vector_store_path: env_or("KRISHIMITRA_VECTOR_STORE_PATH", "krishimitra.db"),
            embedding_model: env_or("KRISHIMITRA_EMBEDDING_MODEL", HASH_EMBEDDER_IDENTIFIER),
            default_top_k: env_parse_or("KRISHIMITRA_DEFAULT_TOP_K", 5),
            default_provider: LLMProvider::Local,
            default_model: env_or("KRISHIMITRA_DEFAULT_MODEL", "local-default"),
            workflow_ttl_seconds: env_parse_or("KRISHIMITRA_WORKFLOW_TTL_SECONDS", 3600),
            workflow_cap: env_parse_or("KRISHIMITRA_WORKFLOW_CAP", 10_000),
            context_byte_budget: env_parse_or("KRISHIMITRA_CONTEXT_BYTE_BUDGET", 8192),
            llm_retry_max: env_parse_or("KRISHIMITRA_LLM_RETRY_MAX", 3),
            llm_retry_base_ms: env_parse_or("KRISHIMITRA_LLM_RETRY_BASE_MS", 500),
            llm_retry_cap_ms: env_parse_or("KRISHIMITRA_LLM_RETRY_CAP_MS", 4000),
            llm_max_concurrency: env_parse_or("KRISHIMITRA_LLM_MAX_CONCURRENCY", 4),
        }
    }
}

impl Config {
    /// Load configuration from `.env` + environment, falling back to the
    /// documented defaults for any unset key.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::default()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
