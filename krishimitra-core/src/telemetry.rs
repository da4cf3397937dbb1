//! Tracing setup, mirroring `weavegraph::telemetry`'s plain-formatter
//! approach but wired to `tracing-subscriber` instead of a bespoke event
//! bus — this core doesn't need a graph-scoped event stream, just
//! structured, filterable logs.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber once. Safe to call more than
/// once; subsequent calls are no-ops (mirrors `tracing`'s own guidance for
/// library crates sharing a process with a test harness).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_ansi(true).try_init();
}

/// Emit the degraded-mode marker required by spec §7: a structured field,
/// not a free-text log line, so callers can filter on `degraded=true`.
pub fn log_degraded(component: &str, reason: &str) {
    tracing::warn!(degraded = true, component, reason, "degraded fallback engaged");
}
