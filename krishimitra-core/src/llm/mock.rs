//! A scriptable [`LLMClient`] for exercising the pipeline and workflow
//! manager without network access (spec §8 scenarios), in the style of
//! `weavegraph`'s test doubles for its node trait.

use super::client::{GenerateParams, LLMClient, Message};
use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

/// One scripted response: either success or a specific failure to surface.
#[derive(Clone, Debug)]
pub enum Scripted {
    Text(String),
    Structured(Value),
    Fail(MockFailure),
}

#[derive(Clone, Copy, Debug)]
pub enum MockFailure {
    Auth,
    Quota,
    Busy,
    Unavailable,
    ContentRefused,
}

impl MockFailure {
    fn into_error(self) -> EngineError {
        match self {
            MockFailure::Auth => EngineError::UpstreamAuth,
            MockFailure::Quota => EngineError::UpstreamQuota,
            MockFailure::Busy => EngineError::UpstreamBusy,
            MockFailure::Unavailable => EngineError::UpstreamUnavailable("mock unavailable".into()),
            MockFailure::ContentRefused => EngineError::ContentRefused("mock refusal".into()),
        }
    }
}

/// Replays a fixed queue of responses in order, one per call, regardless of
/// whether the call was `generate` or `generate_structured`. Panics if the
/// queue is exhausted, surfacing test setup mistakes immediately rather than
/// deadlocking on a default response.
pub struct MockLLMClient {
    queue: Mutex<Vec<Scripted>>,
}

impl MockLLMClient {
    pub fn new(queue: Vec<Scripted>) -> Self {
        Self {
            queue: Mutex::new(queue),
        }
    }

    /// Convenience constructor for a client that always returns the same
    /// text, useful for tests that don't care how many times it's called.
    pub fn always_text(text: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(vec![Scripted::Text(text.into())]),
        }
    }

    fn next(&self) -> Scripted {
        let mut guard = self.queue.lock().expect("mock queue poisoned");
        if guard.len() > 1 {
            guard.remove(0)
        } else {
            guard
                .first()
                .cloned()
                .expect("MockLLMClient queue exhausted")
        }
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn generate(
        &self,
        _messages: &[Message],
        _model: &str,
        _params: &GenerateParams,
    ) -> Result<String, EngineError> {
        match self.next() {
            Scripted::Text(text) => Ok(text),
            Scripted::Structured(value) => Ok(value.to_string()),
            Scripted::Fail(failure) => Err(failure.into_error()),
        }
    }

    async fn generate_structured(
        &self,
        _messages: &[Message],
        _model: &str,
        _schema: &Value,
        _params: &GenerateParams,
    ) -> Result<Value, EngineError> {
        match self.next() {
            Scripted::Structured(value) => Ok(value),
            Scripted::Text(text) => serde_json::from_str(&text)
                .map_err(|_| EngineError::SchemaViolation { attempts: 1 }),
            Scripted::Fail(failure) => Err(failure.into_error()),
        }
    }
}
