use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Requested output shape (spec.md:81 `response_format: "text"|"json"`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Recognized generation parameters (spec §4.3).
#[derive(Clone, Debug)]
pub struct GenerateParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub stop: Option<Vec<String>>,
    pub response_format: ResponseFormat,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
            timeout_ms: 30_000,
            stop: None,
            response_format: ResponseFormat::Text,
        }
    }
}

impl GenerateParams {
    /// Timeout for `generate_structured`, which budgets more time for the
    /// retry-with-feedback loop (spec §5: "LLM structured 45s").
    pub fn structured_timeout_ms() -> u64 {
        45_000
    }
}

/// Provider-independent text generation (spec §4.3).
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Chat-style completion returning free text.
    async fn generate(
        &self,
        messages: &[Message],
        model: &str,
        params: &GenerateParams,
    ) -> Result<String, EngineError>;

    /// Completion whose output conforms to `schema`. Retries up to the
    /// configured policy on malformed output, appending feedback to the
    /// next attempt's messages; fails with [`EngineError::SchemaViolation`]
    /// if still malformed.
    async fn generate_structured(
        &self,
        messages: &[Message],
        model: &str,
        schema: &Value,
        params: &GenerateParams,
    ) -> Result<Value, EngineError>;
}
