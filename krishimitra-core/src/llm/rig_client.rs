//! Production [`LLMClient`] backed by `rig-core` agents (grounded in
//! `weavegraph/examples/demo3.rs` and `demo4.rs`'s `preamble`/`temperature`/
//! `build()` usage), generalized from a single hardcoded Ollama model to the
//! three [`LLMProvider`](super::LLMProvider) variants the spec recognizes.

use super::client::{GenerateParams, LLMClient, Message, ResponseFormat, Role};
use super::retry::with_backoff;
use super::LLMProvider;
use crate::error::EngineError;
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::prelude::*;
use rig::providers::{gemini, ollama, openai};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Wraps one `rig-core` client per recognized provider family. Selecting a
/// backend is a `match` on the variant (spec §9 Design Notes), not a
/// trait-object hierarchy — see [`super::LLMProvider`]'s doc comment.
///
/// `pool` bounds in-flight prompts (spec §5: "pool exhaustion on the LLM
/// client's connection pool surfaces UpstreamBusy after the call's
/// timeout"); each call acquires a permit before prompting and holds it for
/// the duration of the request, with the acquire+prompt pair raced against
/// the call's timeout rather than failing fast on a full pool.
pub struct RigLLMClient {
    provider: LLMProvider,
    retry_max: u32,
    retry_base_ms: u64,
    retry_cap_ms: u64,
    pool: Arc<Semaphore>,
}

impl RigLLMClient {
    pub fn new(provider: LLMProvider, retry_max: u32, retry_base_ms: u64, retry_cap_ms: u64) -> Self {
        Self::with_concurrency(provider, retry_max, retry_base_ms, retry_cap_ms, 4)
    }

    pub fn with_concurrency(
        provider: LLMProvider,
        retry_max: u32,
        retry_base_ms: u64,
        retry_cap_ms: u64,
        max_concurrency: usize,
    ) -> Self {
        Self {
            provider,
            retry_max,
            retry_base_ms,
            retry_cap_ms,
            pool: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Acquire a pool permit and prompt, racing the pair against
    /// `timeout_ms`. A timeout — whether spent waiting for a permit or
    /// waiting on the provider — surfaces as `UpstreamBusy`.
    async fn prompt_bounded(
        &self,
        preamble: &str,
        user_text: &str,
        model: &str,
        params: &GenerateParams,
        timeout_ms: u64,
    ) -> Result<String, EngineError> {
        let pool = self.pool.clone();
        let attempt = async move {
            let _permit = pool.acquire().await.expect("semaphore never closed");
            self.prompt_once(preamble, user_text, model, params).await
        };
        match tokio::time::timeout(Duration::from_millis(timeout_ms), attempt).await {
            Ok(result) => result,
            Err(_elapsed) => Err(EngineError::UpstreamBusy),
        }
    }

    async fn prompt_once(
        &self,
        preamble: &str,
        user_text: &str,
        model: &str,
        params: &GenerateParams,
    ) -> Result<String, EngineError> {
        let preamble = with_response_format(preamble, params.response_format);
        let preamble = preamble.as_str();
        match self.provider {
            LLMProvider::HostedA => {
                let client = openai::Client::from_env();
                let agent = client
                    .agent(model)
                    .preamble(preamble)
                    .temperature(params.temperature as f64)
                    .build();
                agent
                    .prompt(user_text)
                    .await
                    .map_err(classify_prompt_error)
            }
            LLMProvider::HostedB => {
                let client = gemini::Client::from_env();
                let agent = client
                    .agent(model)
                    .preamble(preamble)
                    .temperature(params.temperature as f64)
                    .build();
                agent
                    .prompt(user_text)
                    .await
                    .map_err(classify_prompt_error)
            }
            LLMProvider::Local => {
                let client = ollama::Client::new();
                let agent = client
                    .agent(model)
                    .preamble(preamble)
                    .temperature(params.temperature as f64)
                    .build();
                agent
                    .prompt(user_text)
                    .await
                    .map_err(classify_prompt_error)
            }
        }
    }
}

/// Append the `response_format` instruction to the preamble (spec.md:81's
/// `response_format: "text"|"json"` generation parameter). `Text` leaves the
/// preamble untouched; `Json` is the first-class switch `generate_structured`
/// sets, on top of whichever schema-specific instruction the caller already
/// embedded.
fn with_response_format(preamble: &str, format: ResponseFormat) -> String {
    match format {
        ResponseFormat::Text => preamble.to_string(),
        ResponseFormat::Json => format!("{preamble}\n\nRespond with valid JSON only, no prose or markdown fences."),
    }
}

fn split_preamble(messages: &[Message]) -> (String, String) {
    let preamble = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let user_text = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    (preamble, user_text)
}

fn classify_prompt_error(err: rig::completion::PromptError) -> EngineError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("401") || lower.contains("unauthorized") || lower.contains("api key") {
        EngineError::UpstreamAuth
    } else if lower.contains("429") || lower.contains("quota") || lower.contains("rate limit") {
        EngineError::UpstreamQuota
    } else if lower.contains("timeout") || lower.contains("connection") {
        EngineError::UpstreamUnavailable(message)
    } else if lower.contains("content") && lower.contains("polic") {
        EngineError::ContentRefused(message)
    } else {
        EngineError::UpstreamBusy
    }
}

#[async_trait]
impl LLMClient for RigLLMClient {
    async fn generate(
        &self,
        messages: &[Message],
        model: &str,
        params: &GenerateParams,
    ) -> Result<String, EngineError> {
        let (preamble, user_text) = split_preamble(messages);
        with_backoff(self.retry_max, self.retry_base_ms, self.retry_cap_ms, |_n| {
            self.prompt_bounded(&preamble, &user_text, model, params, params.timeout_ms)
        })
        .await
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        model: &str,
        schema: &Value,
        params: &GenerateParams,
    ) -> Result<Value, EngineError> {
        let (preamble, user_text) = split_preamble(messages);
        let params = GenerateParams {
            response_format: ResponseFormat::Json,
            ..params.clone()
        };
        let mut attempts = 0u32;
        let mut feedback = String::new();
        loop {
            attempts += 1;
            let instructed_preamble = format!(
                "{preamble}\n\nRespond with a single JSON object matching this schema and nothing else:\n{schema}{feedback}"
            );
            let raw = with_backoff(self.retry_max, self.retry_base_ms, self.retry_cap_ms, |_n| {
                self.prompt_bounded(
                    &instructed_preamble,
                    &user_text,
                    model,
                    &params,
                    GenerateParams::structured_timeout_ms(),
                )
            })
            .await?;

            match parse_and_validate(&raw, schema) {
                Ok(value) => return Ok(value),
                Err(validation_error) if attempts < self.retry_max => {
                    feedback = format!(
                        "\n\nYour previous response was invalid: {validation_error}. Try again, responding with JSON only."
                    );
                }
                Err(_) => return Err(EngineError::SchemaViolation { attempts }),
            }
        }
    }
}

/// Parse `raw` as JSON and perform a lightweight structural check against
/// `schema`'s `required` array and top-level `properties` types — not a
/// full JSON Schema validator, just enough to catch the malformed-output
/// case the spec's retry-with-feedback loop exists for.
fn parse_and_validate(raw: &str, schema: &Value) -> Result<Value, String> {
    let trimmed = extract_json_block(raw);
    let value: Value = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;

    let Some(object) = value.as_object() else {
        return Err("expected a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required {
            let Some(key) = key.as_str() else { continue };
            if !object.contains_key(key) {
                return Err(format!("missing required field '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop_schema) in properties {
            let Some(actual) = object.get(key) else {
                continue;
            };
            if let Some(expected_type) = prop_schema.get("type").and_then(Value::as_str) {
                if !type_matches(actual, expected_type) {
                    return Err(format!("field '{key}' does not match type '{expected_type}'"));
                }
            }
        }
    }

    Ok(value)
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Some models wrap JSON in a markdown code fence despite instructions;
/// strip it rather than failing the parse.
fn extract_json_block(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(stripped) = trimmed.strip_prefix("```json") {
        stripped.trim().trim_end_matches("```").trim()
    } else if let Some(stripped) = trimmed.strip_prefix("```") {
        stripped.trim().trim_end_matches("```").trim()
    } else {
        trimmed
    }
}
