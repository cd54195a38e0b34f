//! Generator abstraction and implementations.
//!
//! Defines the [`Generator`] trait and concrete implementations:
//! - **[`DisabledGenerator`]** — returns errors; used when no provider is
//!   configured. Cache misses then quarantine forever instead of serving
//!   anything made up.
//! - **[`OpenRouterGenerator`]** — calls an OpenRouter-compatible chat
//!   completions endpoint with retry and backoff, asking for a strict JSON
//!   payload.
//!
//! The core treats any non-success from this boundary as a failing QA
//! verdict that consumes one regeneration attempt; no error from here ever
//! reaches a client.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use crate::models::ChunkType;
use crate::vehicle::humanize;

/// What the cache controller asks the generator to produce.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub content_id: String,
    pub chunk_type: ChunkType,
    /// Component half of the content id, already humanized for prompts.
    pub component: String,
}

impl ContentRequest {
    pub fn new(content_id: &str, chunk_type: ChunkType, component: &str) -> Self {
        Self {
            content_id: content_id.to_string(),
            chunk_type,
            component: humanize(component),
        }
    }
}

/// Candidate content plus provenance, as produced by a generator.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResult {
    pub title: String,
    pub content_text: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub sources: Vec<String>,
    /// Source confidence in [0, 1].
    pub source_confidence: f64,
}

/// External content generator.
///
/// Implementations may block for hundreds of milliseconds to seconds; the
/// pipeline wraps every call in a timeout and converts overruns into
/// [`GenerationError::Timeout`].
#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider name, for logs and run notes.
    fn name(&self) -> &str;

    /// Produce candidate content for one chunk. `repair_hint`, when present,
    /// carries the QA engine's guidance from the previous failed attempt.
    async fn generate(
        &self,
        vehicle_key: &str,
        request: &ContentRequest,
        repair_hint: Option<&str>,
    ) -> Result<GenerationResult, GenerationError>;
}

/// Instantiate the generator named by the configuration.
pub fn create_generator(config: &GeneratorConfig) -> anyhow::Result<std::sync::Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(std::sync::Arc::new(DisabledGenerator)),
        "openrouter" => Ok(std::sync::Arc::new(OpenRouterGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generator provider: '{}'", other),
    }
}

// ============ Disabled Generator ============

/// A no-op generator that always returns errors.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _vehicle_key: &str,
        _request: &ContentRequest,
        _repair_hint: Option<&str>,
    ) -> Result<GenerationResult, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ OpenRouter Generator ============

/// Content generator backed by an OpenRouter-compatible chat API.
///
/// Requires the `OPENROUTER_API_KEY` environment variable. The model is
/// instructed to answer with a single JSON object matching
/// [`GenerationResult`]; anything else is a provider failure.
pub struct OpenRouterGenerator {
    model: String,
    base_url: String,
    max_retries: u32,
    request_timeout: Duration,
}

impl OpenRouterGenerator {
    pub fn new(config: &GeneratorConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generator.model required for OpenRouter provider"))?;

        if std::env::var("OPENROUTER_API_KEY").is_err() {
            anyhow::bail!("OPENROUTER_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            base_url: config.base_url.clone(),
            max_retries: config.max_retries,
            request_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn build_prompt(
        &self,
        vehicle_key: &str,
        request: &ContentRequest,
        repair_hint: Option<&str>,
    ) -> serde_json::Value {
        let mut instructions = vec![
            "Produce factual service data for exactly this vehicle and component.".to_string(),
            "Cite every source as a URL or publication string in 'sources'.".to_string(),
            "Report 'source_confidence' in [0,1] honestly; do not inflate it.".to_string(),
            "Answer with one JSON object: {title, content_text, data, sources, source_confidence}."
                .to_string(),
        ];
        if let Some(hint) = repair_hint {
            instructions.push(format!("A previous attempt was rejected: {}", hint));
        }
        json!({
            "task": "CHUNK_GENERATION",
            "vehicle": vehicle_key,
            "content_id": request.content_id,
            "chunk_type": request.chunk_type.as_str(),
            "component": request.component,
            "instructions": instructions,
        })
    }
}

#[async_trait]
impl Generator for OpenRouterGenerator {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(
        &self,
        vehicle_key: &str,
        request: &ContentRequest,
        repair_hint: Option<&str>,
    ) -> Result<GenerationResult, GenerationError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| GenerationError::Provider("OPENROUTER_API_KEY not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are an automotive service-data generator. Output JSON only."
                },
                {
                    "role": "user",
                    "content": self.build_prompt(vehicle_key, request, repair_hint).to_string()
                }
            ],
            "response_format": {"type": "json_object"}
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt: u32 = 0;

        loop {
            let response = client
                .post(&url)
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let payload: serde_json::Value = resp
                            .json()
                            .await
                            .map_err(|e| GenerationError::Provider(e.to_string()))?;
                        return parse_completion(&payload);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(GenerationError::Provider(format!(
                            "HTTP {}: {}",
                            status, text
                        )));
                    }
                    if attempt >= self.max_retries {
                        return Err(GenerationError::Provider(format!(
                            "HTTP {} after {} retries",
                            status, attempt
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(GenerationError::Provider(format!(
                            "network error after {} retries: {}",
                            attempt, e
                        )));
                    }
                }
            }

            let backoff = Duration::from_secs(1 << attempt.min(5));
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

/// Pull the JSON content out of a chat-completion envelope and decode it.
fn parse_completion(payload: &serde_json::Value) -> Result<GenerationResult, GenerationError> {
    let content = payload["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| GenerationError::Provider("empty completion".into()))?;

    let result: GenerationResult = serde_json::from_str(content)
        .map_err(|e| GenerationError::Provider(format!("unparseable completion: {}", e)))?;

    if !(0.0..=1.0).contains(&result.source_confidence) {
        return Err(GenerationError::Provider(format!(
            "source_confidence out of range: {}",
            result.source_confidence
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_parsing_enforces_confidence_range() {
        let good = json!({
            "choices": [{"message": {"content": serde_json::to_string(&json!({
                "title": "Front Caliper Torque",
                "content_text": "Caliper bracket bolts: 80 ft-lb.",
                "data": {"spec_items": [{"name": "bracket bolt", "ft_lb": 80.0}]},
                "sources": ["https://example.org/fsm"],
                "source_confidence": 0.9
            })).unwrap()}}]
        });
        assert!(parse_completion(&good).is_ok());

        let inflated = json!({
            "choices": [{"message": {"content": serde_json::to_string(&json!({
                "title": "t", "content_text": "c", "data": {},
                "sources": [], "source_confidence": 1.7
            })).unwrap()}}]
        });
        assert!(parse_completion(&inflated).is_err());
    }

    #[test]
    fn completion_parsing_rejects_non_json_content() {
        let garbage = json!({
            "choices": [{"message": {"content": "Sure! Here's the torque spec..."}}]
        });
        assert!(matches!(
            parse_completion(&garbage),
            Err(GenerationError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn disabled_generator_always_errors() {
        let gen = DisabledGenerator;
        let req = ContentRequest::new("torque_spec:front_caliper", ChunkType::TorqueSpec, "front_caliper");
        let err = gen
            .generate("2019_honda_accord_2.0t", &req, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Disabled));
    }
}
