//! OpenAI-compatible model providers.
//!
//! Implements the core [`Embedder`] and [`Generator`] capabilities over
//! the `POST /v1/embeddings` and `POST /v1/chat/completions` endpoints.
//! Any OpenAI-compatible server works; the base URL comes from config.
//! Requires the `OPENAI_API_KEY` environment variable to be set.
//!
//! Each call is a single attempt with a configured timeout. The call
//! ledger records every attempt, so a retry here would double-count
//! latency and cost; retry is left to the caller when it is wanted at
//! all.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use askbase_core::models::TokenUsage;
use askbase_core::provider::{Embedder, Embedding, Generation, Generator};

use crate::config::{EmbeddingConfig, GenerationConfig};

fn api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))
}

/// Embedding provider over `POST /v1/embeddings`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_base: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        // Fail at startup, not on the first question.
        api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.api_base))
            .header("Authorization", format!("Bearer {}", api_key()?))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("embeddings API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_embedding_response(&json)
    }
}

/// Parse the embeddings API response JSON.
///
/// Extracts `data[0].embedding` and the prompt token count from `usage`.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Embedding> {
    let vector: Vec<f32> = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("invalid embeddings response: missing data[0].embedding"))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();

    if vector.is_empty() {
        bail!("invalid embeddings response: empty vector");
    }

    let tokens = json
        .get("usage")
        .and_then(|u| u.get("prompt_tokens").or_else(|| u.get("total_tokens")))
        .and_then(|t| t.as_i64());

    Ok(Embedding { vector, tokens })
}

/// Generation provider over `POST /v1/chat/completions`.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_base: String,
    model: String,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "user", "content": prompt}
            ],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", api_key()?))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("chat completions API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_generation_response(&json)
    }
}

/// Parse the chat completions API response JSON.
///
/// Extracts `choices[0].message.content` and the token counts from
/// `usage`.
fn parse_generation_response(json: &serde_json::Value) -> Result<Generation> {
    let text = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow!("invalid completions response: missing message content"))?
        .to_string();

    let usage = json.get("usage").map_or(TokenUsage::default(), |u| TokenUsage {
        prompt: u.get("prompt_tokens").and_then(|t| t.as_i64()),
        completion: u.get("completion_tokens").and_then(|t| t.as_i64()),
        total: u.get("total_tokens").and_then(|t| t.as_i64()),
    });

    Ok(Generation { text, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.1, -0.2, 0.3]}],
            "usage": {"prompt_tokens": 7, "total_tokens": 7}
        });
        let embedding = parse_embedding_response(&json).unwrap();
        assert_eq!(embedding.vector.len(), 3);
        assert_eq!(embedding.tokens, Some(7));
    }

    #[test]
    fn test_parse_embedding_response_missing_data() {
        let json = serde_json::json!({"error": {"message": "bad request"}});
        assert!(parse_embedding_response(&json).is_err());
    }

    #[test]
    fn test_parse_generation_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "An answer."}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8, "total_tokens": 128}
        });
        let generation = parse_generation_response(&json).unwrap();
        assert_eq!(generation.text, "An answer.");
        assert_eq!(generation.usage.prompt, Some(120));
        assert_eq!(generation.usage.completion, Some(8));
    }

    #[test]
    fn test_parse_generation_response_without_usage() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "ok"}}]
        });
        let generation = parse_generation_response(&json).unwrap();
        assert_eq!(generation.usage.total, None);
    }
}
