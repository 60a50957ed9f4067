//! External-model capability traits and deterministic mocks.
//!
//! The pipeline never talks to a model API directly: it consumes the
//! [`Embedder`] and [`Generator`] capabilities, each of which the call
//! ledger wraps for timing and accounting. Concrete HTTP-backed
//! implementations live in the application crate; the mocks here back
//! the test suites with fully deterministic behavior.
//!
//! Providers make exactly one attempt per call — retries, if desired,
//! are a caller-level policy.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::TokenUsage;

/// One embedding result: the vector plus the provider-reported token count.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tokens: Option<i64>,
}

/// One generation result: the text plus the provider-reported usage.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Capability that turns text into a fixed-dimensionality vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a single text. One attempt; errors on quota/network failure.
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Capability that produces an answer text from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;
    /// Generate a completion. One attempt; errors on quota/network failure.
    async fn generate(&self, prompt: &str) -> Result<Generation>;
}

// ============ Mock Embedder ============

/// Deterministic embedder for tests.
///
/// By default every text maps to a unit vector derived from the SHA-256
/// of its bytes, so identical texts always embed identically. Individual
/// texts can be pinned to explicit vectors to control similarity scores
/// in retrieval tests.
pub struct MockEmbedder {
    dims: usize,
    pinned: HashMap<String, Vec<f32>>,
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            pinned: HashMap::new(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Pin an exact vector for a specific input text.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.pinned.insert(text.into(), vector);
        self
    }

    /// Make every call fail, for provider-outage paths.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Texts embedded so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn derive_vector(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut v: Vec<f32> = (0..self.dims)
            .map(|i| {
                let b = digest[i % digest.len()] as f32;
                (b - 128.0) / 128.0 + (i as f32 * 1e-3)
            })
            .collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.fail {
            bail!("mock embedder failure");
        }
        let vector = self
            .pinned
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.derive_vector(text));
        Ok(Embedding {
            vector,
            tokens: Some(crate::fragment::estimate_tokens(text) as i64),
        })
    }
}

// ============ Mock Generator ============

/// Deterministic generator for tests: returns a fixed response and
/// counts invocations.
pub struct MockGenerator {
    response: String,
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Prompts received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn model_name(&self) -> &str {
        "mock-generator"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        self.calls.lock().unwrap().push(prompt.to_string());
        if self.fail {
            bail!("mock generator failure");
        }
        Ok(Generation {
            text: self.response.clone(),
            usage: TokenUsage {
                prompt: Some(crate::fragment::estimate_tokens(prompt) as i64),
                completion: Some(crate::fragment::estimate_tokens(&self.response) as i64),
                total: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let e = MockEmbedder::new(64);
        let a = e.embed("same text").await.unwrap();
        let b = e.embed("same text").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.vector.len(), 64);
        assert_eq!(e.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_embedder_pinned_vector() {
        let e = MockEmbedder::new(2).with_vector("query", vec![1.0, 0.0]);
        let emb = e.embed("query").await.unwrap();
        assert!((cosine_similarity(&emb.vector, &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failing_mocks_error() {
        let e = MockEmbedder::new(4).failing();
        assert!(e.embed("x").await.is_err());
        let g = MockGenerator::new("ok").failing();
        assert!(g.generate("x").await.is_err());
        assert_eq!(g.call_count(), 1);
    }
}
