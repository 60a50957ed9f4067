//! Application configuration loaded from a TOML file.
//!
//! Every tunable the pipeline consumes lives here: database path,
//! fragmenting sizes, retrieval threshold and limit, the context token
//! budget, quota limits, and the model provider settings. Values are
//! validated once at load time so the rest of the application can treat
//! them as trusted.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub fragmenting: FragmentingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FragmentingConfig {
    #[serde(default = "default_fragment_tokens")]
    pub fragment_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for FragmentingConfig {
    fn default() -> Self {
        Self {
            fragment_tokens: default_fragment_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_fragment_tokens() -> usize {
    300
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a fragment to be considered relevant.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Default fragments per retrieval when the user has no override.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            search_limit: default_search_limit(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.75
}
fn default_search_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Maximum assembled context size, in estimated tokens.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
        }
    }
}

fn default_token_budget() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    /// Lifetime free questions per user.
    #[serde(default = "default_free_limit")]
    pub free_limit: i64,
    /// Length of a granted subscription window, in days.
    #[serde(default = "default_subscription_days")]
    pub subscription_days: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_limit: default_free_limit(),
            subscription_days: default_subscription_days(),
        }
    }
}

fn default_free_limit() -> i64 {
    10
}
fn default_subscription_days() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// API base URL; any OpenAI-compatible endpoint works.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.2
}
fn default_api_base() -> String {
    "https://api.openai.com".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate fragmenting
    if config.fragmenting.fragment_tokens == 0 {
        anyhow::bail!("fragmenting.fragment_tokens must be > 0");
    }
    if config.fragmenting.overlap_tokens >= config.fragmenting.fragment_tokens {
        anyhow::bail!("fragmenting.overlap_tokens must be < fragmenting.fragment_tokens");
    }

    // Validate retrieval
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.search_limit < 1 {
        anyhow::bail!("retrieval.search_limit must be >= 1");
    }

    // Validate context
    if config.context.token_budget == 0 {
        anyhow::bail!("context.token_budget must be > 0");
    }

    // Validate quota
    if config.quota.free_limit < 0 {
        anyhow::bail!("quota.free_limit must be >= 0");
    }
    if config.quota.subscription_days < 1 {
        anyhow::bail!("quota.subscription_days must be >= 1");
    }

    // Validate providers
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }
    if config.generation.model.is_empty() {
        anyhow::bail!("generation.model must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
[db]
path = "/tmp/askbase.db"

[embedding]
model = "text-embedding-3-small"
dims = 1536

[generation]
model = "gpt-4o-mini"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let f = write_config(MINIMAL);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.fragmenting.fragment_tokens, 300);
        assert_eq!(cfg.retrieval.similarity_threshold, 0.75);
        assert_eq!(cfg.context.token_budget, 2000);
        assert_eq!(cfg.quota.free_limit, 10);
        assert_eq!(cfg.quota.subscription_days, 30);
        assert_eq!(cfg.generation.temperature, 0.2);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let body = format!("{}\n[retrieval]\nsimilarity_threshold = 1.5\n", MINIMAL);
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_fragment() {
        let body = format!(
            "{}\n[fragmenting]\nfragment_tokens = 50\noverlap_tokens = 50\n",
            MINIMAL
        );
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }
}
