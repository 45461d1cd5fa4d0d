//! Configuration parsing and validation.
//!
//! Knowledge Weaver is configured from a TOML file (default
//! `config/weaver.toml`). Every section except `[db]` and `[server]` is
//! optional and falls back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/weaver.sqlite"
//!
//! [provider]
//! kind = "ollama"
//! embedding_model = "nomic-embed-text"
//! chat_model = "llama3.1"
//! dims = 768
//!
//! [retrieval]
//! relevance_threshold = 0.7
//! gap_threshold = 0.5
//! top_k = 3
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// External model backend used for both embedding and analysis.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    /// Base URL; defaults depend on `kind`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Environment variable holding the API key (OpenAI-compatible only).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            url: None,
            embedding_model: None,
            chat_model: None,
            dims: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.kind != "disabled"
    }
}

fn default_provider_kind() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Shared retry policy for every provider call.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_analyze_timeout_secs")]
    pub analyze_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            embed_timeout_secs: default_embed_timeout_secs(),
            analyze_timeout_secs: default_analyze_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn analyze_timeout(&self) -> Duration {
        Duration::from_secs(self.analyze_timeout_secs)
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_analyze_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum score for a hit to be returned from a query.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    /// Top scores below this mark a query as a knowledge gap.
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: default_relevance_threshold(),
            gap_threshold: default_gap_threshold(),
            top_k: default_top_k(),
        }
    }
}

fn default_relevance_threshold() -> f32 {
    0.7
}
fn default_gap_threshold() -> f32 {
    0.5
}
fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LearningConfig {
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_examples: default_max_examples(),
            similarity_floor: default_similarity_floor(),
        }
    }
}

fn default_max_examples() -> usize {
    3
}
fn default_similarity_floor() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Scrub emails, phone numbers, and ID numbers from chat messages
    /// before they reach the provider.
    #[serde(default = "default_anonymize")]
    pub anonymize: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            anonymize: default_anonymize(),
        }
    }
}

fn default_max_batch() -> usize {
    100
}
fn default_anonymize() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// A configuration with defaults everywhere, for embedding and tests.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            provider: ProviderConfig::default(),
            retry: RetryConfig::default(),
            retrieval: RetrievalConfig::default(),
            learning: LearningConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:8000".to_string(),
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Retrieval
    for (name, value) in [
        ("retrieval.relevance_threshold", config.retrieval.relevance_threshold),
        ("retrieval.gap_threshold", config.retrieval.gap_threshold),
        ("learning.similarity_floor", config.learning.similarity_floor),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("{} must be in [0.0, 1.0]", name);
        }
    }
    if config.retrieval.gap_threshold > config.retrieval.relevance_threshold {
        bail!("retrieval.gap_threshold must be <= retrieval.relevance_threshold");
    }
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Ingest
    if config.ingest.max_batch == 0 {
        bail!("ingest.max_batch must be > 0");
    }

    // Retry
    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.embed_timeout_secs == 0 || config.retry.analyze_timeout_secs == 0 {
        bail!("retry timeouts must be > 0");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }

    // Provider
    match config.provider.kind.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown provider kind: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.provider.is_enabled() {
        if config.provider.dims.is_none() || config.provider.dims == Some(0) {
            bail!(
                "provider.dims must be > 0 when kind is '{}'",
                config.provider.kind
            );
        }
        if config.provider.embedding_model.is_none() {
            bail!(
                "provider.embedding_model must be specified when kind is '{}'",
                config.provider.kind
            );
        }
        if config.provider.chat_model.is_none() {
            bail!(
                "provider.chat_model must be specified when kind is '{}'",
                config.provider.kind
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let file = write_config(
            r#"
[db]
path = "./data/weaver.sqlite"

[server]
bind = "127.0.0.1:8000"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert!((config.retrieval.relevance_threshold - 0.7).abs() < f32::EPSILON);
        assert!((config.retrieval.gap_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.learning.max_examples, 3);
        assert_eq!(config.ingest.max_batch, 100);
        assert_eq!(config.retry.analyze_timeout_secs, 60);
        assert_eq!(config.retry.embed_timeout_secs, 30);
        assert!(!config.provider.is_enabled());
    }

    #[test]
    fn test_enabled_provider_requires_models_and_dims() {
        let file = write_config(
            r#"
[db]
path = "./data/weaver.sqlite"

[provider]
kind = "ollama"
embedding_model = "nomic-embed-text"

[server]
bind = "127.0.0.1:8000"
"#,
        );
        let err = load_config(file.path()).unwrap_err().to_string();
        assert!(err.contains("provider.dims"), "{}", err);
    }

    #[test]
    fn test_rejects_unknown_provider_and_bad_threshold() {
        let mut config = Config::with_db_path("x.sqlite");
        config.provider.kind = "palm".into();
        assert!(validate(&config).is_err());

        let mut config = Config::with_db_path("x.sqlite");
        config.retrieval.relevance_threshold = 1.5;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("relevance_threshold"));
    }

    #[test]
    fn test_gap_threshold_cannot_exceed_relevance_threshold() {
        let mut config = Config::with_db_path("x.sqlite");
        config.retrieval.relevance_threshold = 0.4;
        config.retrieval.gap_threshold = 0.6;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("gap_threshold"), "{}", err);

        config.retrieval.gap_threshold = 0.4;
        assert!(validate(&config).is_ok());
    }
}
