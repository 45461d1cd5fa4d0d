//! Local Ollama backend.

use async_trait::async_trait;
use serde_json::json;

use knowledge_weaver_core::embedding::{AnalysisProvider, EmbeddingProvider};
use knowledge_weaver_core::models::{Classification, CorrectionEvent};
use knowledge_weaver_core::{Result, WeaverError};

use super::{analysis_messages, parse_classification, read_vector, status_error};
use crate::config::ProviderConfig;

const DEFAULT_URL: &str = "http://localhost:11434";

/// Calls `POST {url}/api/embed` and `POST {url}/api/chat` on a running
/// Ollama instance (e.g. after `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    embedding_model: String,
    chat_model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let embedding_model = config
            .embedding_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("provider.embedding_model required for Ollama"))?;
        let chat_model = config
            .chat_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("provider.chat_model required for Ollama"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("provider.dims required for Ollama"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            embedding_model,
            chat_model,
            dims,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{}", self.url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                WeaverError::transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", status, &text));
        }

        response
            .json()
            .await
            .map_err(|e| WeaverError::permanent(format!("Invalid Ollama response: {}", e)))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({ "model": self.embedding_model, "input": [text] });
        let json = self.post("/api/embed", &body).await?;
        let embedding = json
            .get("embeddings")
            .and_then(|e| e.get(0))
            .ok_or_else(|| {
                WeaverError::permanent("Invalid Ollama response: missing embeddings array")
            })?;
        read_vector(embedding, "Ollama")
    }
}

#[async_trait]
impl AnalysisProvider for OllamaProvider {
    async fn analyze(&self, text: &str, few_shot: &[CorrectionEvent]) -> Result<Classification> {
        let body = json!({
            "model": self.chat_model,
            "messages": analysis_messages(text, few_shot),
            "format": "json",
            "stream": false,
        });
        let json = self.post("/api/chat", &body).await?;
        let reply = json
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| WeaverError::permanent("Invalid Ollama response: missing message.content"))?;
        parse_classification(reply)
    }
}
