//! OpenAI-compatible backend.

use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;

use knowledge_weaver_core::embedding::{AnalysisProvider, EmbeddingProvider};
use knowledge_weaver_core::models::{Classification, CorrectionEvent};
use knowledge_weaver_core::{Result, WeaverError};

use super::{analysis_messages, parse_classification, read_vector, status_error};
use crate::config::ProviderConfig;

const DEFAULT_URL: &str = "https://api.openai.com/v1";

/// Calls `POST {url}/embeddings` and `POST {url}/chat/completions`.
///
/// The API key is read once at construction from the environment variable
/// named by `provider.api_key_env` (default `OPENAI_API_KEY`).
pub struct OpenAIProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    embedding_model: String,
    chat_model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let embedding_model = config
            .embedding_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("provider.embedding_model required for OpenAI"))?;
        let chat_model = config
            .chat_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("provider.chat_model required for OpenAI"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("provider.dims required for OpenAI"))?;

        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            embedding_model,
            chat_model,
            dims,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}{}", self.url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| WeaverError::transient(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI", status, &text));
        }

        response
            .json()
            .await
            .map_err(|e| WeaverError::permanent(format!("Invalid OpenAI response: {}", e)))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({ "model": self.embedding_model, "input": [text] });
        let json = self.post("/embeddings", &body).await?;
        let embedding = json
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|item| item.get("embedding"))
            .ok_or_else(|| {
                WeaverError::permanent("Invalid OpenAI response: missing data[0].embedding")
            })?;
        read_vector(embedding, "OpenAI")
    }
}

#[async_trait]
impl AnalysisProvider for OpenAIProvider {
    async fn analyze(&self, text: &str, few_shot: &[CorrectionEvent]) -> Result<Classification> {
        let body = json!({
            "model": self.chat_model,
            "messages": analysis_messages(text, few_shot),
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
        });
        let json = self.post("/chat/completions", &body).await?;
        let reply = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                WeaverError::permanent("Invalid OpenAI response: missing choices[0].message.content")
            })?;
        parse_classification(reply)
    }
}
