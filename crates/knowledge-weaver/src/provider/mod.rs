//! Embedding and analysis backends.
//!
//! Concrete implementations of the core
//! [`EmbeddingProvider`] / [`AnalysisProvider`] traits:
//! - **[`DisabledProvider`]** fails every call; used when no backend is configured.
//! - **[`OpenAIProvider`]** calls an OpenAI-compatible `/embeddings` and
//!   `/chat/completions` API.
//! - **[`OllamaProvider`]** calls a local Ollama instance's `/api/embed` and
//!   `/api/chat` endpoints.
//!
//! Providers make exactly one HTTP request per call. Retries, backoff, and
//! timeouts are applied around them by [`crate::retry`].
//!
//! # Error classification
//!
//! - HTTP 429 and 5xx → transient
//! - Other HTTP 4xx → permanent
//! - Network/connection errors → transient
//! - Unparseable responses → permanent

mod ollama;
mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use knowledge_weaver_core::embedding::{AnalysisProvider, EmbeddingProvider};
use knowledge_weaver_core::models::{canonical_tags, Classification, CorrectionEvent, TagsInput};
use knowledge_weaver_core::{Result, WeaverError};

use crate::config::ProviderConfig;

/// The two capabilities of one configured backend.
#[derive(Clone)]
pub struct Backend {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub analyzer: Arc<dyn AnalysisProvider>,
}

impl Backend {
    pub fn new<P>(provider: P) -> Self
    where
        P: EmbeddingProvider + AnalysisProvider + 'static,
    {
        let shared = Arc::new(provider);
        Self {
            embedder: shared.clone(),
            analyzer: shared,
        }
    }
}

/// A provider that fails every call.
///
/// Used when `provider.kind = "disabled"`. The engine still starts, lists,
/// restores, and reports metrics; anything needing a vector or a
/// classification fails with a permanent provider error.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(WeaverError::permanent("provider is disabled"))
    }
}

#[async_trait]
impl AnalysisProvider for DisabledProvider {
    async fn analyze(&self, _text: &str, _few_shot: &[CorrectionEvent]) -> Result<Classification> {
        Err(WeaverError::permanent("provider is disabled"))
    }
}

/// Create the backend selected by configuration.
///
/// | `kind` | Provider |
/// |--------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &ProviderConfig) -> anyhow::Result<Backend> {
    match config.kind.as_str() {
        "disabled" => Ok(Backend::new(DisabledProvider)),
        "openai" => Ok(Backend::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Backend::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown provider kind: {}", other),
    }
}

const SYSTEM_PROMPT: &str = "You organize workplace knowledge. Given a piece of text, \
reply with a single JSON object with the keys \"category\" (a short noun phrase), \
\"tags\" (a list of short lowercase keywords), and \"summary\" (one sentence). \
Reply with JSON only.";

/// Chat messages for an analysis request: instructions, then each prior
/// correction as a worked example, then the text itself.
pub(crate) fn analysis_messages(text: &str, few_shot: &[CorrectionEvent]) -> Vec<serde_json::Value> {
    let mut messages = vec![json!({ "role": "system", "content": SYSTEM_PROMPT })];
    for example in few_shot {
        let answer = &example.human_correction;
        messages.push(json!({ "role": "user", "content": example.source_text }));
        messages.push(json!({
            "role": "assistant",
            "content": json!({
                "category": answer.category,
                "tags": answer.tags,
                "summary": answer.summary,
            })
            .to_string(),
        }));
    }
    messages.push(json!({ "role": "user", "content": text }));
    messages
}

#[derive(Deserialize)]
struct RawClassification {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Option<TagsInput>,
    #[serde(default)]
    summary: Option<String>,
}

/// Parse a model reply into a [`Classification`].
///
/// Tolerates Markdown code fences and prose around the JSON object, and tags
/// given either as a list or a comma-separated string. A reply without a
/// category is rejected.
pub fn parse_classification(reply: &str) -> Result<Classification> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if e > s => &reply[s..=e],
        _ => {
            return Err(WeaverError::permanent(format!(
                "analysis reply contains no JSON object: {}",
                truncate(reply, 120)
            )))
        }
    };

    let raw: RawClassification = serde_json::from_str(body).map_err(|e| {
        WeaverError::permanent(format!("analysis reply is not valid JSON: {}", e))
    })?;

    let category = raw.category.unwrap_or_default().trim().to_string();
    if category.is_empty() {
        return Err(WeaverError::permanent("analysis reply has no category"));
    }

    Ok(Classification {
        category,
        tags: canonical_tags(raw.tags.unwrap_or_default()),
        summary: raw.summary.unwrap_or_default().trim().to_string(),
    })
}

/// Map a non-success HTTP status to a provider error.
pub(crate) fn status_error(backend: &str, status: reqwest::StatusCode, body: &str) -> WeaverError {
    let message = format!("{} API error {}: {}", backend, status, truncate(body, 200));
    if status.as_u16() == 429 || status.is_server_error() {
        WeaverError::transient(message)
    } else {
        WeaverError::permanent(message)
    }
}

pub(crate) fn read_vector(values: &serde_json::Value, backend: &str) -> Result<Vec<f32>> {
    let array = values.as_array().ok_or_else(|| {
        WeaverError::permanent(format!("Invalid {} response: embedding is not an array", backend))
    })?;
    Ok(array
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_parse_fenced_reply_with_csv_tags() {
        let reply = "```json\n{\"category\": \"Benefits\", \"tags\": \"pto, leave\", \"summary\": \" PTO accrual \"}\n```";
        let c = parse_classification(reply).unwrap();
        assert_eq!(c.category, "Benefits");
        assert_eq!(c.tags.len(), 2);
        assert!(c.tags.contains("leave"));
        assert_eq!(c.summary, "PTO accrual");
    }

    #[test]
    fn test_parse_rejects_missing_category_as_permanent() {
        let err = parse_classification(r#"{"tags": ["x"]}"#).unwrap_err();
        assert!(!err.is_transient());
        assert!(parse_classification("I could not decide").is_err());
    }

    #[test]
    fn test_status_classification() {
        let too_many = status_error("OpenAI", reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        let bad_gateway = status_error("OpenAI", reqwest::StatusCode::BAD_GATEWAY, "");
        let unauthorized = status_error("OpenAI", reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(too_many.is_transient());
        assert!(bad_gateway.is_transient());
        assert!(!unauthorized.is_transient());
    }

    #[test]
    fn test_few_shot_examples_become_turns() {
        let example = CorrectionEvent {
            id: "c1".into(),
            entry_id: None,
            ai_prediction: Classification::new("General", Vec::<String>::new(), ""),
            human_correction: Classification::new("Culture", ["food"], "Lunch on Fridays"),
            source_text: "pizza on friday".into(),
            timestamp: Utc::now(),
        };
        let messages = analysis_messages("tacos on friday", &[example]);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["content"], "pizza on friday");
        assert!(messages[2]["content"].as_str().unwrap().contains("Culture"));
        assert_eq!(messages[3]["content"], "tacos on friday");
    }

    #[tokio::test]
    async fn test_disabled_provider_fails_permanently() {
        let err = DisabledProvider.embed("x").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
