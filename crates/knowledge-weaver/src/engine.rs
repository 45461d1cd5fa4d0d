//! The assembled engine.
//!
//! [`Weaver`] wires storage, providers, and services together from a
//! [`Config`] and exposes every operation the HTTP server and CLI use.
//! Provider calls are wrapped in the shared retry policy here, once, so no
//! service retries on its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use knowledge_weaver_core::embedding::{AnalysisProvider, EmbeddingProvider};
use knowledge_weaver_core::models::{
    canonical_tags, ChatMessage, Classification, CorrectionEvent, EntryType, KnowledgeEntry,
    KnowledgeGap, QueryLogEntry, SourceMetadata, TagsInput,
};
use knowledge_weaver_core::store::{EventLog, IndexFilter, VectorIndex};
use knowledge_weaver_core::{Result, WeaverError};

use crate::config::Config;
use crate::gaps::GapTracker;
use crate::learning::{ContextBuilder, LearningStats};
use crate::metrics::{Dashboard, Metrics};
use crate::processor::{ChatLogProcessor, ProcessingResult};
use crate::provider::create_provider;
use crate::query::{QueryResult, QueryService};
use crate::repository::{EditOutcome, EntryPatch, KnowledgeRepository, NewEntry};
use crate::retry::{RetryPolicy, RetryingAnalyzer, RetryingEmbedder};
use crate::sqlite_store::{SqliteEventLog, SqliteIndex};
use crate::{db, migrate};

/// Storage and provider implementations the engine runs on.
pub struct Components {
    pub index: Arc<dyn VectorIndex>,
    pub log: Arc<dyn EventLog>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub analyzer: Arc<dyn AnalysisProvider>,
}

/// A manually captured snippet, or the answer to a knowledge gap.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    /// Page the snippet was captured from.
    #[serde(default)]
    pub url: Option<String>,
    /// Reference to a redacted screenshot.
    #[serde(default, alias = "screenshot")]
    pub attachment: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Option<TagsInput>,
    #[serde(default)]
    pub summary: Option<String>,
    /// The suggestion shown to the human before they edited it.
    #[serde(default)]
    pub ai_suggestion: Option<Classification>,
    #[serde(default)]
    pub human_reviewed: bool,
    /// Set when this entry answers a knowledge gap.
    #[serde(default)]
    pub gap_query: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub index: &'static str,
    pub entries: Option<usize>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

pub struct Weaver {
    config: Config,
    index: Arc<dyn VectorIndex>,
    provider_name: String,
    repo: Arc<KnowledgeRepository>,
    processor: ChatLogProcessor,
    queries: QueryService,
    learning: Arc<ContextBuilder>,
    gaps: GapTracker,
    metrics: Metrics,
}

impl Weaver {
    /// Connect to the configured database (creating the schema if needed)
    /// and the configured provider.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::migrate_pool(&pool).await?;
        let backend = create_provider(&config.provider)?;

        let components = Components {
            index: Arc::new(SqliteIndex::new(pool.clone())),
            log: Arc::new(SqliteEventLog::new(pool)),
            embedder: backend.embedder,
            analyzer: backend.analyzer,
        };
        Ok(Self::with_components(config, components))
    }

    /// Assemble the engine over caller-supplied storage and providers.
    pub fn with_components(config: Config, components: Components) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        let provider_name = components.embedder.model_name().to_string();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(RetryingEmbedder::new(
            components.embedder,
            policy.clone(),
            config.retry.embed_timeout(),
        ));
        let analyzer: Arc<dyn AnalysisProvider> = Arc::new(RetryingAnalyzer::new(
            components.analyzer,
            policy,
            config.retry.analyze_timeout(),
        ));

        let learning = Arc::new(ContextBuilder::new(
            components.log.clone(),
            embedder.clone(),
            &config.learning,
        ));
        let repo = Arc::new(KnowledgeRepository::new(
            components.index.clone(),
            embedder.clone(),
            analyzer,
            learning.clone(),
        ));

        Self {
            processor: ChatLogProcessor::new(
                repo.clone(),
                config.ingest.max_batch,
                config.ingest.anonymize,
            ),
            queries: QueryService::new(
                components.index.clone(),
                embedder,
                components.log.clone(),
                &config.retrieval,
            ),
            gaps: GapTracker::new(components.log.clone(), config.retrieval.gap_threshold),
            metrics: Metrics::new(
                components.index.clone(),
                components.log,
                config.retrieval.gap_threshold,
            ),
            index: components.index,
            provider_name,
            repo,
            learning,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn process_chat_logs(&self, messages: Vec<ChatMessage>) -> Result<ProcessingResult> {
        self.processor.process(messages).await
    }

    /// Suggest a classification for `text` without storing anything.
    pub async fn analyze(&self, text: &str) -> Result<Classification> {
        self.repo.analyze(text).await
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<KnowledgeEntry> {
        let gap_query = request
            .gap_query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        let entry_type = if gap_query.is_some() {
            EntryType::GapResolution
        } else {
            EntryType::ManualCapture
        };

        let category = request
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let classification = match category {
            Some(category) => Some(Classification {
                category,
                tags: canonical_tags(request.tags.unwrap_or_default()),
                summary: request.summary.unwrap_or_default().trim().to_string(),
            }),
            None if request.tags.is_some() || request.summary.is_some() => {
                return Err(WeaverError::InvalidInput(
                    "category is required when tags or summary are supplied".into(),
                ))
            }
            None => None,
        };

        let source = SourceMetadata {
            participants: request.participants,
            platform: request.platform,
            source_id: request.url,
            attachment: request.attachment,
            ..SourceMetadata::at(request.timestamp.unwrap_or_else(Utc::now))
        };

        let mut new = NewEntry::new(request.text, entry_type, source);
        new.classification = classification;
        new.ai_suggestion = request.ai_suggestion;
        new.human_reviewed = request.human_reviewed;
        new.gap_query = gap_query;
        self.repo.create(new).await
    }

    pub async fn query(&self, text: &str, verified_only: bool) -> Result<QueryResult> {
        self.queries.query(text, verified_only).await
    }

    pub async fn list_recent(&self, limit: usize, deleted_only: bool) -> Result<Vec<KnowledgeEntry>> {
        self.repo.list_recent(limit, deleted_only).await
    }

    pub async fn get(&self, id: &str) -> Result<KnowledgeEntry> {
        self.repo.get(id).await
    }

    pub async fn edit(&self, id: &str, patch: EntryPatch) -> Result<EditOutcome> {
        self.repo.update(id, patch).await
    }

    pub async fn soft_delete(&self, id: &str) -> Result<KnowledgeEntry> {
        self.repo.soft_delete(id).await
    }

    pub async fn restore(&self, id: &str) -> Result<KnowledgeEntry> {
        self.repo.restore(id).await
    }

    pub async fn list_gaps(&self, window_days: i64, limit: usize) -> Result<Vec<KnowledgeGap>> {
        self.gaps.list_gaps(window_days, limit).await
    }

    pub async fn correction_history(&self, limit: usize) -> Result<Vec<CorrectionEvent>> {
        self.learning.history(limit).await
    }

    pub async fn learning_stats(&self) -> Result<LearningStats> {
        self.learning.stats().await
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        self.metrics.dashboard().await
    }

    pub async fn query_logs(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<QueryLogEntry>> {
        self.metrics.query_logs(since, until, limit).await
    }

    /// Readiness: healthy when the index answers, degraded otherwise.
    pub async fn health(&self) -> Health {
        let probe = match self.index.ping().await {
            Ok(()) => self.index.count(&IndexFilter::active()).await,
            Err(e) => Err(e),
        };
        match probe {
            Ok(entries) => Health {
                status: "healthy",
                index: "connected",
                entries: Some(entries),
                provider: self.provider_name.clone(),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "health check failed");
                Health {
                    status: "degraded",
                    index: "error",
                    entries: None,
                    provider: self.provider_name.clone(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
