//! Semantic retrieval over the knowledge index.
//!
//! Every query that passes validation writes exactly one query log entry,
//! whether it finds an answer, finds nothing, or fails part way. Those
//! entries feed knowledge gap tracking and the dashboard.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use serde::Serialize;
use tracing::{info, warn};

use knowledge_weaver_core::embedding::EmbeddingProvider;
use knowledge_weaver_core::models::{KnowledgeEntry, QueryLogEntry, VerificationStatus};
use knowledge_weaver_core::search::{apply_threshold, Thresholded};
use knowledge_weaver_core::store::{EventLog, IndexFilter, VectorIndex};
use knowledge_weaver_core::{Result, WeaverError};

use crate::config::RetrievalConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Answered,
    NoMatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub status: QueryStatus,
    pub results: Vec<QueryMatch>,
    /// Best candidate score before the relevance threshold was applied.
    pub top_score: Option<f32>,
}

pub struct QueryService {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    log: Arc<dyn EventLog>,
    relevance_threshold: f32,
    top_k: usize,
}

impl QueryService {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        log: Arc<dyn EventLog>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            log,
            relevance_threshold: config.relevance_threshold,
            top_k: config.top_k,
        }
    }

    pub async fn query(&self, text: &str, verified_only: bool) -> Result<QueryResult> {
        let text = text.trim();
        if text.is_empty() {
            return Err(WeaverError::InvalidInput("query must not be empty".into()));
        }

        let mut record = QueryLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            query_text: text.to_string(),
            timestamp: Utc::now().trunc_subsecs(3),
            top_similarity_score: None,
            result_count: 0,
            verified_only_filter: verified_only,
            failed: false,
        };

        let outcome = self.search(text, verified_only).await;
        match outcome {
            Ok(Thresholded {
                top_score,
                relevant,
            }) => {
                record.top_similarity_score = top_score;
                record.result_count = relevant.len();
                self.log.append_query(&record).await?;

                let status = if relevant.is_empty() {
                    QueryStatus::NoMatch
                } else {
                    QueryStatus::Answered
                };
                info!(
                    query_id = %record.id,
                    results = relevant.len(),
                    top_score = ?top_score,
                    verified_only,
                    "query served"
                );
                Ok(QueryResult {
                    query: text.to_string(),
                    status,
                    results: relevant
                        .into_iter()
                        .map(|hit| QueryMatch {
                            entry: hit.entry,
                            score: hit.score,
                        })
                        .collect(),
                    top_score,
                })
            }
            Err(e) => {
                record.failed = true;
                if let Err(log_err) = self.log.append_query(&record).await {
                    warn!(query_id = %record.id, error = %log_err, "could not log failed query");
                }
                warn!(query_id = %record.id, error = %e, "query failed");
                Err(e)
            }
        }
    }

    async fn search(&self, text: &str, verified_only: bool) -> Result<Thresholded> {
        let vector = self.embedder.embed(text).await?;
        let mut filter = IndexFilter::active();
        if verified_only {
            filter = filter.with_statuses(&[VerificationStatus::HumanVerified]);
        }
        let hits = self.index.search(&vector, self.top_k, &filter).await?;
        Ok(apply_threshold(hits, self.relevance_threshold))
    }
}
