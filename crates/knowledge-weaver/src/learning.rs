//! Active learning: human corrections fed back as few-shot context.
//!
//! Every time a human overrides an AI classification, a [`CorrectionEvent`]
//! is appended to the event log. Before the next analysis, the corrections
//! whose source text is most similar to the new input are handed to the
//! analysis provider as worked examples.
//!
//! Correction vectors are embedded lazily and cached by correction id for
//! the life of the process. Corrections are immutable, so the cache never
//! needs invalidation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use knowledge_weaver_core::embedding::{similarity_score, EmbeddingProvider};
use knowledge_weaver_core::few_shot::{select_examples, ScoredCorrection};
use knowledge_weaver_core::models::{Classification, CorrectionEvent};
use knowledge_weaver_core::store::EventLog;
use knowledge_weaver_core::Result;

use crate::config::LearningConfig;

/// Aggregate counters over the correction log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningStats {
    pub total_corrections: usize,
    pub category_changes: usize,
    pub tag_changes: usize,
    pub summary_changes: usize,
    pub last_correction_at: Option<DateTime<Utc>>,
}

pub struct ContextBuilder {
    log: Arc<dyn EventLog>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Vec<f32>>>,
    max_examples: usize,
    similarity_floor: f32,
}

impl ContextBuilder {
    pub fn new(
        log: Arc<dyn EventLog>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &LearningConfig,
    ) -> Self {
        Self {
            log,
            embedder,
            cache: RwLock::new(HashMap::new()),
            max_examples: config.max_examples,
            similarity_floor: config.similarity_floor,
        }
    }

    /// Append a correction if `human` differs from `ai` in any field.
    ///
    /// Returns the recorded event, or `None` when the classifications agree.
    pub async fn record(
        &self,
        entry_id: Option<&str>,
        ai: &Classification,
        human: &Classification,
        source_text: &str,
    ) -> Result<Option<CorrectionEvent>> {
        let changed = ai.changed_fields(human);
        if changed.is_empty() {
            return Ok(None);
        }

        let event = CorrectionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            entry_id: entry_id.map(str::to_string),
            ai_prediction: ai.clone(),
            human_correction: human.clone(),
            source_text: source_text.to_string(),
            timestamp: Utc::now().trunc_subsecs(3),
        };
        self.log.append_correction(&event).await?;
        info!(
            correction_id = %event.id,
            entry_id = entry_id.unwrap_or("-"),
            fields = ?changed,
            "recorded correction"
        );
        Ok(Some(event))
    }

    /// Prior corrections most similar to `text`, most similar first.
    ///
    /// With no corrections on file this returns immediately without touching
    /// the provider.
    pub async fn build_context(&self, text: &str) -> Result<Vec<CorrectionEvent>> {
        let corrections = self.log.corrections(None).await?;
        if corrections.is_empty() {
            return Ok(Vec::new());
        }

        let probe = self.embedder.embed(text).await?;
        let mut scored = Vec::with_capacity(corrections.len());
        for event in corrections {
            let vector = match self.cached_vector(&event).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(correction_id = %event.id, error = %e, "skipping correction with no embedding");
                    continue;
                }
            };
            scored.push(ScoredCorrection {
                score: similarity_score(&probe, &vector),
                event,
            });
        }

        let examples = select_examples(scored, self.similarity_floor, self.max_examples);
        debug!(examples = examples.len(), "built few-shot context");
        Ok(examples)
    }

    async fn cached_vector(&self, event: &CorrectionEvent) -> Result<Vec<f32>> {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.id)
            .cloned();
        if let Some(v) = cached {
            return Ok(v);
        }
        let vector = self.embedder.embed(&event.source_text).await?;
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.id.clone(), vector.clone());
        Ok(vector)
    }

    /// Most recent corrections first.
    pub async fn history(&self, limit: usize) -> Result<Vec<CorrectionEvent>> {
        self.log.corrections(Some(limit)).await
    }

    pub async fn stats(&self) -> Result<LearningStats> {
        let corrections = self.log.corrections(None).await?;
        let mut stats = LearningStats {
            total_corrections: corrections.len(),
            last_correction_at: corrections.iter().map(|c| c.timestamp).max(),
            ..LearningStats::default()
        };
        for event in &corrections {
            for field in event.changed_fields() {
                match field {
                    "category" => stats.category_changes += 1,
                    "tags" => stats.tag_changes += 1,
                    "summary" => stats.summary_changes += 1,
                    _ => {}
                }
            }
        }
        Ok(stats)
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knowledge_weaver_core::store::memory::InMemoryEventLog;
    use knowledge_weaver_core::WeaverError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps a few known words onto fixed axes and counts calls.
    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let t = text.to_lowercase();
            if t.contains("offline") {
                return Err(WeaverError::transient("offline"));
            }
            Ok(vec![
                t.contains("lunch") as u8 as f32,
                t.contains("vpn") as u8 as f32,
                t.contains("payroll") as u8 as f32 + 0.01,
            ])
        }
    }

    fn builder() -> (ContextBuilder, Arc<AxisEmbedder>) {
        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let builder = ContextBuilder::new(
            Arc::new(InMemoryEventLog::new()),
            embedder.clone(),
            &LearningConfig::default(),
        );
        (builder, embedder)
    }

    #[tokio::test]
    async fn test_empty_log_skips_provider() {
        let (builder, embedder) = builder();
        assert!(builder.build_context("lunch").await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_similar_correction_selected_and_cached() {
        let (builder, embedder) = builder();
        let ai = Classification::new("General", Vec::<String>::new(), "");
        let human = Classification::new("Culture", ["food"], "Friday lunch");
        builder
            .record(None, &ai, &human, "Free lunch on Friday")
            .await
            .unwrap()
            .unwrap();
        builder
            .record(None, &ai, &Classification::new("IT", ["vpn"], ""), "VPN resets")
            .await
            .unwrap();

        let picked = builder.build_context("Is lunch free today?").await.unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].human_correction.category, "Culture");
        assert_eq!(builder.cached(), 2);

        let before = embedder.calls.load(Ordering::SeqCst);
        builder.build_context("lunch again").await.unwrap();
        // Only the probe is embedded on the second pass.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_identical_classification_not_recorded() {
        let (builder, _) = builder();
        let c = Classification::new("Ops", ["vpn"], "x");
        assert!(builder.record(None, &c, &c.clone(), "t").await.unwrap().is_none());
        assert_eq!(builder.stats().await.unwrap().total_corrections, 0);
    }

    #[tokio::test]
    async fn test_stats_count_changed_fields() {
        let (builder, _) = builder();
        let ai = Classification::new("General", ["misc"], "s");
        builder
            .record(Some("e1"), &ai, &Classification::new("HR", ["misc"], "s"), "a")
            .await
            .unwrap();
        builder
            .record(Some("e2"), &ai, &Classification::new("HR", ["pto"], "s2"), "b")
            .await
            .unwrap();
        let stats = builder.stats().await.unwrap();
        assert_eq!(stats.total_corrections, 2);
        assert_eq!(stats.category_changes, 2);
        assert_eq!(stats.tag_changes, 1);
        assert_eq!(stats.summary_changes, 1);
        assert!(stats.last_correction_at.is_some());

        let history = builder.history(1).await.unwrap();
        assert_eq!(history[0].entry_id.as_deref(), Some("e2"));
    }

    #[tokio::test]
    async fn test_unembeddable_correction_is_skipped() {
        let (builder, _) = builder();
        let ai = Classification::new("General", Vec::<String>::new(), "");
        builder
            .record(None, &ai, &Classification::new("Ops", ["net"], ""), "offline notes")
            .await
            .unwrap();
        assert!(builder.build_context("lunch").await.unwrap().is_empty());
    }
}
