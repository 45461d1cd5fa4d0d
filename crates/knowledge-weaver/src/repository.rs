//! Knowledge entry lifecycle on top of the vector index.
//!
//! The repository is the only writer of the index. It owns the rules for
//! creating, editing, soft-deleting, and restoring entries:
//!
//! - **Create**: assigns an id, analyzes with active-learning context when no
//!   classification is supplied, embeds the content, and persists.
//! - **Edit**: changing content or the attachment forces a fresh analysis
//!   and, for content, a fresh vector. Human-submitted classification fields
//!   that disagree with the AI baseline produce exactly one correction.
//! - **Soft delete / restore**: flip the `deleted` flag and `deleted_at`
//!   without touching anything else.
//!
//! Mutations of a single entry are serialized through [`KeyedLocks`].

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use knowledge_weaver_core::embedding::{AnalysisProvider, EmbeddingProvider};
use knowledge_weaver_core::models::{
    canonical_tags, Classification, CorrectionEvent, EntryType, KnowledgeEntry, SourceMetadata,
    TagsInput, VerificationStatus,
};
use knowledge_weaver_core::store::{IndexFilter, VectorIndex};
use knowledge_weaver_core::{Result, WeaverError};

use crate::learning::ContextBuilder;
use crate::locks::KeyedLocks;

/// Input for [`KnowledgeRepository::create`].
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub content: String,
    pub entry_type: EntryType,
    /// Human-supplied classification. When absent the content is analyzed.
    pub classification: Option<Classification>,
    /// What the AI suggested before the human edited it, if known.
    pub ai_suggestion: Option<Classification>,
    /// A human reviewed this manual entry before submitting it.
    pub human_reviewed: bool,
    /// The unanswered query this entry resolves; becomes its summary.
    pub gap_query: Option<String>,
    pub source: SourceMetadata,
}

impl NewEntry {
    pub fn new(content: impl Into<String>, entry_type: EntryType, source: SourceMetadata) -> Self {
        Self {
            content: content.into(),
            entry_type,
            classification: None,
            ai_suggestion: None,
            human_reviewed: false,
            gap_query: None,
            source,
        }
    }
}

/// Partial edit of an entry. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryPatch {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Option<TagsInput>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub verification_status: Option<VerificationStatus>,
}

impl EntryPatch {
    fn has_classification(&self) -> bool {
        self.category.is_some() || self.tags.is_some() || self.summary.is_some()
    }
}

/// Result of an edit: the persisted entry and the correction it produced.
#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub entry: KnowledgeEntry,
    pub correction: Option<CorrectionEvent>,
}

pub struct KnowledgeRepository {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    analyzer: Arc<dyn AnalysisProvider>,
    learning: Arc<ContextBuilder>,
    locks: KeyedLocks,
}

/// Timestamps are kept at the millisecond precision the store persists.
fn now_ms() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn require_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(WeaverError::InvalidInput("content must not be empty".into()));
    }
    Ok(())
}

impl KnowledgeRepository {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        analyzer: Arc<dyn AnalysisProvider>,
        learning: Arc<ContextBuilder>,
    ) -> Self {
        Self {
            index,
            embedder,
            analyzer,
            learning,
            locks: KeyedLocks::new(),
        }
    }

    /// Analyze `text`, biased by the most similar prior corrections.
    ///
    /// Failing to assemble the few-shot context degrades to a plain analysis
    /// rather than failing the call.
    pub async fn analyze(&self, text: &str) -> Result<Classification> {
        require_content(text)?;
        let few_shot = match self.learning.build_context(text).await {
            Ok(examples) => examples,
            Err(e) => {
                warn!(error = %e, "few-shot context unavailable, analyzing without it");
                Vec::new()
            }
        };
        self.analyzer.analyze(text, &few_shot).await
    }

    pub async fn create(&self, new: NewEntry) -> Result<KnowledgeEntry> {
        require_content(&new.content)?;

        // The human classification as submitted, before any gap summary is
        // applied; only this is judged against the AI suggestion.
        let submitted = new.classification.clone();
        let (mut classification, ai_suggestion) = match new.classification {
            Some(human) => (human, new.ai_suggestion),
            None => {
                let ai = self.analyze(&new.content).await?;
                (ai.clone(), Some(ai))
            }
        };
        if let Some(query) = new.gap_query.as_deref().map(str::trim) {
            if !query.is_empty() {
                classification.summary = query.to_string();
            }
        }

        let vector = self.embedder.embed(&new.content).await?;

        let manual = matches!(
            new.entry_type,
            EntryType::ManualCapture | EntryType::GapResolution
        );
        let verification_status = if manual && new.human_reviewed {
            VerificationStatus::HumanVerified
        } else {
            VerificationStatus::Draft
        };

        let now = now_ms();
        let entry = KnowledgeEntry {
            id: uuid::Uuid::new_v4().to_string(),
            content: new.content,
            vector,
            entry_type: new.entry_type,
            classification,
            verification_status,
            source: new.source,
            ai_suggestion,
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        };
        self.index.upsert(&entry).await?;

        if let (Some(human), Some(ai)) = (&submitted, &entry.ai_suggestion) {
            let recorded = self
                .learning
                .record(Some(&entry.id), ai, human, &entry.content)
                .await;
            if let Err(e) = recorded {
                self.roll_back(&entry.id, None).await;
                return Err(e);
            }
        }

        info!(
            entry_id = %entry.id,
            entry_type = entry.entry_type.as_str(),
            status = %entry.verification_status,
            category = %entry.classification.category,
            "created knowledge entry"
        );
        Ok(entry)
    }

    /// Undo an index write whose correction could not be logged: put back
    /// `previous`, or drop the entry if it did not exist before.
    async fn roll_back(&self, id: &str, previous: Option<&KnowledgeEntry>) {
        let undone = match previous {
            Some(entry) => self.index.upsert(entry).await,
            None => self.index.remove(id).await.map(|_| ()),
        };
        match undone {
            Ok(()) => warn!(entry_id = %id, "correction not logged, index write rolled back"),
            Err(e) => warn!(entry_id = %id, error = %e, "correction not logged and rollback failed"),
        }
    }

    pub async fn get(&self, id: &str) -> Result<KnowledgeEntry> {
        self.index
            .get(id)
            .await?
            .ok_or_else(|| WeaverError::NotFound(format!("knowledge entry {}", id)))
    }

    pub async fn update(&self, id: &str, patch: EntryPatch) -> Result<EditOutcome> {
        let _guard = self.locks.lock(id).await;

        let current = self.get(id).await?;
        if current.deleted {
            return Err(WeaverError::NotFound(format!(
                "knowledge entry {} is deleted; restore it before editing",
                id
            )));
        }
        if let Some(content) = &patch.content {
            require_content(content)?;
        }

        let content_changed = patch
            .content
            .as_ref()
            .is_some_and(|c| *c != current.content);
        let attachment_changed = patch
            .attachment
            .as_ref()
            .is_some_and(|a| current.source.attachment.as_ref() != Some(a));

        let mut entry = current.clone();
        if let Some(content) = patch.content.clone() {
            entry.content = content;
        }
        if let Some(attachment) = patch.attachment.clone() {
            entry.source.attachment = Some(attachment);
        }

        // The classification a human edit is judged against, and the one
        // unsubmitted fields fall back to.
        let (baseline, fallback) = if content_changed || attachment_changed {
            let fresh = self.analyze(&entry.content).await?;
            if content_changed {
                entry.vector = self.embedder.embed(&entry.content).await?;
            }
            entry.ai_suggestion = Some(fresh.clone());
            (fresh.clone(), fresh)
        } else {
            let baseline = current
                .ai_suggestion
                .clone()
                .unwrap_or_else(|| current.classification.clone());
            (baseline, current.classification.clone())
        };

        let submitted_differs = patch
            .category
            .as_ref()
            .is_some_and(|c| c.trim() != baseline.category)
            || patch
                .tags
                .as_ref()
                .is_some_and(|t| canonical_tags(t.clone()) != baseline.tags)
            || patch
                .summary
                .as_ref()
                .is_some_and(|s| s.trim() != baseline.summary);

        entry.classification = Classification {
            category: patch
                .category
                .as_deref()
                .map(|c| c.trim().to_string())
                .unwrap_or(fallback.category),
            tags: patch
                .tags
                .clone()
                .map(canonical_tags)
                .unwrap_or(fallback.tags),
            summary: patch
                .summary
                .as_deref()
                .map(|s| s.trim().to_string())
                .unwrap_or(fallback.summary),
        };

        entry.verification_status = match patch.verification_status {
            Some(status) => status,
            None if content_changed => VerificationStatus::Draft,
            None => current.verification_status,
        };
        entry.updated_at = now_ms();

        self.index.upsert(&entry).await?;

        let correction = if patch.has_classification() && submitted_differs {
            let recorded = self
                .learning
                .record(Some(&entry.id), &baseline, &entry.classification, &entry.content)
                .await;
            match recorded {
                Ok(event) => event,
                Err(e) => {
                    self.roll_back(&entry.id, Some(&current)).await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            entry_id = %entry.id,
            content_changed,
            attachment_changed,
            status = %entry.verification_status,
            "updated knowledge entry"
        );
        Ok(EditOutcome { entry, correction })
    }

    /// Hide an entry from search and default listings. Idempotent.
    pub async fn soft_delete(&self, id: &str) -> Result<KnowledgeEntry> {
        let _guard = self.locks.lock(id).await;

        let mut entry = self.get(id).await?;
        if entry.deleted {
            return Ok(entry);
        }
        entry.deleted = true;
        entry.deleted_at = Some(now_ms());
        self.index.upsert(&entry).await?;
        info!(entry_id = %id, "soft-deleted knowledge entry");
        Ok(entry)
    }

    /// Bring a soft-deleted entry back exactly as it was.
    pub async fn restore(&self, id: &str) -> Result<KnowledgeEntry> {
        let _guard = self.locks.lock(id).await;

        let mut entry = self.get(id).await?;
        if !entry.deleted {
            return Err(WeaverError::NotFound(format!(
                "knowledge entry {} is not deleted",
                id
            )));
        }
        entry.deleted = false;
        entry.deleted_at = None;
        self.index.upsert(&entry).await?;
        info!(entry_id = %id, "restored knowledge entry");
        Ok(entry)
    }

    /// Newest first; either the active entries or the deleted ones.
    pub async fn list_recent(&self, limit: usize, deleted_only: bool) -> Result<Vec<KnowledgeEntry>> {
        let filter = if deleted_only {
            IndexFilter::deleted_only()
        } else {
            IndexFilter::active()
        };
        self.index.list(&filter, limit).await
    }
}
