//! Core data models used throughout Knowledge Weaver.
//!
//! These types represent the knowledge entries, human corrections, and query
//! log records that flow through the ingestion and retrieval engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::WeaverError;

/// How a knowledge entry came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    ManualCapture,
    ChatLogDerived,
    GapResolution,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualCapture => "manual_capture",
            Self::ChatLogDerived => "chat_log_derived",
            Self::GapResolution => "gap_resolution",
        }
    }
}

impl FromStr for EntryType {
    type Err = WeaverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual_capture" => Ok(Self::ManualCapture),
            "chat_log_derived" => Ok(Self::ChatLogDerived),
            "gap_resolution" => Ok(Self::GapResolution),
            other => Err(WeaverError::InvalidInput(format!(
                "unknown entry type: '{}'",
                other
            ))),
        }
    }
}

/// Trust level of an entry's content and classification, least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Draft,
    AiVerified,
    HumanVerified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::AiVerified => "ai_verified",
            Self::HumanVerified => "human_verified",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = WeaverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "ai_verified" => Ok(Self::AiVerified),
            "human_verified" => Ok(Self::HumanVerified),
            other => Err(WeaverError::InvalidInput(format!(
                "unknown verification status: '{}'",
                other
            ))),
        }
    }
}

/// Tags as they arrive at the boundary: a JSON list or a comma-separated string.
///
/// Converted once, on write, into the canonical ordered set via [`canonical_tags`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Csv(String),
}

impl Default for TagsInput {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// Canonicalize tags: trimmed, non-empty, deduplicated, ordered.
pub fn canonical_tags(input: TagsInput) -> BTreeSet<String> {
    let raw: Vec<String> = match input {
        TagsInput::List(list) => list,
        TagsInput::Csv(s) => s.split(',').map(str::to_string).collect(),
    };
    raw.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Category, tags, and summary: the classification a human or the AI assigns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub summary: String,
}

impl Classification {
    pub fn new(
        category: impl Into<String>,
        tags: impl IntoIterator<Item = impl Into<String>>,
        summary: impl Into<String>,
    ) -> Self {
        let tags = tags.into_iter().map(Into::into).collect::<Vec<String>>();
        Self {
            category: category.into().trim().to_string(),
            tags: canonical_tags(TagsInput::List(tags)),
            summary: summary.into().trim().to_string(),
        }
    }

    /// Names of the fields that differ between `self` and `other`.
    pub fn changed_fields(&self, other: &Classification) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.category != other.category {
            fields.push("category");
        }
        if self.tags != other.tags {
            fields.push("tags");
        }
        if self.summary != other.summary {
            fields.push("summary");
        }
        fields
    }
}

/// Where a piece of knowledge originated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Origin time of the underlying message or capture.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
    /// Message/thread identifier or capture URL.
    #[serde(default)]
    pub source_id: Option<String>,
    /// Opaque reference to a redacted screenshot or other attachment.
    #[serde(default)]
    pub attachment: Option<String>,
}

impl SourceMetadata {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            participants: Vec::new(),
            platform: None,
            source_id: None,
            attachment: None,
        }
    }
}

/// A stored, searchable unit of resurrected knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing)]
    pub vector: Vec<f32>,
    pub entry_type: EntryType,
    #[serde(flatten)]
    pub classification: Classification,
    pub verification_status: VerificationStatus,
    pub source: SourceMetadata,
    /// Latest AI suggestion for the current content; baseline for correction detection.
    #[serde(default)]
    pub ai_suggestion: Option<Classification>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A human overriding an AI-suggested classification. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEvent {
    pub id: String,
    #[serde(default)]
    pub entry_id: Option<String>,
    pub ai_prediction: Classification,
    pub human_correction: Classification,
    pub source_text: String,
    pub timestamp: DateTime<Utc>,
}

impl CorrectionEvent {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        self.ai_prediction.changed_fields(&self.human_correction)
    }
}

/// One retrieval attempt, recorded whether or not it produced an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: String,
    pub query_text: String,
    pub timestamp: DateTime<Utc>,
    /// Best candidate score before thresholding; `None` when the index had no candidates.
    pub top_similarity_score: Option<f32>,
    pub result_count: usize,
    pub verified_only_filter: bool,
    /// The invocation ended in a provider or index error.
    #[serde(default)]
    pub failed: bool,
}

/// A recurring query the index cannot answer, aggregated from the query log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeGap {
    pub query: String,
    pub count: usize,
    pub most_recent: DateTime<Utc>,
}

/// A raw chat message handed to the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub content: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}
