//! Storage abstraction for Knowledge Weaver.
//!
//! Two traits cover all persisted state:
//!
//! - [`VectorIndex`] holds knowledge entries together with their vectors and
//!   metadata, and answers nearest-neighbour queries.
//! - [`EventLog`] is the append-only log of correction events and query log
//!   entries.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{CorrectionEvent, KnowledgeEntry, QueryLogEntry, VerificationStatus};

/// Metadata filter applied to index reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexFilter {
    /// `Some(false)` = active only, `Some(true)` = deleted only, `None` = both.
    pub deleted: Option<bool>,
    /// Restrict to these verification statuses; `None` admits any.
    pub statuses: Option<Vec<VerificationStatus>>,
}

impl IndexFilter {
    /// Entries visible to search and default listings.
    pub fn active() -> Self {
        Self {
            deleted: Some(false),
            statuses: None,
        }
    }

    /// The recycle-bin view.
    pub fn deleted_only() -> Self {
        Self {
            deleted: Some(true),
            statuses: None,
        }
    }

    pub fn with_statuses(mut self, statuses: &[VerificationStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn matches(&self, entry: &KnowledgeEntry) -> bool {
        if let Some(deleted) = self.deleted {
            if entry.deleted != deleted {
                return false;
            }
        }
        if let Some(ref statuses) = self.statuses {
            if !statuses.contains(&entry.verification_status) {
                return false;
            }
        }
        true
    }
}

/// An index match: the stored entry and its similarity to the probe vector.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: KnowledgeEntry,
    /// Cosine similarity clamped to `[0, 1]`.
    pub score: f32,
}

/// Inclusive time window over the event log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: None,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.since.map_or(true, |s| ts >= s) && self.until.map_or(true, |u| ts <= u)
    }
}

/// Persistent store of knowledge entries and their vectors.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace an entry by id |
/// | [`get`](VectorIndex::get) | Fetch one entry regardless of deletion state |
/// | [`search`](VectorIndex::search) | Cosine nearest neighbours under a filter |
/// | [`list`](VectorIndex::list) | Entries by creation time, newest first |
/// | [`count`](VectorIndex::count) | Number of entries under a filter |
/// | [`remove`](VectorIndex::remove) | Hard purge (not used by soft delete) |
/// | [`ping`](VectorIndex::ping) | Connectivity check for health reporting |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, entry: &KnowledgeEntry) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<KnowledgeEntry>>;

    /// Results are ordered by [`rank_hits`](crate::search::rank_hits) and
    /// truncated to `top_k`.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<SearchHit>>;

    async fn list(&self, filter: &IndexFilter, limit: usize) -> Result<Vec<KnowledgeEntry>>;

    async fn count(&self, filter: &IndexFilter) -> Result<usize>;

    /// Returns whether an entry was removed.
    async fn remove(&self, id: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

/// Append-only log of corrections and queries.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append_correction(&self, event: &CorrectionEvent) -> Result<()>;

    /// Corrections, newest first.
    async fn corrections(&self, limit: Option<usize>) -> Result<Vec<CorrectionEvent>>;

    async fn append_query(&self, entry: &QueryLogEntry) -> Result<()>;

    /// Query log entries inside `range`, newest first.
    async fn queries(&self, range: &TimeRange, limit: Option<usize>)
        -> Result<Vec<QueryLogEntry>>;
}
