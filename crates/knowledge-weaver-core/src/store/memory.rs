//! In-memory [`VectorIndex`] and [`EventLog`] implementations for tests and
//! embedding in other processes.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over all stored entries.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CorrectionEvent, KnowledgeEntry, QueryLogEntry};
use crate::search::score_entries;

use super::{EventLog, IndexFilter, SearchHit, TimeRange, VectorIndex};

// A panicked writer cannot leave a half-applied upsert behind (each write is a
// single insert), so poisoned guards are safe to reuse.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// In-memory knowledge index.
pub struct InMemoryIndex {
    entries: RwLock<HashMap<String, KnowledgeEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, entry: &KnowledgeEntry) -> Result<()> {
        write(&self.entries).insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        Ok(read(&self.entries).get(id).cloned())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<SearchHit>> {
        let entries = read(&self.entries);
        Ok(score_entries(vector, entries.values(), top_k, filter))
    }

    async fn list(&self, filter: &IndexFilter, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let entries = read(&self.entries);
        let mut listed: Vec<KnowledgeEntry> = entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        listed.truncate(limit);
        Ok(listed)
    }

    async fn count(&self, filter: &IndexFilter) -> Result<usize> {
        Ok(read(&self.entries)
            .values()
            .filter(|e| filter.matches(e))
            .count())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(write(&self.entries).remove(id).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory append-only event log.
pub struct InMemoryEventLog {
    corrections: RwLock<Vec<CorrectionEvent>>,
    queries: RwLock<Vec<QueryLogEntry>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            corrections: RwLock::new(Vec::new()),
            queries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append_correction(&self, event: &CorrectionEvent) -> Result<()> {
        write(&self.corrections).push(event.clone());
        Ok(())
    }

    async fn corrections(&self, limit: Option<usize>) -> Result<Vec<CorrectionEvent>> {
        let stored = read(&self.corrections);
        let newest_first = stored.iter().rev().cloned();
        Ok(match limit {
            Some(n) => newest_first.take(n).collect(),
            None => newest_first.collect(),
        })
    }

    async fn append_query(&self, entry: &QueryLogEntry) -> Result<()> {
        write(&self.queries).push(entry.clone());
        Ok(())
    }

    async fn queries(
        &self,
        range: &TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<QueryLogEntry>> {
        let stored = read(&self.queries);
        let matching = stored
            .iter()
            .rev()
            .filter(|q| range.contains(q.timestamp))
            .cloned();
        Ok(match limit {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, EntryType, SourceMetadata, VerificationStatus};
    use chrono::{Duration, Utc};

    fn entry(id: &str, vector: Vec<f32>, age_minutes: i64) -> KnowledgeEntry {
        let created = Utc::now() - Duration::minutes(age_minutes);
        KnowledgeEntry {
            id: id.to_string(),
            content: format!("content of {}", id),
            vector,
            entry_type: EntryType::ManualCapture,
            classification: Classification::default(),
            verification_status: VerificationStatus::Draft,
            source: SourceMetadata::at(created),
            ai_suggestion: None,
            created_at: created,
            updated_at: created,
            deleted: false,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = InMemoryIndex::new();
        index.upsert(&entry("a", vec![1.0, 0.0], 0)).await.unwrap();
        let mut changed = entry("a", vec![0.0, 1.0], 0);
        changed.content = "changed".into();
        index.upsert(&changed).await.unwrap();

        assert_eq!(index.count(&IndexFilter::default()).await.unwrap(), 1);
        let got = index.get("a").await.unwrap().unwrap();
        assert_eq!(got.content, "changed");
    }

    #[tokio::test]
    async fn test_self_similarity_ranks_first() {
        let index = InMemoryIndex::new();
        index.upsert(&entry("x", vec![0.2, 0.9, 0.1], 0)).await.unwrap();
        index.upsert(&entry("y", vec![0.9, 0.1, 0.3], 0)).await.unwrap();

        let hits = index
            .search(&[0.2, 0.9, 0.1], 3, &IndexFilter::active())
            .await
            .unwrap();
        assert_eq!(hits[0].entry.id, "x");
        assert!(hits[0].score >= 0.999);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_split_by_deletion() {
        let index = InMemoryIndex::new();
        index.upsert(&entry("old", vec![1.0], 10)).await.unwrap();
        index.upsert(&entry("new", vec![1.0], 1)).await.unwrap();
        let mut gone = entry("gone", vec![1.0], 5);
        gone.deleted = true;
        index.upsert(&gone).await.unwrap();

        let active = index.list(&IndexFilter::active(), 10).await.unwrap();
        let ids: Vec<&str> = active.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let deleted = index.list(&IndexFilter::deleted_only(), 10).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].id, "gone");
    }

    #[tokio::test]
    async fn test_query_log_range_and_limit() {
        let log = InMemoryEventLog::new();
        let now = Utc::now();
        for (i, age) in [30i64, 2, 1].iter().enumerate() {
            log.append_query(&QueryLogEntry {
                id: format!("q{}", i),
                query_text: "how".into(),
                timestamp: now - Duration::days(*age),
                top_similarity_score: None,
                result_count: 0,
                verified_only_filter: false,
                failed: false,
            })
            .await
            .unwrap();
        }

        let recent = log
            .queries(&TimeRange::since(now - Duration::days(7)), None)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "q2");

        let one = log.queries(&TimeRange::default(), Some(1)).await.unwrap();
        assert_eq!(one[0].id, "q2");
    }
}
