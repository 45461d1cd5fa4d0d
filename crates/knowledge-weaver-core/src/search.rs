//! Ranking and relevance thresholding.
//!
//! Both index backends score candidates by brute-force cosine similarity and
//! hand the scored hits to [`rank_hits`], so ordering is identical whichever
//! store is configured.
//!
//! # Ordering
//!
//! 1. Score, descending.
//! 2. `source.timestamp`, most recent first.
//! 3. Entry id, ascending (keeps results deterministic).

use std::cmp::Ordering;

use crate::embedding::similarity_score;
use crate::models::KnowledgeEntry;
use crate::store::{IndexFilter, SearchHit};

/// Score every entry that passes `filter` against `vector` and return the
/// best `top_k`, ranked.
pub fn score_entries<'a, I>(
    vector: &[f32],
    entries: I,
    top_k: usize,
    filter: &IndexFilter,
) -> Vec<SearchHit>
where
    I: IntoIterator<Item = &'a KnowledgeEntry>,
{
    let hits = entries
        .into_iter()
        .filter(|e| filter.matches(e))
        .map(|e| SearchHit {
            score: similarity_score(vector, &e.vector),
            entry: e.clone(),
        })
        .collect();
    rank_hits(hits, top_k)
}

/// Sort hits by score, then recency, then id, and keep the first `top_k`.
pub fn rank_hits(mut hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.entry.source.timestamp.cmp(&a.entry.source.timestamp))
            .then(a.entry.id.cmp(&b.entry.id))
    });
    hits.truncate(top_k);
    hits
}

/// Outcome of applying the relevance threshold to ranked hits.
#[derive(Debug, Clone)]
pub struct Thresholded {
    /// Best score among all candidates, before thresholding.
    pub top_score: Option<f32>,
    /// Hits at or above the threshold, still ranked.
    pub relevant: Vec<SearchHit>,
}

/// Drop hits scoring below `threshold`, remembering the best raw score.
pub fn apply_threshold(hits: Vec<SearchHit>, threshold: f32) -> Thresholded {
    let top_score = hits
        .iter()
        .map(|h| h.score)
        .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));
    let relevant = hits.into_iter().filter(|h| h.score >= threshold).collect();
    Thresholded {
        top_score,
        relevant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Classification, EntryType, SourceMetadata, VerificationStatus,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn entry(id: &str, vector: Vec<f32>, minutes: i64) -> KnowledgeEntry {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        KnowledgeEntry {
            id: id.to_string(),
            content: id.to_string(),
            vector,
            entry_type: EntryType::ChatLogDerived,
            classification: Classification::default(),
            verification_status: VerificationStatus::Draft,
            source: SourceMetadata::at(base + Duration::minutes(minutes)),
            ai_suggestion: None,
            created_at: base,
            updated_at: base,
            deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn test_rank_by_score_desc() {
        let entries = vec![
            entry("far", vec![0.0, 1.0], 0),
            entry("near", vec![1.0, 0.1], 0),
            entry("exact", vec![1.0, 0.0], 0),
        ];
        let hits = score_entries(&[1.0, 0.0], &entries, 3, &IndexFilter::default());
        let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near", "far"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_broken_by_recency() {
        let entries = vec![
            entry("old", vec![1.0, 0.0], 0),
            entry("new", vec![1.0, 0.0], 30),
        ];
        let hits = score_entries(&[1.0, 0.0], &entries, 2, &IndexFilter::default());
        assert_eq!(hits[0].entry.id, "new");
        assert_eq!(hits[1].entry.id, "old");
    }

    #[test]
    fn test_filter_excludes_deleted() {
        let mut gone = entry("gone", vec![1.0, 0.0], 0);
        gone.deleted = true;
        let entries = vec![gone, entry("kept", vec![0.5, 0.5], 0)];
        let hits = score_entries(&[1.0, 0.0], &entries, 3, &IndexFilter::active());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, "kept");
    }

    #[test]
    fn test_top_k_truncates() {
        let entries: Vec<KnowledgeEntry> = (0..10)
            .map(|i| entry(&format!("e{}", i), vec![1.0, i as f32 * 0.1], 0))
            .collect();
        let hits = score_entries(&[1.0, 0.0], &entries, 3, &IndexFilter::default());
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_threshold_keeps_top_score_of_discarded() {
        let entries = vec![entry("weak", vec![1.0, 1.5], 0)];
        let hits = score_entries(&[1.0, 0.0], &entries, 3, &IndexFilter::default());
        let out = apply_threshold(hits, 0.7);
        assert!(out.relevant.is_empty());
        let top = out.top_score.unwrap();
        assert!(top > 0.0 && top < 0.7);
    }

    #[test]
    fn test_threshold_on_empty() {
        let out = apply_threshold(Vec::new(), 0.7);
        assert!(out.top_score.is_none());
        assert!(out.relevant.is_empty());
    }
}
