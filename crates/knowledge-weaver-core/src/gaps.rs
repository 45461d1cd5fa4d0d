//! Knowledge gap aggregation over the query log.
//!
//! A query log entry is a *gap signal* when the best candidate scored below
//! the gap threshold or nothing came back at all. Signals are grouped by
//! normalized query text, counted, and ranked so the most frequent and most
//! recent unanswered questions surface first.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{KnowledgeGap, QueryLogEntry};

/// Trim, lowercase, and collapse internal whitespace runs to single spaces.
///
/// ```rust
/// use knowledge_weaver_core::gaps::normalize_query;
///
/// assert_eq!(normalize_query("  Where   is\tthe VPN guide "), "where is the vpn guide");
/// ```
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether a logged query counts towards a knowledge gap.
///
/// Failed invocations say nothing about index coverage and are excluded.
pub fn is_gap_signal(entry: &QueryLogEntry, gap_threshold: f32) -> bool {
    if entry.failed {
        return false;
    }
    entry.result_count == 0 || entry.top_similarity_score.map_or(true, |s| s < gap_threshold)
}

/// Group gap signals by normalized text and rank them.
///
/// Sorted by count descending, then most recent occurrence descending, then
/// query text for a stable order. At most `limit` gaps are returned.
pub fn aggregate_gaps<'a, I>(entries: I, gap_threshold: f32, limit: usize) -> Vec<KnowledgeGap>
where
    I: IntoIterator<Item = &'a QueryLogEntry>,
{
    let mut groups: HashMap<String, (usize, DateTime<Utc>)> = HashMap::new();

    for entry in entries {
        if !is_gap_signal(entry, gap_threshold) {
            continue;
        }
        let key = normalize_query(&entry.query_text);
        if key.is_empty() {
            continue;
        }
        groups
            .entry(key)
            .and_modify(|(count, recent)| {
                *count += 1;
                if entry.timestamp > *recent {
                    *recent = entry.timestamp;
                }
            })
            .or_insert((1, entry.timestamp));
    }

    let mut gaps: Vec<KnowledgeGap> = groups
        .into_iter()
        .map(|(query, (count, most_recent))| KnowledgeGap {
            query,
            count,
            most_recent,
        })
        .collect();

    gaps.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(b.most_recent.cmp(&a.most_recent))
            .then(a.query.cmp(&b.query))
    });
    gaps.truncate(limit);
    gaps
}
