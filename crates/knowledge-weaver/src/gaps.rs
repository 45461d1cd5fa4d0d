//! Knowledge gap backlog.

use std::sync::Arc;

use chrono::{Duration, Utc};

use knowledge_weaver_core::gaps::aggregate_gaps;
use knowledge_weaver_core::models::KnowledgeGap;
use knowledge_weaver_core::store::{EventLog, TimeRange};
use knowledge_weaver_core::{Result, WeaverError};

/// Reads the query log and reports recurring unanswered questions.
///
/// Gaps are derived on every call; there is no stored gap state. A gap is
/// "resolved" by ingesting a `gap_resolution` entry that answers it, after
/// which new queries stop scoring below the threshold.
pub struct GapTracker {
    log: Arc<dyn EventLog>,
    gap_threshold: f32,
}

impl GapTracker {
    pub fn new(log: Arc<dyn EventLog>, gap_threshold: f32) -> Self {
        Self { log, gap_threshold }
    }

    /// Gaps seen in the last `window_days` days. A window reaching past the
    /// representable calendar covers the whole log.
    pub async fn list_gaps(&self, window_days: i64, limit: usize) -> Result<Vec<KnowledgeGap>> {
        let range = window(window_days)?;
        let entries = self.log.queries(&range, None).await?;
        Ok(aggregate_gaps(&entries, self.gap_threshold, limit))
    }
}

fn window(days: i64) -> Result<TimeRange> {
    if days < 0 {
        return Err(WeaverError::InvalidInput(format!(
            "gap window must not be negative, got {} days",
            days
        )));
    }
    Ok(Duration::try_days(days)
        .and_then(|span| Utc::now().checked_sub_signed(span))
        .map(TimeRange::since)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_rejects_negative_days() {
        assert!(matches!(window(-1), Err(WeaverError::InvalidInput(_))));
    }

    #[test]
    fn test_huge_window_is_unbounded() {
        let range = window(i64::MAX).unwrap();
        assert!(range.since.is_none());
        let range = window(100_000_000).unwrap();
        assert!(range.since.is_none());
    }

    #[test]
    fn test_normal_window_has_lower_bound() {
        let since = window(7).unwrap().since.unwrap();
        let age = Utc::now() - since;
        assert!(age >= Duration::days(7) && age < Duration::days(8));
    }
}
