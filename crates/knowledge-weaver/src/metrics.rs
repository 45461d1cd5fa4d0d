//! Dashboard counters and query log access.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use knowledge_weaver_core::gaps::aggregate_gaps;
use knowledge_weaver_core::models::{QueryLogEntry, VerificationStatus};
use knowledge_weaver_core::store::{EventLog, IndexFilter, TimeRange, VectorIndex};
use knowledge_weaver_core::Result;

const DASHBOARD_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    /// Active (not deleted) entries.
    pub total_knowledge: usize,
    /// Active entries a human has verified.
    pub verified_count: usize,
    /// `verified_count / total_knowledge` as a percentage, one decimal.
    pub verified_ratio: f64,
    pub query_volume_7d: usize,
    /// Distinct gap queries in the last seven days.
    pub knowledge_gaps_7d: usize,
}

pub struct Metrics {
    index: Arc<dyn VectorIndex>,
    log: Arc<dyn EventLog>,
    gap_threshold: f32,
}

impl Metrics {
    pub fn new(index: Arc<dyn VectorIndex>, log: Arc<dyn EventLog>, gap_threshold: f32) -> Self {
        Self {
            index,
            log,
            gap_threshold,
        }
    }

    pub async fn dashboard(&self) -> Result<Dashboard> {
        let total_knowledge = self.index.count(&IndexFilter::active()).await?;
        let verified_count = self
            .index
            .count(&IndexFilter::active().with_statuses(&[VerificationStatus::HumanVerified]))
            .await?;
        let verified_ratio = if total_knowledge == 0 {
            0.0
        } else {
            (verified_count as f64 / total_knowledge as f64 * 1000.0).round() / 10.0
        };

        let since = Utc::now() - Duration::days(DASHBOARD_WINDOW_DAYS);
        let recent = self.log.queries(&TimeRange::since(since), None).await?;
        let knowledge_gaps_7d = aggregate_gaps(&recent, self.gap_threshold, usize::MAX).len();

        Ok(Dashboard {
            total_knowledge,
            verified_count,
            verified_ratio,
            query_volume_7d: recent.len(),
            knowledge_gaps_7d,
        })
    }

    /// Query log entries in `[since, until]`, newest first.
    pub async fn query_logs(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<QueryLogEntry>> {
        self.log
            .queries(&TimeRange { since, until }, Some(limit))
            .await
    }
}
