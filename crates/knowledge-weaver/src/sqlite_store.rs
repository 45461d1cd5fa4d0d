//! SQLite-backed [`VectorIndex`] and [`EventLog`] implementations.
//!
//! Vector search loads the candidate rows allowed by the deletion filter and
//! ranks them in process with the same brute-force cosine scan the in-memory
//! store uses, so both backends order results identically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use knowledge_weaver_core::embedding::{blob_to_vec, vec_to_blob};
use knowledge_weaver_core::models::{
    Classification, CorrectionEvent, KnowledgeEntry, QueryLogEntry, SourceMetadata,
};
use knowledge_weaver_core::search::score_entries;
use knowledge_weaver_core::store::{EventLog, IndexFilter, SearchHit, TimeRange, VectorIndex};
use knowledge_weaver_core::{Result, WeaverError};

const ENTRY_COLUMNS: &str = "id, content, embedding, entry_type, category, tags_json, summary, \
     verification_status, source_json, ai_suggestion_json, created_at, updated_at, deleted, \
     deleted_at";

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| WeaverError::Index(format!("timestamp out of range: {}", ms)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(WeaverError::index)
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(WeaverError::index)
}

fn row_to_entry(row: &SqliteRow) -> Result<KnowledgeEntry> {
    let get_str = |col: &str| -> Result<String> { row.try_get(col).map_err(WeaverError::index) };

    let blob: Vec<u8> = row.try_get("embedding").map_err(WeaverError::index)?;
    let ai_json: Option<String> = row.try_get("ai_suggestion_json").map_err(WeaverError::index)?;
    let deleted: i64 = row.try_get("deleted").map_err(WeaverError::index)?;
    let deleted_at: Option<i64> = row.try_get("deleted_at").map_err(WeaverError::index)?;
    let created_at: i64 = row.try_get("created_at").map_err(WeaverError::index)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(WeaverError::index)?;

    Ok(KnowledgeEntry {
        id: get_str("id")?,
        content: get_str("content")?,
        vector: blob_to_vec(&blob),
        entry_type: get_str("entry_type")?.parse()?,
        classification: Classification {
            category: get_str("category")?,
            tags: from_json(&get_str("tags_json")?)?,
            summary: get_str("summary")?,
        },
        verification_status: get_str("verification_status")?.parse()?,
        source: from_json::<SourceMetadata>(&get_str("source_json")?)?,
        ai_suggestion: ai_json.as_deref().map(from_json::<Classification>).transpose()?,
        created_at: from_ms(created_at)?,
        updated_at: from_ms(updated_at)?,
        deleted: deleted != 0,
        deleted_at: deleted_at.map(from_ms).transpose()?,
    })
}

fn deleted_clause(filter: &IndexFilter) -> &'static str {
    match filter.deleted {
        Some(true) => "WHERE deleted = 1",
        Some(false) => "WHERE deleted = 0",
        None => "",
    }
}

/// SQLite implementation of [`VectorIndex`] over the `knowledge_entries` table.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load(&self, filter: &IndexFilter) -> Result<Vec<KnowledgeEntry>> {
        let sql = format!(
            "SELECT {} FROM knowledge_entries {}",
            ENTRY_COLUMNS,
            deleted_clause(filter)
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(WeaverError::index)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = row_to_entry(row)?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, entry: &KnowledgeEntry) -> Result<()> {
        let ai_json = entry.ai_suggestion.as_ref().map(to_json).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO knowledge_entries (id, content, embedding, entry_type, category,
                                           tags_json, summary, verification_status,
                                           source_json, source_ts, ai_suggestion_json,
                                           created_at, updated_at, deleted, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                embedding = excluded.embedding,
                entry_type = excluded.entry_type,
                category = excluded.category,
                tags_json = excluded.tags_json,
                summary = excluded.summary,
                verification_status = excluded.verification_status,
                source_json = excluded.source_json,
                source_ts = excluded.source_ts,
                ai_suggestion_json = excluded.ai_suggestion_json,
                updated_at = excluded.updated_at,
                deleted = excluded.deleted,
                deleted_at = excluded.deleted_at
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.content)
        .bind(vec_to_blob(&entry.vector))
        .bind(entry.entry_type.as_str())
        .bind(&entry.classification.category)
        .bind(to_json(&entry.classification.tags)?)
        .bind(&entry.classification.summary)
        .bind(entry.verification_status.as_str())
        .bind(to_json(&entry.source)?)
        .bind(to_ms(entry.source.timestamp))
        .bind(ai_json)
        .bind(to_ms(entry.created_at))
        .bind(to_ms(entry.updated_at))
        .bind(entry.deleted as i64)
        .bind(entry.deleted_at.map(to_ms))
        .execute(&self.pool)
        .await
        .map_err(WeaverError::index)?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        let sql = format!("SELECT {} FROM knowledge_entries WHERE id = ?", ENTRY_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(WeaverError::index)?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<SearchHit>> {
        let candidates = self.load(filter).await?;
        Ok(score_entries(vector, &candidates, top_k, filter))
    }

    async fn list(&self, filter: &IndexFilter, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let mut entries = self.load(filter).await?;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn count(&self, filter: &IndexFilter) -> Result<usize> {
        if filter.statuses.is_some() {
            return Ok(self.load(filter).await?.len());
        }
        let sql = format!(
            "SELECT COUNT(*) FROM knowledge_entries {}",
            deleted_clause(filter)
        );
        let n: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(WeaverError::index)?;
        Ok(n as usize)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge_entries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(WeaverError::index)?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM knowledge_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(WeaverError::index)?;
        Ok(())
    }
}

/// SQLite implementation of [`EventLog`] over the `correction_events` and
/// `query_log` tables. Rows are only ever inserted.
pub struct SqliteEventLog {
    pool: SqlitePool,
}

impl SqliteEventLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|n| n as i64).unwrap_or(-1)
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append_correction(&self, event: &CorrectionEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO correction_events (id, entry_id, ai_prediction_json,
                                           human_correction_json, source_text, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.entry_id)
        .bind(to_json(&event.ai_prediction)?)
        .bind(to_json(&event.human_correction)?)
        .bind(&event.source_text)
        .bind(to_ms(event.timestamp))
        .execute(&self.pool)
        .await
        .map_err(WeaverError::index)?;
        Ok(())
    }

    async fn corrections(&self, limit: Option<usize>) -> Result<Vec<CorrectionEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, entry_id, ai_prediction_json, human_correction_json, source_text, timestamp
            FROM correction_events
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(WeaverError::index)?;

        rows.iter()
            .map(|row| {
                let ai: String = row.try_get("ai_prediction_json").map_err(WeaverError::index)?;
                let human: String = row
                    .try_get("human_correction_json")
                    .map_err(WeaverError::index)?;
                let ts: i64 = row.try_get("timestamp").map_err(WeaverError::index)?;
                Ok(CorrectionEvent {
                    id: row.try_get("id").map_err(WeaverError::index)?,
                    entry_id: row.try_get("entry_id").map_err(WeaverError::index)?,
                    ai_prediction: from_json(&ai)?,
                    human_correction: from_json(&human)?,
                    source_text: row.try_get("source_text").map_err(WeaverError::index)?,
                    timestamp: from_ms(ts)?,
                })
            })
            .collect()
    }

    async fn append_query(&self, entry: &QueryLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_log (id, query_text, timestamp, top_similarity_score,
                                   result_count, verified_only_filter, failed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.query_text)
        .bind(to_ms(entry.timestamp))
        .bind(entry.top_similarity_score.map(f64::from))
        .bind(entry.result_count as i64)
        .bind(entry.verified_only_filter as i64)
        .bind(entry.failed as i64)
        .execute(&self.pool)
        .await
        .map_err(WeaverError::index)?;
        Ok(())
    }

    async fn queries(
        &self,
        range: &TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<QueryLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, query_text, timestamp, top_similarity_score, result_count,
                   verified_only_filter, failed
            FROM query_log
            WHERE timestamp >= ? AND timestamp <= ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(range.since.map(to_ms).unwrap_or(i64::MIN))
        .bind(range.until.map(to_ms).unwrap_or(i64::MAX))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(WeaverError::index)?;

        rows.iter()
            .map(|row| {
                let ts: i64 = row.try_get("timestamp").map_err(WeaverError::index)?;
                let score: Option<f64> = row
                    .try_get("top_similarity_score")
                    .map_err(WeaverError::index)?;
                let count: i64 = row.try_get("result_count").map_err(WeaverError::index)?;
                let verified: i64 = row
                    .try_get("verified_only_filter")
                    .map_err(WeaverError::index)?;
                let failed: i64 = row.try_get("failed").map_err(WeaverError::index)?;
                Ok(QueryLogEntry {
                    id: row.try_get("id").map_err(WeaverError::index)?,
                    query_text: row.try_get("query_text").map_err(WeaverError::index)?,
                    timestamp: from_ms(ts)?,
                    top_similarity_score: score.map(|s| s as f32),
                    result_count: count.max(0) as usize,
                    verified_only_filter: verified != 0,
                    failed: failed != 0,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use chrono::Duration;
    use knowledge_weaver_core::models::{EntryType, VerificationStatus};

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        let config = Config::with_db_path(dir.path().join("weaver.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        pool
    }

    fn entry(id: &str, vector: Vec<f32>, status: VerificationStatus) -> KnowledgeEntry {
        let now = Utc::now();
        KnowledgeEntry {
            id: id.to_string(),
            content: format!("body {}", id),
            vector,
            entry_type: EntryType::ManualCapture,
            classification: Classification::new("Ops", ["vpn", "network"], "vpn reset"),
            verification_status: status,
            source: SourceMetadata {
                participants: vec!["ana".into()],
                platform: Some("slack".into()),
                source_id: Some("thread-9".into()),
                ..SourceMetadata::at(now)
            },
            ai_suggestion: Some(Classification::new("IT", ["vpn"], "")),
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_entry_survives_storage() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::new(pool(&dir).await);
        let original = entry("e1", vec![0.25, -1.0, 3.5], VerificationStatus::Draft);
        index.upsert(&original).await.unwrap();

        let stored = index.get("e1").await.unwrap().unwrap();
        assert_eq!(stored.vector, original.vector);
        assert_eq!(stored.classification, original.classification);
        assert_eq!(stored.source, original.source);
        assert_eq!(stored.entry_type, EntryType::ManualCapture);
        assert_eq!(stored.ai_suggestion, original.ai_suggestion);
        assert!(index.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_filters_status_and_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::new(pool(&dir).await);
        index
            .upsert(&entry("draft", vec![1.0, 0.0], VerificationStatus::Draft))
            .await
            .unwrap();
        index
            .upsert(&entry("human", vec![0.9, 0.1], VerificationStatus::HumanVerified))
            .await
            .unwrap();
        let mut gone = entry("gone", vec![1.0, 0.0], VerificationStatus::HumanVerified);
        gone.deleted = true;
        gone.deleted_at = Some(Utc::now());
        index.upsert(&gone).await.unwrap();

        let all = index
            .search(&[1.0, 0.0], 3, &IndexFilter::active())
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["draft", "human"]);

        let verified = IndexFilter::active().with_statuses(&[VerificationStatus::HumanVerified]);
        let hits = index.search(&[1.0, 0.0], 3, &verified).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, "human");

        assert_eq!(index.count(&IndexFilter::deleted_only()).await.unwrap(), 1);
        assert_eq!(index.count(&verified).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_event_log_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = SqliteEventLog::new(pool(&dir).await);
        let now = Utc::now();
        for (i, text) in ["first", "second"].iter().enumerate() {
            log.append_correction(&CorrectionEvent {
                id: format!("c{}", i),
                entry_id: None,
                ai_prediction: Classification::new("General", Vec::<String>::new(), ""),
                human_correction: Classification::new("Food", ["lunch"], ""),
                source_text: text.to_string(),
                timestamp: now,
            })
            .await
            .unwrap();
        }
        let events = log.corrections(None).await.unwrap();
        assert_eq!(events[0].source_text, "second");
        assert_eq!(log.corrections(Some(1)).await.unwrap().len(), 1);

        log.append_query(&QueryLogEntry {
            id: "old".into(),
            query_text: "vpn".into(),
            timestamp: now - Duration::days(10),
            top_similarity_score: Some(0.4),
            result_count: 0,
            verified_only_filter: true,
            failed: false,
        })
        .await
        .unwrap();
        log.append_query(&QueryLogEntry {
            id: "new".into(),
            query_text: "vpn".into(),
            timestamp: now,
            top_similarity_score: None,
            result_count: 0,
            verified_only_filter: false,
            failed: true,
        })
        .await
        .unwrap();

        let week = log
            .queries(&TimeRange::since(now - Duration::days(7)), None)
            .await
            .unwrap();
        assert_eq!(week.len(), 1);
        assert!(week[0].failed);
        let all = log.queries(&TimeRange::default(), None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[1].verified_only_filter);
    }
}
