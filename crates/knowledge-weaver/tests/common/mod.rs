//! Deterministic in-process providers for engine tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use knowledge_weaver::config::Config;
use knowledge_weaver::engine::{Components, Weaver};
use knowledge_weaver::sqlite_store::{SqliteEventLog, SqliteIndex};
use knowledge_weaver::{db, migrate};
use knowledge_weaver_core::embedding::{AnalysisProvider, EmbeddingProvider};
use knowledge_weaver_core::models::{ChatMessage, Classification, CorrectionEvent, QueryLogEntry};
use knowledge_weaver_core::store::memory::{InMemoryEventLog, InMemoryIndex};
use knowledge_weaver_core::store::{EventLog, TimeRange};
use knowledge_weaver_core::{Result, WeaverError};

pub const DIMS: usize = 256;

/// Bag-of-words hashing embedder: texts sharing words point the same way.
pub struct HashEmbedder;

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let slot = (fnv1a(&word.to_lowercase()) % DIMS as u64) as usize;
            vector[slot] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// Classifies everything as `general` unless it was shown examples, in which
/// case it copies the closest example's human category. Text containing
/// `malformed` is rejected permanently.
#[derive(Default)]
pub struct MimicAnalyzer {
    pub calls: AtomicUsize,
}

impl MimicAnalyzer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for MimicAnalyzer {
    async fn analyze(&self, text: &str, few_shot: &[CorrectionEvent]) -> Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("malformed") {
            return Err(WeaverError::permanent("model reply was not valid JSON"));
        }
        let category = few_shot
            .first()
            .map(|example| example.human_correction.category.clone())
            .unwrap_or_else(|| "general".to_string());
        let first_word = text.split_whitespace().next().unwrap_or_default().to_lowercase();
        let summary: String = text.chars().take(40).collect();
        Ok(Classification::new(category, [first_word], summary))
    }
}

/// Embedding backend that rejects every request.
pub struct BrokenEmbedder;

#[async_trait]
impl EmbeddingProvider for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(WeaverError::permanent("401 Unauthorized"))
    }
}

/// Event log whose correction appends fail; everything else works.
#[derive(Default)]
pub struct CorrectionsDownLog {
    inner: InMemoryEventLog,
}

#[async_trait]
impl EventLog for CorrectionsDownLog {
    async fn append_correction(&self, _event: &CorrectionEvent) -> Result<()> {
        Err(WeaverError::Index("correction log unavailable".into()))
    }

    async fn corrections(&self, limit: Option<usize>) -> Result<Vec<CorrectionEvent>> {
        self.inner.corrections(limit).await
    }

    async fn append_query(&self, entry: &QueryLogEntry) -> Result<()> {
        self.inner.append_query(entry).await
    }

    async fn queries(&self, range: &TimeRange, limit: Option<usize>) -> Result<Vec<QueryLogEntry>> {
        self.inner.queries(range, limit).await
    }
}

pub fn weaver_with(
    embedder: Arc<dyn EmbeddingProvider>,
    log: Arc<dyn EventLog>,
) -> Weaver {
    let components = Components {
        index: Arc::new(InMemoryIndex::new()),
        log,
        embedder,
        analyzer: Arc::new(MimicAnalyzer::default()),
    };
    Weaver::with_components(Config::with_db_path("unused.sqlite"), components)
}

pub fn memory_weaver() -> (Weaver, Arc<MimicAnalyzer>) {
    let analyzer = Arc::new(MimicAnalyzer::default());
    let components = Components {
        index: Arc::new(InMemoryIndex::new()),
        log: Arc::new(InMemoryEventLog::new()),
        embedder: Arc::new(HashEmbedder),
        analyzer: analyzer.clone(),
    };
    let weaver = Weaver::with_components(Config::with_db_path("unused.sqlite"), components);
    (weaver, analyzer)
}

pub async fn sqlite_weaver(db_path: &Path) -> Weaver {
    let config = Config::with_db_path(db_path);
    let pool = db::connect(&config).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    let components = Components {
        index: Arc::new(SqliteIndex::new(pool.clone())),
        log: Arc::new(SqliteEventLog::new(pool)),
        embedder: Arc::new(HashEmbedder),
        analyzer: Arc::new(MimicAnalyzer::default()),
    };
    Weaver::with_components(config, components)
}

pub fn message(id: &str, content: &str, minutes_ago: i64) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        timestamp: ago(minutes_ago),
        sender: "agent".to_string(),
        content: content.to_string(),
        platform: Some("slack".to_string()),
        thread_id: None,
    }
}

fn ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}
