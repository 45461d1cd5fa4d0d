//! Idempotent schema setup.
//!
//! One database holds the knowledge index and the two append-only logs.
//! Timestamps are Unix milliseconds; vectors are little-endian f32 BLOBs;
//! classifications and source metadata are JSON text.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_entries (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            entry_type TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT '',
            tags_json TEXT NOT NULL DEFAULT '[]',
            summary TEXT NOT NULL DEFAULT '',
            verification_status TEXT NOT NULL,
            source_json TEXT NOT NULL,
            source_ts INTEGER NOT NULL,
            ai_suggestion_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS correction_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            entry_id TEXT,
            ai_prediction_json TEXT NOT NULL,
            human_correction_json TEXT NOT NULL,
            source_text TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            query_text TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            top_similarity_score REAL,
            result_count INTEGER NOT NULL,
            verified_only_filter INTEGER NOT NULL,
            failed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_created_at ON knowledge_entries(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_deleted ON knowledge_entries(deleted)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_log_timestamp ON query_log(timestamp DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
