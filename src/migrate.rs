//! Idempotent schema creation for the fact store.
//!
//! The UNIQUE constraint on (vehicle_key, content_id, chunk_type) is
//! load-bearing: it is what makes concurrent stub creation safe across
//! processes. Everything else is an index.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            vehicle_key TEXT NOT NULL,
            content_id TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            title TEXT NOT NULL,
            content_text TEXT NOT NULL DEFAULT '',
            data TEXT,
            sources TEXT NOT NULL DEFAULT '[]',
            source_confidence REAL NOT NULL DEFAULT 0.0,
            qa_status TEXT NOT NULL DEFAULT 'pending',
            qa_notes TEXT,
            qa_pass_count INTEGER NOT NULL DEFAULT 0,
            last_qa_reviewed_at INTEGER,
            verified_status TEXT NOT NULL DEFAULT 'unverified',
            verified_at INTEGER,
            failed_at INTEGER,
            promotion_count INTEGER NOT NULL DEFAULT 0,
            regeneration_attempts INTEGER NOT NULL DEFAULT 0,
            regenerated_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(vehicle_key, content_id, chunk_type)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qa_runs (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            examined INTEGER NOT NULL,
            passed INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            repaired INTEGER NOT NULL,
            notes TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_review
         ON chunks(verified_status, last_qa_reviewed_at)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_qa_status ON chunks(qa_status)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_vehicle ON chunks(vehicle_key)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_qa_runs_started ON qa_runs(started_at DESC)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
