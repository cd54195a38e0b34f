//! SQLite-backed [`FactStore`] implementation.
//!
//! One row per chunk in the `chunks` table; the UNIQUE constraint on
//! (`vehicle_key`, `content_id`, `chunk_type`) is what makes concurrent stub
//! creation safe across processes. `sources` and `data` are stored as JSON
//! text.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::{Chunk, ChunkKey, ChunkType, QaStatus, TrustStatus};

use super::{new_stub, reset_to_stub, ChunkUpdate, FactStore, QaRunSummary, TrustStats};

/// SQLite implementation of the [`FactStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_row(&self, chunk: &Chunk) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, vehicle_key, content_id, chunk_type,
                                title, content_text, data, sources, source_confidence,
                                qa_status, qa_notes, qa_pass_count, last_qa_reviewed_at,
                                verified_status, verified_at, failed_at, promotion_count,
                                regeneration_attempts, regenerated_at,
                                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.vehicle_key)
        .bind(&chunk.content_id)
        .bind(chunk.chunk_type.as_str())
        .bind(&chunk.title)
        .bind(&chunk.content_text)
        .bind(data_to_column(&chunk.data))
        .bind(serde_json::to_string(&chunk.sources).unwrap_or_else(|_| "[]".to_string()))
        .bind(chunk.source_confidence)
        .bind(chunk.qa_status.as_str())
        .bind(&chunk.qa_notes)
        .bind(chunk.qa_pass_count)
        .bind(chunk.last_qa_reviewed_at)
        .bind(chunk.verified_status.as_str())
        .bind(chunk.verified_at)
        .bind(chunk.failed_at)
        .bind(chunk.promotion_count)
        .bind(chunk.regeneration_attempts)
        .bind(chunk.regenerated_at)
        .bind(chunk.created_at)
        .bind(chunk.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_row(&self, chunk: &Chunk) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE chunks SET
                title = ?, content_text = ?, data = ?, sources = ?, source_confidence = ?,
                qa_status = ?, qa_notes = ?, qa_pass_count = ?, last_qa_reviewed_at = ?,
                verified_status = ?, verified_at = ?, failed_at = ?, promotion_count = ?,
                regeneration_attempts = ?, regenerated_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&chunk.title)
        .bind(&chunk.content_text)
        .bind(data_to_column(&chunk.data))
        .bind(serde_json::to_string(&chunk.sources).unwrap_or_else(|_| "[]".to_string()))
        .bind(chunk.source_confidence)
        .bind(chunk.qa_status.as_str())
        .bind(&chunk.qa_notes)
        .bind(chunk.qa_pass_count)
        .bind(chunk.last_qa_reviewed_at)
        .bind(chunk.verified_status.as_str())
        .bind(chunk.verified_at)
        .bind(chunk.failed_at)
        .bind(chunk.promotion_count)
        .bind(chunk.regeneration_attempts)
        .bind(chunk.regenerated_at)
        .bind(chunk.updated_at)
        .bind(&chunk.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// NULL for a null payload so `is_stub` can distinguish "never generated"
/// from an empty object.
fn data_to_column(data: &serde_json::Value) -> Option<String> {
    if data.is_null() {
        None
    } else {
        Some(data.to_string())
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk, StoreError> {
    let chunk_type_str: String = row.get("chunk_type");
    let chunk_type = ChunkType::parse(&chunk_type_str)
        .ok_or_else(|| StoreError::Unavailable(format!("unknown chunk_type: {}", chunk_type_str)))?;

    let qa_status_str: String = row.get("qa_status");
    let qa_status = QaStatus::parse(&qa_status_str)
        .ok_or_else(|| StoreError::Unavailable(format!("unknown qa_status: {}", qa_status_str)))?;

    let verified_str: String = row.get("verified_status");
    let verified_status = TrustStatus::parse(&verified_str).ok_or_else(|| {
        StoreError::Unavailable(format!("unknown verified_status: {}", verified_str))
    })?;

    let data: Option<String> = row.get("data");
    let data = match data {
        Some(text) => serde_json::from_str(&text).unwrap_or(serde_json::Value::Null),
        None => serde_json::Value::Null,
    };

    let sources_text: String = row.get("sources");
    let sources: Vec<String> = serde_json::from_str(&sources_text).unwrap_or_default();

    Ok(Chunk {
        id: row.get("id"),
        vehicle_key: row.get("vehicle_key"),
        content_id: row.get("content_id"),
        chunk_type,
        title: row.get("title"),
        content_text: row.get("content_text"),
        data,
        sources,
        source_confidence: row.get("source_confidence"),
        qa_status,
        qa_notes: row.get("qa_notes"),
        qa_pass_count: row.get("qa_pass_count"),
        last_qa_reviewed_at: row.get("last_qa_reviewed_at"),
        verified_status,
        verified_at: row.get("verified_at"),
        failed_at: row.get("failed_at"),
        promotion_count: row.get("promotion_count"),
        regeneration_attempts: row.get("regeneration_attempts"),
        regenerated_at: row.get("regenerated_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const SELECT_CHUNK: &str = r#"
    SELECT id, vehicle_key, content_id, chunk_type,
           title, content_text, data, sources, source_confidence,
           qa_status, qa_notes, qa_pass_count, last_qa_reviewed_at,
           verified_status, verified_at, failed_at, promotion_count,
           regeneration_attempts, regenerated_at, created_at, updated_at
    FROM chunks
"#;

#[async_trait]
impl FactStore for SqliteStore {
    async fn get(&self, key: &ChunkKey) -> Result<Option<Chunk>, StoreError> {
        let row = sqlx::query(&format!(
            "{} WHERE vehicle_key = ? AND content_id = ? AND chunk_type = ?",
            SELECT_CHUNK
        ))
        .bind(&key.vehicle_key)
        .bind(&key.content_id)
        .bind(key.chunk_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(chunk_from_row).transpose()
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_CHUNK))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(chunk_from_row).transpose()
    }

    async fn upsert_stub(&self, key: &ChunkKey, title: &str) -> Result<Chunk, StoreError> {
        let stub = new_stub(key, title, Utc::now().timestamp());

        match self.insert_row(&stub).await {
            Ok(()) => Ok(stub),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Lost the race (or the row predates us). Re-read the winner;
                // only a banned row may be reset in place.
                let existing = self
                    .get(key)
                    .await?
                    .ok_or_else(|| StoreError::Unavailable("row vanished after conflict".into()))?;
                if existing.verified_status != TrustStatus::Banned {
                    return Err(StoreError::Conflict(key.clone()));
                }
                let reset = reset_to_stub(existing, Utc::now().timestamp());
                self.write_row(&reset).await?;
                Ok(reset)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, id: &str, update: ChunkUpdate) -> Result<Chunk, StoreError> {
        let current = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let updated = update.apply_to(current, Utc::now().timestamp());
        self.write_row(&updated).await?;
        Ok(updated)
    }

    async fn due_for_review(&self, cutoff: i64, limit: i64) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE verified_status IN ('candidate', 'verified')
              AND (last_qa_reviewed_at IS NULL OR last_qa_reviewed_at < ?)
            ORDER BY COALESCE(last_qa_reviewed_at, 0) ASC
            LIMIT ?"#,
            SELECT_CHUNK
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chunk_from_row).collect()
    }

    async fn failed_repairable(&self, cap: i64, limit: i64) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE qa_status = 'fail'
              AND verified_status != 'banned'
              AND regeneration_attempts <= ?
            ORDER BY COALESCE(failed_at, 0) ASC
            LIMIT ?"#,
            SELECT_CHUNK
        ))
        .bind(cap)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chunk_from_row).collect()
    }

    async fn record_qa_run(&self, run: &QaRunSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO qa_runs (id, started_at, finished_at, examined, passed, failed, repaired, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.examined)
        .bind(run.passed)
        .bind(run.failed)
        .bind(run.repaired)
        .bind(&run.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_qa_runs(&self, limit: i64) -> Result<Vec<QaRunSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, started_at, finished_at, examined, passed, failed, repaired, notes
            FROM qa_runs
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| QaRunSummary {
                id: row.get("id"),
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
                examined: row.get("examined"),
                passed: row.get("passed"),
                failed: row.get("failed"),
                repaired: row.get("repaired"),
                notes: row.get("notes"),
            })
            .collect())
    }

    async fn trust_stats(&self, created_since: i64) -> Result<TrustStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(verified_status = 'verified') AS verified,
                SUM(verified_status = 'candidate') AS candidate,
                SUM(verified_status = 'unverified') AS unverified,
                SUM(verified_status = 'banned') AS banned,
                SUM(qa_status = 'pass') AS qa_pass,
                SUM(qa_status = 'fail') AS qa_fail,
                SUM(qa_status = 'pending') AS qa_pending,
                SUM(created_at >= ?) AS created_since
            FROM chunks
            "#,
        )
        .bind(created_since)
        .fetch_one(&self.pool)
        .await?;

        Ok(TrustStats {
            total: row.get("total"),
            verified: row.get::<Option<i64>, _>("verified").unwrap_or(0),
            candidate: row.get::<Option<i64>, _>("candidate").unwrap_or(0),
            unverified: row.get::<Option<i64>, _>("unverified").unwrap_or(0),
            banned: row.get::<Option<i64>, _>("banned").unwrap_or(0),
            qa_pass: row.get::<Option<i64>, _>("qa_pass").unwrap_or(0),
            qa_fail: row.get::<Option<i64>, _>("qa_fail").unwrap_or(0),
            qa_pending: row.get::<Option<i64>, _>("qa_pending").unwrap_or(0),
            created_since: row.get::<Option<i64>, _>("created_since").unwrap_or(0),
        })
    }
}
