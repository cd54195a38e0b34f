//! Storage abstraction for the fact store.
//!
//! The [`FactStore`] trait defines every storage operation the lazy cache
//! controller, QA pipeline, and scheduler need, enabling pluggable backends
//! (SQLite for production, in-memory for tests).
//!
//! All writes are atomic per row and bump `updated_at`; no cross-row
//! transactions are required. The uniqueness constraint on
//! (`vehicle_key`, `content_id`, `chunk_type`) is the single source of truth
//! for "only one generation per key" — in-memory task tracking upstream is
//! an optimization, not a correctness guarantee.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get`](FactStore::get) | Look up a chunk by its key triple |
//! | [`get_by_id`](FactStore::get_by_id) | Look up a chunk by row id |
//! | [`upsert_stub`](FactStore::upsert_stub) | Create a quarantined stub; `Conflict` if a live row exists |
//! | [`update`](FactStore::update) | Partial update of one row |
//! | [`due_for_review`](FactStore::due_for_review) | Candidate/verified rows past the review interval |
//! | [`failed_repairable`](FactStore::failed_repairable) | Failed rows still under the regeneration cap |
//! | [`record_qa_run`](FactStore::record_qa_run) | Persist one immutable run summary |
//! | [`recent_qa_runs`](FactStore::recent_qa_runs) | Run history, newest first |
//! | [`trust_stats`](FactStore::trust_stats) | Counts by trust level and QA status |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Chunk, ChunkKey, QaStatus, TrustStatus};

/// Partial update of a chunk row. `None` fields are left untouched;
/// `updated_at` is always bumped.
///
/// Identity fields are deliberately absent: (`vehicle_key`, `content_id`,
/// `chunk_type`) are immutable post-creation.
#[derive(Debug, Clone, Default)]
pub struct ChunkUpdate {
    pub title: Option<String>,
    pub content_text: Option<String>,
    pub data: Option<serde_json::Value>,
    pub sources: Option<Vec<String>>,
    pub source_confidence: Option<f64>,

    pub qa_status: Option<QaStatus>,
    pub qa_notes: Option<String>,
    pub qa_pass_count: Option<i64>,
    pub last_qa_reviewed_at: Option<i64>,

    pub verified_status: Option<TrustStatus>,
    pub verified_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub promotion_count: Option<i64>,

    pub regeneration_attempts: Option<i64>,
    pub regenerated_at: Option<i64>,
}

impl ChunkUpdate {
    /// Apply this update to an owned chunk, returning the new row image.
    /// Shared by both backends so they cannot drift.
    pub(crate) fn apply_to(&self, mut chunk: Chunk, now: i64) -> Chunk {
        if let Some(v) = &self.title {
            chunk.title = v.clone();
        }
        if let Some(v) = &self.content_text {
            chunk.content_text = v.clone();
        }
        if let Some(v) = &self.data {
            chunk.data = v.clone();
        }
        if let Some(v) = &self.sources {
            chunk.sources = v.clone();
        }
        if let Some(v) = self.source_confidence {
            chunk.source_confidence = v;
        }
        if let Some(v) = self.qa_status {
            chunk.qa_status = v;
        }
        if let Some(v) = &self.qa_notes {
            chunk.qa_notes = Some(v.clone());
        }
        if let Some(v) = self.qa_pass_count {
            chunk.qa_pass_count = v;
        }
        if let Some(v) = self.last_qa_reviewed_at {
            chunk.last_qa_reviewed_at = Some(v);
        }
        if let Some(v) = self.verified_status {
            chunk.verified_status = v;
        }
        if let Some(v) = self.verified_at {
            chunk.verified_at = Some(v);
        }
        if let Some(v) = self.failed_at {
            chunk.failed_at = Some(v);
        }
        if let Some(v) = self.promotion_count {
            chunk.promotion_count = v;
        }
        if let Some(v) = self.regeneration_attempts {
            chunk.regeneration_attempts = v;
        }
        if let Some(v) = self.regenerated_at {
            chunk.regenerated_at = Some(v);
        }
        chunk.updated_at = now;
        chunk
    }
}

/// One immutable summary row per scheduler run.
#[derive(Debug, Clone)]
pub struct QaRunSummary {
    pub id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub examined: i64,
    pub passed: i64,
    pub failed: i64,
    pub repaired: i64,
    pub notes: String,
}

/// Counts by trust level and QA status for the stats report.
#[derive(Debug, Clone, Default)]
pub struct TrustStats {
    pub total: i64,
    pub verified: i64,
    pub candidate: i64,
    pub unverified: i64,
    pub banned: i64,
    pub qa_pass: i64,
    pub qa_fail: i64,
    pub qa_pending: i64,
    pub created_since: i64,
}

/// Abstract fact store.
///
/// Implementations must be `Send + Sync`; all operations are async via
/// `async-trait`. The in-memory backend returns immediately-ready futures.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Look up the live chunk for a key triple.
    async fn get(&self, key: &ChunkKey) -> Result<Option<Chunk>, StoreError>;

    /// Look up a chunk by its row id.
    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError>;

    /// Atomically create a quarantined stub for a key.
    ///
    /// Fails with [`StoreError::Conflict`] when a live (non-banned) row
    /// already exists — the caller must re-read the winner instead of
    /// re-creating. A banned row is reset to a fresh stub in place (the
    /// operator-override path); its row id and audit counters survive.
    async fn upsert_stub(&self, key: &ChunkKey, title: &str) -> Result<Chunk, StoreError>;

    /// Partially update one row, bumping `updated_at`. Returns the new row.
    async fn update(&self, id: &str, update: ChunkUpdate) -> Result<Chunk, StoreError>;

    /// Candidate/verified chunks whose `last_qa_reviewed_at` is older than
    /// `cutoff` (or null), oldest review first. Never returns rows still in
    /// first-time generation: those are `unverified`/`pending`.
    async fn due_for_review(&self, cutoff: i64, limit: i64) -> Result<Vec<Chunk>, StoreError>;

    /// Failed, non-banned chunks still within the regeneration cap.
    async fn failed_repairable(&self, cap: i64, limit: i64) -> Result<Vec<Chunk>, StoreError>;

    /// Persist one immutable run summary.
    async fn record_qa_run(&self, run: &QaRunSummary) -> Result<(), StoreError>;

    /// Run history, newest first.
    async fn recent_qa_runs(&self, limit: i64) -> Result<Vec<QaRunSummary>, StoreError>;

    /// Counts by trust level and QA status; `created_since` counts rows
    /// created at or after the given timestamp.
    async fn trust_stats(&self, created_since: i64) -> Result<TrustStats, StoreError>;
}

/// Field values for a freshly created stub, shared by both backends.
pub(crate) fn new_stub(key: &ChunkKey, title: &str, now: i64) -> Chunk {
    Chunk {
        id: uuid::Uuid::new_v4().to_string(),
        vehicle_key: key.vehicle_key.clone(),
        content_id: key.content_id.clone(),
        chunk_type: key.chunk_type,
        title: title.to_string(),
        content_text: String::new(),
        data: serde_json::Value::Null,
        sources: Vec::new(),
        source_confidence: 0.0,
        qa_status: QaStatus::Pending,
        qa_notes: None,
        qa_pass_count: 0,
        last_qa_reviewed_at: None,
        verified_status: TrustStatus::Unverified,
        verified_at: None,
        failed_at: None,
        promotion_count: 0,
        regeneration_attempts: 0,
        regenerated_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Reset a banned row back to stub state in place, preserving identity and
/// audit counters. Used only by the operator-override path.
pub(crate) fn reset_to_stub(mut chunk: Chunk, now: i64) -> Chunk {
    chunk.content_text = String::new();
    chunk.data = serde_json::Value::Null;
    chunk.sources = Vec::new();
    chunk.source_confidence = 0.0;
    chunk.qa_status = QaStatus::Pending;
    chunk.qa_notes = Some("operator override: reset from banned".to_string());
    chunk.verified_status = TrustStatus::Unverified;
    chunk.regeneration_attempts = 0;
    chunk.regenerated_at = None;
    chunk.updated_at = now;
    chunk
}
