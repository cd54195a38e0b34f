//! In-memory [`FactStore`] implementation for tests.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. Selection
//! queries are brute-force scans; with test-sized data that is fine.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::models::{Chunk, ChunkKey, QaStatus, TrustStatus};

use super::{new_stub, reset_to_stub, ChunkUpdate, FactStore, QaRunSummary, TrustStats};

/// In-memory fact store.
#[derive(Default)]
pub struct MemoryStore {
    chunks: RwLock<HashMap<ChunkKey, Chunk>>,
    runs: RwLock<Vec<QaRunSummary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[async_trait]
impl FactStore for MemoryStore {
    async fn get(&self, key: &ChunkKey) -> Result<Option<Chunk>, StoreError> {
        let chunks = self.chunks.read().unwrap();
        Ok(chunks.get(key).cloned())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Chunk>, StoreError> {
        let chunks = self.chunks.read().unwrap();
        Ok(chunks.values().find(|c| c.id == id).cloned())
    }

    async fn upsert_stub(&self, key: &ChunkKey, title: &str) -> Result<Chunk, StoreError> {
        let mut chunks = self.chunks.write().unwrap();
        if let Some(existing) = chunks.get(key) {
            if existing.verified_status != TrustStatus::Banned {
                return Err(StoreError::Conflict(key.clone()));
            }
            let reset = reset_to_stub(existing.clone(), now_ts());
            chunks.insert(key.clone(), reset.clone());
            return Ok(reset);
        }
        let stub = new_stub(key, title, now_ts());
        chunks.insert(key.clone(), stub.clone());
        Ok(stub)
    }

    async fn update(&self, id: &str, update: ChunkUpdate) -> Result<Chunk, StoreError> {
        let mut chunks = self.chunks.write().unwrap();
        let key = chunks
            .values()
            .find(|c| c.id == id)
            .map(|c| c.key())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let current = chunks.remove(&key).expect("key resolved from live map");
        let updated = update.apply_to(current, now_ts());
        chunks.insert(key, updated.clone());
        Ok(updated)
    }

    async fn due_for_review(&self, cutoff: i64, limit: i64) -> Result<Vec<Chunk>, StoreError> {
        let chunks = self.chunks.read().unwrap();
        let mut due: Vec<Chunk> = chunks
            .values()
            .filter(|c| {
                matches!(
                    c.verified_status,
                    TrustStatus::Candidate | TrustStatus::Verified
                ) && c.last_qa_reviewed_at.map_or(true, |ts| ts < cutoff)
            })
            .cloned()
            .collect();
        due.sort_by_key(|c| c.last_qa_reviewed_at.unwrap_or(0));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn failed_repairable(&self, cap: i64, limit: i64) -> Result<Vec<Chunk>, StoreError> {
        let chunks = self.chunks.read().unwrap();
        let mut failed: Vec<Chunk> = chunks
            .values()
            .filter(|c| {
                c.qa_status == QaStatus::Fail
                    && c.verified_status != TrustStatus::Banned
                    && c.regeneration_attempts <= cap
            })
            .cloned()
            .collect();
        failed.sort_by_key(|c| c.failed_at.unwrap_or(0));
        failed.truncate(limit as usize);
        Ok(failed)
    }

    async fn record_qa_run(&self, run: &QaRunSummary) -> Result<(), StoreError> {
        let mut runs = self.runs.write().unwrap();
        runs.push(run.clone());
        Ok(())
    }

    async fn recent_qa_runs(&self, limit: i64) -> Result<Vec<QaRunSummary>, StoreError> {
        let runs = self.runs.read().unwrap();
        let mut out: Vec<QaRunSummary> = runs.clone();
        out.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn trust_stats(&self, created_since: i64) -> Result<TrustStats, StoreError> {
        let chunks = self.chunks.read().unwrap();
        let mut stats = TrustStats::default();
        for c in chunks.values() {
            stats.total += 1;
            match c.verified_status {
                TrustStatus::Verified => stats.verified += 1,
                TrustStatus::Candidate => stats.candidate += 1,
                TrustStatus::Unverified => stats.unverified += 1,
                TrustStatus::Banned => stats.banned += 1,
            }
            match c.qa_status {
                QaStatus::Pass => stats.qa_pass += 1,
                QaStatus::Fail => stats.qa_fail += 1,
                QaStatus::Pending => stats.qa_pending += 1,
            }
            if c.created_at >= created_since {
                stats.created_since += 1;
            }
        }
        Ok(stats)
    }
}
