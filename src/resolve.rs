//! Lazy cache controller: the request-time entry point.
//!
//! [`Resolver::resolve`] answers every content request from the fact store
//! and never serves unsafe content. A hit that is safe returns the chunk; a
//! hit that is quarantined or banned returns an explicit unavailability
//! signal whose payload never contains the underlying content; a miss
//! creates a quarantined stub, schedules one generation task, and returns
//! `Pending`.
//!
//! # Deduplication
//!
//! The in-flight key set here is an optimization: a second `resolve` during
//! generation observes `Pending` without touching the generator. Correctness
//! does not depend on it — the store's uniqueness constraint is the single
//! source of truth, and a losing `upsert_stub` falls back to reading the
//! winner's row. Two controller instances racing still produce exactly one
//! row and at most one task actually writes results (per-key mutation is
//! serialized by the guard within a process; across processes the row is
//! the serialization point).
//!
//! # Pipeline
//!
//! generate → QA evaluate → promote, strictly sequential per key. A failing
//! verdict with a repair hint loops back into generation; the promoter's cap
//! bounds the loop by banning past it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use crate::error::StoreError;
use crate::generator::{ContentRequest, Generator};
use crate::models::{Chunk, ChunkKey, Visibility};
use crate::promote::Promoter;
use crate::qa::{QaEngine, Verdict};
use crate::store::{ChunkUpdate, FactStore};
use crate::vehicle::humanize;

/// Why a present chunk cannot be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Quarantined: generated but not yet trusted, or failed and awaiting
    /// repair.
    VerificationInProgress,
    /// Banned: rejected by the trust lifecycle.
    Rejected,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::VerificationInProgress => "verification_in_progress",
            UnavailableReason::Rejected => "rejected",
        }
    }
}

/// Outcome of one resolve call. There is no fourth option: a client gets
/// verified content, an explicit unavailability reason, or `Pending`.
#[derive(Debug, Clone)]
pub enum Resolution {
    Safe(Chunk),
    Unavailable(UnavailableReason),
    Pending,
}

/// Outcome of one daily-review pass over a single chunk.
#[derive(Debug)]
pub struct ReviewResult {
    pub chunk: Chunk,
    /// Whether the review verdict itself passed (before any repair).
    pub passed: bool,
    /// Whether a repair regeneration ran.
    pub repaired: bool,
}

/// Removes its key from the in-flight set on drop, so a panicking pipeline
/// cannot wedge the key forever.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<ChunkKey>>>,
    key: ChunkKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.key);
    }
}

/// The lazy cache controller.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn FactStore>,
    generator: Arc<dyn Generator>,
    qa: Arc<QaEngine>,
    promoter: Arc<Promoter>,
    in_flight: Arc<Mutex<HashSet<ChunkKey>>>,
    generation_timeout: Duration,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn FactStore>,
        generator: Arc<dyn Generator>,
        qa: Arc<QaEngine>,
        promoter: Arc<Promoter>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            qa,
            promoter,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            generation_timeout,
        }
    }

    /// Wire a resolver from configuration: generator, model checker, and
    /// promoter all come from the same config the CLI loaded.
    pub fn from_config(
        config: &crate::config::Config,
        store: Arc<dyn FactStore>,
    ) -> anyhow::Result<Self> {
        let generator = crate::generator::create_generator(&config.generator)?;
        let checker = crate::qa::create_checker(&config.qa)?;
        let qa = Arc::new(QaEngine::new(checker));
        let promoter = Arc::new(Promoter::new(store.clone(), config.qa.regeneration_cap));
        Ok(Resolver::new(
            store,
            generator,
            qa,
            promoter,
            Duration::from_secs(config.generator.timeout_secs),
        ))
    }

    /// Resolve a content request, scheduling background generation on miss.
    pub async fn resolve(&self, key: &ChunkKey) -> Result<Resolution, StoreError> {
        self.resolve_inner(key, false).await
    }

    /// Resolve a content request, running any needed generation inline and
    /// returning the final state. Used by the CLI and the repair phase.
    pub async fn resolve_wait(&self, key: &ChunkKey) -> Result<Resolution, StoreError> {
        self.resolve_inner(key, true).await
    }

    async fn resolve_inner(&self, key: &ChunkKey, wait: bool) -> Result<Resolution, StoreError> {
        if let Some(chunk) = self.store.get(key).await? {
            return self.classify(chunk, wait).await;
        }

        let title = stub_title(key);
        match self.store.upsert_stub(key, &title).await {
            Ok(stub) => {
                info!(key = %key, chunk_id = %stub.id, "stub created, scheduling generation");
                self.generate_stub(stub, wait).await?;
                if wait {
                    // Re-read for the post-pipeline state.
                    match self.store.get(key).await? {
                        Some(chunk) => self.classify(chunk, false).await,
                        None => Err(StoreError::Unavailable("row vanished after pipeline".into())),
                    }
                } else {
                    Ok(Resolution::Pending)
                }
            }
            Err(StoreError::Conflict(_)) => {
                // Lost the creation race; the winner's row is authoritative.
                match self.store.get(key).await? {
                    Some(chunk) => self.classify(chunk, wait).await,
                    None => Err(StoreError::Unavailable("row vanished after conflict".into())),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Map a present row to a resolution, restarting generation for stubs
    /// orphaned by a crash.
    async fn classify(&self, chunk: Chunk, wait: bool) -> Result<Resolution, StoreError> {
        match chunk.visibility() {
            Visibility::Safe => Ok(Resolution::Safe(chunk)),
            Visibility::Banned => Ok(Resolution::Unavailable(UnavailableReason::Rejected)),
            Visibility::Quarantined => {
                if self.is_in_flight(&chunk.key()) {
                    return Ok(Resolution::Pending);
                }
                if chunk.is_stub() {
                    // A stub with no task behind it means a previous process
                    // died mid-generation; it self-heals here.
                    let key = chunk.key();
                    self.generate_stub(chunk, wait).await?;
                    if wait {
                        // The pipeline only ends in pass or banned.
                        return match self.store.get(&key).await? {
                            Some(after) => Ok(settle(&after)),
                            None => Err(StoreError::Unavailable(
                                "row vanished after pipeline".into(),
                            )),
                        };
                    }
                    return Ok(Resolution::Pending);
                }
                Ok(Resolution::Unavailable(UnavailableReason::VerificationInProgress))
            }
        }
    }

    /// Run or spawn the generation pipeline for a stub, deduplicated per key.
    async fn generate_stub(&self, stub: Chunk, wait: bool) -> Result<(), StoreError> {
        let guard = match self.try_begin(stub.key()) {
            Some(guard) => guard,
            None => return Ok(()), // another task owns this key
        };

        if wait {
            let result = self.generate_rounds(stub, None).await;
            drop(guard);
            result?;
        } else {
            let this = self.clone();
            tokio::spawn(async move {
                let result = this.generate_rounds(stub, None).await;
                drop(guard);
                if let Err(e) = result {
                    error!(error = %e, "generation pipeline aborted");
                }
            });
        }
        Ok(())
    }

    /// Regenerate an existing (failed) chunk inline, skipping keys already
    /// in flight. Returns the final row, or `None` when skipped.
    pub async fn regenerate(
        &self,
        chunk: Chunk,
        hint: Option<String>,
    ) -> Result<Option<Chunk>, StoreError> {
        let guard = match self.try_begin(chunk.key()) {
            Some(guard) => guard,
            None => return Ok(None),
        };
        let result = self.generate_rounds(chunk, hint).await;
        drop(guard);
        Ok(Some(result?))
    }

    /// Re-run evaluate → promote for an already-generated chunk, repairing
    /// inline when the verdict asks for it. Returns `None` when the key is
    /// busy. Used by the daily review cycle.
    pub async fn review(&self, chunk: Chunk) -> Result<Option<ReviewResult>, StoreError> {
        let guard = match self.try_begin(chunk.key()) {
            Some(guard) => guard,
            None => return Ok(None),
        };

        let result = async {
            let verdict = self.qa.evaluate(&chunk).await;
            let passed = verdict.passed();
            let (mut updated, hint) = self.promoter.apply(&chunk, &verdict).await?;
            let mut repaired = false;
            if let Some(h) = hint {
                updated = self.generate_rounds(updated, Some(h)).await?;
                repaired = true;
            }
            Ok(ReviewResult {
                chunk: updated,
                passed,
                repaired,
            })
        }
        .await;
        drop(guard);
        result.map(Some)
    }

    fn try_begin(&self, key: ChunkKey) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap();
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.in_flight.clone(),
            key,
        })
    }

    fn is_in_flight(&self, key: &ChunkKey) -> bool {
        self.in_flight.lock().unwrap().contains(key)
    }

    /// generate → evaluate → promote until the verdict stops asking for a
    /// retry. Callers hold the in-flight guard for the key, which keeps all
    /// mutation of the key sequential.
    async fn generate_rounds(
        &self,
        mut chunk: Chunk,
        mut hint: Option<String>,
    ) -> Result<Chunk, StoreError> {
        let component = chunk
            .content_id
            .split_once(':')
            .map(|(_, c)| c)
            .unwrap_or(chunk.content_id.as_str());
        let request = ContentRequest::new(&chunk.content_id, chunk.chunk_type, component);

        loop {
            let regenerating = hint.is_some() || chunk.regeneration_attempts > 0;
            let generated = tokio::time::timeout(
                self.generation_timeout,
                self.generator
                    .generate(&chunk.vehicle_key, &request, hint.as_deref()),
            )
            .await;

            let verdict = match generated {
                Ok(Ok(result)) => {
                    chunk = self
                        .store
                        .update(
                            &chunk.id,
                            ChunkUpdate {
                                title: Some(result.title),
                                content_text: Some(result.content_text),
                                data: Some(result.data),
                                sources: Some(result.sources),
                                source_confidence: Some(result.source_confidence.clamp(0.0, 1.0)),
                                regenerated_at: regenerating
                                    .then(|| Utc::now().timestamp()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    self.qa.evaluate(&chunk).await
                }
                Ok(Err(e)) => Verdict::fail(format!("generation failed: {}", e), None),
                Err(_) => Verdict::fail(
                    format!(
                        "generation timed out after {}s",
                        self.generation_timeout.as_secs()
                    ),
                    None,
                ),
            };

            let (updated, repair) = self.promoter.apply(&chunk, &verdict).await?;
            chunk = updated;

            match repair {
                Some(h) => hint = Some(h),
                None => return Ok(chunk),
            }
        }
    }
}

/// Visibility-only mapping for rows that just finished a pipeline.
fn settle(chunk: &Chunk) -> Resolution {
    match chunk.visibility() {
        Visibility::Safe => Resolution::Safe(chunk.clone()),
        Visibility::Banned => Resolution::Unavailable(UnavailableReason::Rejected),
        Visibility::Quarantined => {
            Resolution::Unavailable(UnavailableReason::VerificationInProgress)
        }
    }
}

/// Stub rows still need a readable title before generation fills one in.
fn stub_title(key: &ChunkKey) -> String {
    let component = key
        .content_id
        .split_once(':')
        .map(|(_, c)| c)
        .unwrap_or(key.content_id.as_str());
    format!("{}: {}", key.chunk_type.label(), humanize(component))
}
