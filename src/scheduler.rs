//! Daily QA scheduler: re-examines trusted chunks and repairs failed ones.
//!
//! [`Scheduler::run_cycle`] is an idempotent scan keyed on
//! `last_qa_reviewed_at`, not a wall-clock cron coupling: a missed run
//! self-heals on the next scan because the selection cutoff does the work.
//! Each cycle runs three phases and records one immutable summary row:
//!
//! 1. **Review** — candidate/verified chunks whose last review is older than
//!    the interval are re-evaluated and re-promoted. Applying a verdict
//!    stamps `last_qa_reviewed_at`, so an interrupted cycle resumes by
//!    simply skipping chunks already reviewed in the current window.
//! 2. **Repair** — failed chunks still under the regeneration cap are
//!    regenerated with their last QA notes as the repair hint.
//! 3. **Report** — counters and wall-clock duration are persisted via
//!    [`FactStore::record_qa_run`].
//!
//! The scheduler never touches rows in first-time generation: selection only
//! returns rows already past `pending`, and the resolver's per-key guard
//! covers the remaining window.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::StoreError;
use crate::resolve::Resolver;
use crate::store::{FactStore, QaRunSummary};

pub struct Scheduler {
    store: Arc<dyn FactStore>,
    resolver: Resolver,
    config: SchedulerConfig,
    regeneration_cap: i64,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn FactStore>,
        resolver: Resolver,
        config: SchedulerConfig,
        regeneration_cap: i64,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
            regeneration_cap,
        }
    }

    /// Run one full review + repair cycle and persist its summary.
    pub async fn run_cycle(&self) -> Result<QaRunSummary, StoreError> {
        let started = Utc::now();
        let cutoff = started.timestamp() - (self.config.review_interval_hours as i64) * 3600;

        let mut examined: i64 = 0;
        let mut passed: i64 = 0;
        let mut failed: i64 = 0;
        let mut repaired: i64 = 0;

        // Phase 1: review. Draining terminates because every applied verdict
        // stamps last_qa_reviewed_at past the cutoff.
        let mut skipped: HashSet<String> = HashSet::new();
        loop {
            let batch = self
                .store
                .due_for_review(cutoff, self.config.batch_size)
                .await?;
            let pending: Vec<_> = batch
                .into_iter()
                .filter(|c| !skipped.contains(&c.id))
                .collect();
            if pending.is_empty() {
                break;
            }

            for chunk in pending {
                let id = chunk.id.clone();
                match self.resolver.review(chunk).await? {
                    Some(outcome) => {
                        examined += 1;
                        if outcome.passed {
                            passed += 1;
                        } else {
                            failed += 1;
                        }
                        if outcome.repaired {
                            repaired += 1;
                        }
                    }
                    None => {
                        // Key busy elsewhere; leave it for the next cycle.
                        skipped.insert(id);
                    }
                }
            }
        }

        // Phase 2: repair leftovers (failures that predate this cycle or
        // whose pipeline died). Regeneration ends each chunk in pass or
        // banned, so the drain terminates.
        let mut seen: HashSet<String> = HashSet::new();
        loop {
            let batch = self
                .store
                .failed_repairable(self.regeneration_cap, self.config.batch_size)
                .await?;
            let fresh: Vec<_> = batch
                .into_iter()
                .filter(|c| seen.insert(c.id.clone()))
                .collect();
            if fresh.is_empty() {
                break;
            }

            for chunk in fresh {
                let hint = chunk.qa_notes.clone();
                match self.resolver.regenerate(chunk, hint).await? {
                    Some(_) => repaired += 1,
                    None => {} // in flight elsewhere
                }
            }
        }

        let finished = Utc::now();
        let summary = QaRunSummary {
            id: Uuid::new_v4().to_string(),
            started_at: started.timestamp(),
            finished_at: finished.timestamp(),
            examined,
            passed,
            failed,
            repaired,
            notes: format!(
                "examined: {} | pass: {} | fail: {} | repaired: {}",
                examined, passed, failed, repaired
            ),
        };
        self.store.record_qa_run(&summary).await?;

        info!(
            examined,
            passed,
            failed,
            repaired,
            duration_secs = finished.timestamp() - started.timestamp(),
            "qa cycle complete"
        );
        Ok(summary)
    }

    /// Long-running loop: run a cycle, then wake every tick until the next
    /// one is due. Store outages are logged and retried on the next tick
    /// rather than killing the loop.
    pub async fn watch(&self) -> Result<(), StoreError> {
        let interval = Duration::from_secs(self.config.review_interval_hours * 3600);
        let tick = Duration::from_secs(self.config.tick_secs);
        let mut last_run: Option<std::time::Instant> = None;

        loop {
            let due = match last_run {
                None => true,
                Some(at) => at.elapsed() >= interval,
            };
            if due {
                match self.run_cycle().await {
                    Ok(_) => {
                        last_run = Some(std::time::Instant::now());
                    }
                    Err(StoreError::Unavailable(e)) => {
                        warn!(error = %e, "qa cycle aborted, store unavailable");
                    }
                    Err(e) => return Err(e),
                }
            }
            tokio::time::sleep(tick).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QaConfig;
    use crate::promote::Promoter;
    use crate::qa::{create_checker, QaEngine};
    use crate::store::memory::MemoryStore;
    use crate::generator::DisabledGenerator;

    #[tokio::test]
    async fn empty_store_records_an_empty_run() {
        let store = Arc::new(MemoryStore::new());
        let qa = Arc::new(QaEngine::new(
            create_checker(&QaConfig::default()).unwrap(),
        ));
        let promoter = Arc::new(Promoter::new(store.clone(), 3));
        let resolver = Resolver::new(
            store.clone(),
            Arc::new(DisabledGenerator),
            qa,
            promoter,
            Duration::from_secs(5),
        );
        let scheduler = Scheduler::new(
            store.clone(),
            resolver,
            SchedulerConfig::default(),
            3,
        );

        let summary = scheduler.run_cycle().await.unwrap();
        assert_eq!(summary.examined, 0);
        assert_eq!(summary.repaired, 0);

        let runs = store.recent_qa_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, summary.id);
    }
}
