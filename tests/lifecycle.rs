//! End-to-end trust-lifecycle tests over the in-memory store.
//!
//! These exercise the full resolve → generate → QA → promote → schedule
//! path with scripted collaborators, covering the lifecycle guarantees:
//! uniqueness under racing stub creation, generation deduplication, two-day
//! promotion, regression banning, cap enforcement, and scheduler
//! resumability.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use autofacts::config::SchedulerConfig;
use autofacts::error::{GenerationError, StoreError};
use autofacts::generator::{ContentRequest, GenerationResult, Generator};
use autofacts::models::{Chunk, ChunkKey, ChunkType, QaStatus, TrustStatus, Visibility};
use autofacts::promote::Promoter;
use autofacts::qa::{ModelChecker, QaEngine, Verdict};
use autofacts::resolve::{Resolution, Resolver, UnavailableReason};
use autofacts::scheduler::Scheduler;
use autofacts::store::memory::MemoryStore;
use autofacts::store::{ChunkUpdate, FactStore};

const CAP: i64 = 3;

/// Generator scripted for tests: counts calls, can fail on demand, and can
/// hold a call open until released.
struct TestGenerator {
    calls: AtomicUsize,
    failing: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl TestGenerator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            gate: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn hold_next(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }
}

#[async_trait]
impl Generator for TestGenerator {
    fn name(&self) -> &str {
        "test"
    }

    async fn generate(
        &self,
        _vehicle_key: &str,
        request: &ContentRequest,
        _repair_hint: Option<&str>,
    ) -> Result<GenerationResult, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().take();
        if let Some(notify) = gate {
            notify.notified().await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(GenerationError::Provider("upstream 500".into()));
        }

        Ok(GenerationResult {
            title: format!("Torque: {}", request.component),
            content_text: "Caliper bracket bolts: 80 ft-lb. Banjo bolt: 26 ft-lb.".to_string(),
            data: json!({"spec_items": [
                {"name": "bracket bolt", "ft_lb": 80.0},
                {"name": "banjo bolt", "ft_lb": 26.0}
            ]}),
            sources: vec!["https://example.org/fsm/brakes".to_string()],
            source_confidence: 0.92,
        })
    }
}

/// Checker with a settable default verdict plus a one-shot script queue.
struct TestChecker {
    default: Mutex<Verdict>,
    script: Mutex<Vec<Verdict>>,
}

impl TestChecker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            default: Mutex::new(Verdict::pass("plausible")),
            script: Mutex::new(Vec::new()),
        })
    }

    fn set_default_fail(&self, notes: &str) {
        *self.default.lock().unwrap() = Verdict::fail(notes, None);
    }

    fn fail_once(&self, notes: &str) {
        self.script.lock().unwrap().push(Verdict::fail(notes, None));
    }
}

#[async_trait]
impl ModelChecker for TestChecker {
    fn name(&self) -> &str {
        "test"
    }

    async fn check(&self, _chunk: &Chunk) -> anyhow::Result<Verdict> {
        let mut script = self.script.lock().unwrap();
        if let Some(next) = script.pop() {
            return Ok(next);
        }
        Ok(self.default.lock().unwrap().clone())
    }
}

fn key() -> ChunkKey {
    ChunkKey::new(
        "2019_honda_accord_2.0t",
        "torque_spec:front_caliper",
        ChunkType::TorqueSpec,
    )
}

fn stack() -> (
    Arc<MemoryStore>,
    Arc<TestGenerator>,
    Arc<TestChecker>,
    Resolver,
) {
    let store = Arc::new(MemoryStore::new());
    let generator = TestGenerator::new();
    let checker = TestChecker::new();
    let qa = Arc::new(QaEngine::new(checker.clone()));
    let promoter = Arc::new(Promoter::new(store.clone(), CAP));
    let resolver = Resolver::new(
        store.clone(),
        generator.clone(),
        qa,
        promoter,
        Duration::from_secs(5),
    );
    (store, generator, checker, resolver)
}

fn scheduler_for(store: Arc<MemoryStore>, resolver: &Resolver) -> Scheduler {
    Scheduler::new(
        store,
        resolver.clone(),
        SchedulerConfig::default(),
        CAP,
    )
}

/// Poll the store until the chunk satisfies the predicate or time runs out.
async fn wait_for<F: Fn(&Chunk) -> bool>(store: &MemoryStore, key: &ChunkKey, pred: F) -> Chunk {
    for _ in 0..200 {
        if let Some(chunk) = store.get(key).await.unwrap() {
            if pred(&chunk) {
                return chunk;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached for {}", key);
}

/// Backdate the last QA review so the next pass lands on a later UTC
/// calendar day (26h is always an earlier date) and the scheduler sees the
/// row as due.
async fn backdate_review(store: &MemoryStore, id: &str, hours: i64) {
    let ts = chrono::Utc::now().timestamp() - hours * 3600;
    store
        .update(
            id,
            ChunkUpdate {
                last_qa_reviewed_at: Some(ts),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_stub_creation_leaves_exactly_one_row() {
    let store = Arc::new(MemoryStore::new());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.upsert_stub(&key(), "Front Caliper").await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(StoreError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 15);

    let row = store.get(&key()).await.unwrap().unwrap();
    assert!(row.is_stub());
}

#[tokio::test]
async fn second_resolve_during_generation_observes_pending_without_second_call() {
    let (store, generator, _checker, resolver) = stack();

    // Hold the first generation open so the race window is real.
    let release = generator.hold_next();

    let first = resolver.resolve(&key()).await.unwrap();
    assert!(matches!(first, Resolution::Pending));

    // Let the background task reach the generator before racing it.
    for _ in 0..200 {
        if generator.calls() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(generator.calls(), 1);

    // Generation is in flight: a second resolve sees Pending and does not
    // trigger a duplicate generator invocation.
    let second = resolver.resolve(&key()).await.unwrap();
    assert!(matches!(second, Resolution::Pending));
    assert_eq!(generator.calls(), 1);

    release.notify_one();
    let chunk = wait_for(&store, &key(), |c| c.qa_status == QaStatus::Pass).await;
    assert_eq!(chunk.verified_status, TrustStatus::Candidate);
    assert_eq!(generator.calls(), 1);

    // After the passing verdict, resolve serves the chunk.
    match resolver.resolve(&key()).await.unwrap() {
        Resolution::Safe(served) => {
            assert_eq!(served.verified_status, TrustStatus::Candidate);
            assert_eq!(served.visibility(), Visibility::Safe);
        }
        other => panic!("expected Safe, got {:?}", other),
    }
}

#[tokio::test]
async fn two_day_promotion_through_the_scheduler() {
    let (store, _generator, _checker, resolver) = stack();

    // Day one: generation + first pass → candidate.
    let resolution = resolver.resolve_wait(&key()).await.unwrap();
    let chunk = match resolution {
        Resolution::Safe(c) => c,
        other => panic!("expected Safe, got {:?}", other),
    };
    assert_eq!(chunk.verified_status, TrustStatus::Candidate);

    // Pretend a day passed since that review.
    backdate_review(&store, &chunk.id, 26).await;

    // The daily cycle re-evaluates and promotes to verified.
    let scheduler = scheduler_for(store.clone(), &resolver);
    let summary = scheduler.run_cycle().await.unwrap();
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.passed, 1);

    let promoted = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(promoted.verified_status, TrustStatus::Verified);
    assert!(promoted.verified_at.is_some());
    assert_eq!(promoted.qa_pass_count, 2);
    assert_eq!(promoted.visibility(), Visibility::Safe);
}

#[tokio::test]
async fn interrupted_cycle_resumes_without_rereviewing() {
    let (store, _generator, _checker, resolver) = stack();

    let chunk = match resolver.resolve_wait(&key()).await.unwrap() {
        Resolution::Safe(c) => c,
        other => panic!("expected Safe, got {:?}", other),
    };
    backdate_review(&store, &chunk.id, 26).await;

    let scheduler = scheduler_for(store.clone(), &resolver);
    let first = scheduler.run_cycle().await.unwrap();
    assert_eq!(first.examined, 1);

    // A resumed run skips chunks already reviewed in the current window.
    let second = scheduler.run_cycle().await.unwrap();
    assert_eq!(second.examined, 0);

    let runs = store.recent_qa_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
}

#[tokio::test]
async fn regression_in_verified_content_bans_and_rejects() {
    let (store, generator, checker, resolver) = stack();

    // Build a verified chunk: candidate, then a next-day pass.
    let chunk = match resolver.resolve_wait(&key()).await.unwrap() {
        Resolution::Safe(c) => c,
        other => panic!("expected Safe, got {:?}", other),
    };
    backdate_review(&store, &chunk.id, 26).await;
    let scheduler = scheduler_for(store.clone(), &resolver);
    scheduler.run_cycle().await.unwrap();
    let verified = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(verified.verified_status, TrustStatus::Verified);

    // The spec got superseded: next review fails the model check.
    checker.set_default_fail("spec superseded by TSB 24-010");
    backdate_review(&store, &verified.id, 26).await;
    let calls_before = generator.calls();
    let summary = scheduler.run_cycle().await.unwrap();
    assert_eq!(summary.failed, 1);
    // Zero additional regeneration attempts for trusted content.
    assert_eq!(summary.repaired, 0);
    assert_eq!(generator.calls(), calls_before);

    let banned = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(banned.verified_status, TrustStatus::Banned);
    assert_eq!(banned.visibility(), Visibility::Banned);

    match resolver.resolve(&key()).await.unwrap() {
        Resolution::Unavailable(reason) => {
            assert_eq!(reason, UnavailableReason::Rejected);
        }
        other => panic!("expected Unavailable(Rejected), got {:?}", other),
    }
}

#[tokio::test]
async fn cap_plus_one_failures_reach_banned_with_no_further_attempts() {
    let (store, generator, _checker, resolver) = stack();
    generator.set_failing(true);

    let resolution = resolver.resolve_wait(&key()).await.unwrap();
    assert!(matches!(
        resolution,
        Resolution::Unavailable(UnavailableReason::Rejected)
    ));

    // cap + 1 failing rounds, then the pipeline stops for good.
    assert_eq!(generator.calls(), (CAP + 1) as usize);
    let banned = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(banned.verified_status, TrustStatus::Banned);
    assert_eq!(banned.regeneration_attempts, CAP + 1);

    // Neither resolve nor the scheduler touch it again.
    resolver.resolve(&key()).await.unwrap();
    let scheduler = scheduler_for(store.clone(), &resolver);
    scheduler.run_cycle().await.unwrap();
    assert_eq!(generator.calls(), (CAP + 1) as usize);
}

#[tokio::test]
async fn repair_phase_regenerates_failed_chunks() {
    let (store, generator, _checker, resolver) = stack();

    // First generation fails once, leaving a failed row under the cap, as if
    // the process had died before its retry.
    generator.set_failing(true);
    let stub = store.upsert_stub(&key(), "Front Caliper").await.unwrap();
    let failed = store
        .update(
            &stub.id,
            ChunkUpdate {
                qa_status: Some(QaStatus::Fail),
                qa_notes: Some("generation failed: upstream 500".to_string()),
                failed_at: Some(chrono::Utc::now().timestamp() - 3600),
                regeneration_attempts: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.visibility(), Visibility::Quarantined);

    // Upstream recovered; the repair phase heals the chunk.
    generator.set_failing(false);
    let scheduler = scheduler_for(store.clone(), &resolver);
    let summary = scheduler.run_cycle().await.unwrap();
    assert_eq!(summary.repaired, 1);

    let healed = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(healed.qa_status, QaStatus::Pass);
    assert_eq!(healed.verified_status, TrustStatus::Candidate);
    assert!(healed.regenerated_at.is_some());
}

#[tokio::test]
async fn operator_override_is_the_only_path_out_of_banned() {
    let (store, generator, _checker, resolver) = stack();

    generator.set_failing(true);
    resolver.resolve_wait(&key()).await.unwrap();
    let banned = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(banned.verified_status, TrustStatus::Banned);

    // Override resets the row in place; generation then succeeds.
    generator.set_failing(false);
    let reset = store.upsert_stub(&key(), "Front Caliper").await.unwrap();
    assert_eq!(reset.id, banned.id);
    assert_eq!(reset.verified_status, TrustStatus::Unverified);
    assert_eq!(reset.regeneration_attempts, 0);

    match resolver.resolve_wait(&key()).await.unwrap() {
        Resolution::Safe(chunk) => {
            assert_eq!(chunk.id, banned.id);
            assert_eq!(chunk.verified_status, TrustStatus::Candidate);
        }
        other => panic!("expected Safe after override, got {:?}", other),
    }
}

#[tokio::test]
async fn monotonic_counters_survive_a_fail_and_repair_round() {
    let (store, _generator, checker, resolver) = stack();

    let chunk = match resolver.resolve_wait(&key()).await.unwrap() {
        Resolution::Safe(c) => c,
        other => panic!("expected Safe, got {:?}", other),
    };
    assert_eq!(chunk.qa_pass_count, 1);
    assert_eq!(chunk.verified_status, TrustStatus::Candidate);

    // One transient model-check failure: the review fails, the inline
    // repair regenerates, and the re-evaluation passes again.
    checker.fail_once("transient nonsense in content");
    backdate_review(&store, &chunk.id, 26).await;
    let scheduler = scheduler_for(store.clone(), &resolver);
    let summary = scheduler.run_cycle().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.repaired, 1);

    let after = store.get(&key()).await.unwrap().unwrap();
    // The candidate kept its pass-count progress through the failure and
    // gained the repair round's pass; trust never regressed below candidate.
    assert_eq!(after.qa_pass_count, 2);
    assert_eq!(after.verified_status, TrustStatus::Candidate);
    assert_eq!(after.regeneration_attempts, 1);
    assert_eq!(after.qa_status, QaStatus::Pass);

    // Next day's clean review finishes the two-day promotion.
    backdate_review(&store, &after.id, 26).await;
    scheduler.run_cycle().await.unwrap();
    let promoted = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(promoted.qa_pass_count, 3);
    assert_eq!(promoted.verified_status, TrustStatus::Verified);
}
