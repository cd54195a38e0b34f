//! Trust promoter: the sole writer of a chunk's trust fields.
//!
//! [`Promoter::apply`] turns a QA verdict into exactly one state transition
//! per the promotion/demotion table:
//!
//! | verified_status | verdict | day vs. last pass | next | side effects |
//! |-----------------|---------|-------------------|------|--------------|
//! | unverified | pass | — | candidate | pass_count+1, promotion_count+1 |
//! | candidate | pass | same day | candidate | pass_count+1 |
//! | candidate | pass | different day | verified | pass_count+1, verified_at, promotion_count+1 |
//! | verified | pass | — | verified | pass_count+1 |
//! | non-banned | fail | — | unchanged, or banned past the cap | failed_at; regeneration if not banned |
//! | verified | fail | — | banned | failed_at |
//! | banned | any | — | banned | no-op |
//!
//! Two passes on two distinct calendar days are required before `verified`
//! so a single lucky pass cannot grant full trust. A verified chunk that
//! fails is banned outright — a regression in previously-trusted content is
//! a trust violation, not a retry candidate.
//!
//! `qa_status` always mirrors the latest verdict; it is never a historical
//! aggregate.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

use crate::error::StoreError;
use crate::models::{Chunk, QaStatus, TrustStatus};
use crate::qa::Verdict;
use crate::store::{ChunkUpdate, FactStore};

/// One computed transition, ready to be written.
#[derive(Debug)]
pub struct Transition {
    pub update: ChunkUpdate,
    pub next_status: TrustStatus,
    /// Schedule a bounded regeneration after writing.
    pub regenerate: bool,
    /// Banned rows absorb verdicts without a write.
    pub noop: bool,
}

/// Compute the state-machine transition for one verdict. Pure: the caller
/// supplies the clock.
pub fn transition(
    chunk: &Chunk,
    verdict: &Verdict,
    now: DateTime<Utc>,
    regeneration_cap: i64,
) -> Transition {
    if chunk.verified_status == TrustStatus::Banned {
        return Transition {
            update: ChunkUpdate::default(),
            next_status: TrustStatus::Banned,
            regenerate: false,
            noop: true,
        };
    }

    let now_ts = now.timestamp();
    let mut update = ChunkUpdate {
        qa_notes: Some(verdict.notes.clone()),
        last_qa_reviewed_at: Some(now_ts),
        ..Default::default()
    };

    if verdict.passed() {
        update.qa_status = Some(QaStatus::Pass);
        update.qa_pass_count = Some(chunk.qa_pass_count + 1);

        let next = match chunk.verified_status {
            TrustStatus::Unverified => {
                update.promotion_count = Some(chunk.promotion_count + 1);
                TrustStatus::Candidate
            }
            TrustStatus::Candidate => {
                if passed_on_earlier_day(chunk, now) {
                    update.verified_at = Some(now_ts);
                    update.promotion_count = Some(chunk.promotion_count + 1);
                    TrustStatus::Verified
                } else {
                    TrustStatus::Candidate
                }
            }
            TrustStatus::Verified => TrustStatus::Verified,
            TrustStatus::Banned => unreachable!("handled above"),
        };
        update.verified_status = Some(next);

        return Transition {
            update,
            next_status: next,
            regenerate: false,
            noop: false,
        };
    }

    // Fail path.
    update.qa_status = Some(QaStatus::Fail);
    update.failed_at = Some(now_ts);

    if chunk.verified_status == TrustStatus::Verified {
        // Zero additional regeneration attempts for trusted content.
        update.verified_status = Some(TrustStatus::Banned);
        update.qa_notes = Some(format!("banned after regression: {}", verdict.notes));
        return Transition {
            update,
            next_status: TrustStatus::Banned,
            regenerate: false,
            noop: false,
        };
    }

    let attempts = chunk.regeneration_attempts + 1;
    update.regeneration_attempts = Some(attempts);

    if attempts > regeneration_cap {
        update.verified_status = Some(TrustStatus::Banned);
        update.qa_notes = Some(format!(
            "banned: regeneration cap exceeded ({} attempts): {}",
            attempts, verdict.notes
        ));
        return Transition {
            update,
            next_status: TrustStatus::Banned,
            regenerate: false,
            noop: false,
        };
    }

    Transition {
        update,
        next_status: chunk.verified_status,
        regenerate: true,
        noop: false,
    }
}

/// Whether some prior pass happened on an earlier UTC calendar day than
/// `now`. `last_qa_reviewed_at` is a lower bound on the most recent pass
/// time, so comparing against it can only delay promotion, never grant it
/// early.
fn passed_on_earlier_day(chunk: &Chunk, now: DateTime<Utc>) -> bool {
    let last = match chunk.last_qa_reviewed_at {
        Some(ts) => ts,
        None => return false,
    };
    match Utc.timestamp_opt(last, 0).single() {
        Some(last_dt) => last_dt.date_naive() < now.date_naive(),
        None => false,
    }
}

/// Applies verdicts through the store. All trust-field writes in the system
/// go through here.
pub struct Promoter {
    store: Arc<dyn FactStore>,
    regeneration_cap: i64,
}

impl Promoter {
    pub fn new(store: Arc<dyn FactStore>, regeneration_cap: i64) -> Self {
        Self {
            store,
            regeneration_cap,
        }
    }

    /// Apply one verdict to one chunk. Returns the written row and, when a
    /// bounded retry is warranted, the repair hint to hand the generator.
    pub async fn apply(
        &self,
        chunk: &Chunk,
        verdict: &Verdict,
    ) -> Result<(Chunk, Option<String>), StoreError> {
        let t = transition(chunk, verdict, Utc::now(), self.regeneration_cap);

        if t.noop {
            return Ok((chunk.clone(), None));
        }

        let updated = self.store.update(&chunk.id, t.update).await?;
        info!(
            chunk_id = %updated.id,
            key = %updated.key(),
            from = chunk.verified_status.as_str(),
            to = t.next_status.as_str(),
            qa = updated.qa_status.as_str(),
            "verdict applied"
        );

        let hint = if t.regenerate {
            Some(
                verdict
                    .repair_hint
                    .clone()
                    .unwrap_or_else(|| verdict.notes.clone()),
            )
        } else {
            None
        };
        Ok((updated, hint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkKey, ChunkType, Visibility};
    use crate::store;

    const CAP: i64 = 3;

    fn day(d: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, hour, 0, 0).unwrap()
    }

    fn chunk(status: TrustStatus) -> Chunk {
        let key = ChunkKey::new(
            "2019_honda_accord_2.0t",
            "torque_spec:front_caliper",
            ChunkType::TorqueSpec,
        );
        let mut c = store::new_stub(&key, "Front Caliper", day(1, 8).timestamp());
        c.verified_status = status;
        c
    }

    fn pass() -> Verdict {
        Verdict::pass("ok")
    }

    fn fail() -> Verdict {
        Verdict::fail("bad", Some("fix it".to_string()))
    }

    fn applied(c: &Chunk, t: &Transition) -> Chunk {
        t.update.clone().apply_to(c.clone(), 0)
    }

    #[test]
    fn first_pass_promotes_to_candidate() {
        let c = chunk(TrustStatus::Unverified);
        let t = transition(&c, &pass(), day(1, 9), CAP);
        assert_eq!(t.next_status, TrustStatus::Candidate);
        let after = applied(&c, &t);
        assert_eq!(after.qa_pass_count, 1);
        assert_eq!(after.promotion_count, 1);
        assert_eq!(after.visibility(), Visibility::Safe);
    }

    #[test]
    fn same_day_second_pass_stays_candidate() {
        let c = chunk(TrustStatus::Unverified);
        let after_first = applied(&c, &transition(&c, &pass(), day(1, 9), CAP));

        let t = transition(&after_first, &pass(), day(1, 18), CAP);
        assert_eq!(t.next_status, TrustStatus::Candidate);
        let after = applied(&after_first, &t);
        assert_eq!(after.qa_pass_count, 2);
        assert_eq!(after.promotion_count, 1);
        assert!(after.verified_at.is_none());
    }

    #[test]
    fn next_day_pass_promotes_to_verified() {
        let c = chunk(TrustStatus::Unverified);
        let after_first = applied(&c, &transition(&c, &pass(), day(1, 9), CAP));

        let t = transition(&after_first, &pass(), day(2, 7), CAP);
        assert_eq!(t.next_status, TrustStatus::Verified);
        let after = applied(&after_first, &t);
        assert_eq!(after.qa_pass_count, 2);
        assert_eq!(after.promotion_count, 2);
        assert!(after.verified_at.is_some());
        assert_eq!(after.visibility(), Visibility::Safe);
    }

    #[test]
    fn verified_pass_is_steady_state() {
        let mut c = chunk(TrustStatus::Verified);
        c.qa_status = QaStatus::Pass;
        c.qa_pass_count = 2;
        let t = transition(&c, &pass(), day(5, 9), CAP);
        assert_eq!(t.next_status, TrustStatus::Verified);
        assert_eq!(applied(&c, &t).qa_pass_count, 3);
    }

    #[test]
    fn fail_under_cap_schedules_regeneration_without_demotion() {
        let c = chunk(TrustStatus::Candidate);
        let t = transition(&c, &fail(), day(2, 9), CAP);
        assert_eq!(t.next_status, TrustStatus::Candidate);
        assert!(t.regenerate);
        let after = applied(&c, &t);
        assert_eq!(after.regeneration_attempts, 1);
        assert_eq!(after.qa_status, QaStatus::Fail);
        assert!(after.failed_at.is_some());
        // Candidate keeps its pass-count progress on failure.
        assert_eq!(after.qa_pass_count, c.qa_pass_count);
        assert_eq!(after.visibility(), Visibility::Quarantined);
    }

    #[test]
    fn cap_plus_one_failures_ban() {
        let mut c = chunk(TrustStatus::Unverified);
        for i in 0..CAP {
            let t = transition(&c, &fail(), day(2, 9), CAP);
            assert!(t.regenerate, "failure {} should still retry", i + 1);
            assert_ne!(t.next_status, TrustStatus::Banned);
            c = applied(&c, &t);
        }
        assert_eq!(c.regeneration_attempts, CAP);

        let t = transition(&c, &fail(), day(2, 10), CAP);
        assert!(!t.regenerate);
        assert_eq!(t.next_status, TrustStatus::Banned);
        let after = applied(&c, &t);
        assert_eq!(after.visibility(), Visibility::Banned);
    }

    #[test]
    fn verified_fail_bans_directly() {
        let mut c = chunk(TrustStatus::Verified);
        c.qa_status = QaStatus::Pass;
        c.qa_pass_count = 4;
        let t = transition(&c, &fail(), day(9, 9), CAP);
        assert_eq!(t.next_status, TrustStatus::Banned);
        assert!(!t.regenerate);
        let after = applied(&c, &t);
        // No attempt consumed: a regression is not a retry candidate.
        assert_eq!(after.regeneration_attempts, 0);
        assert!(after.qa_notes.as_ref().unwrap().contains("regression"));
        assert_eq!(after.visibility(), Visibility::Banned);
    }

    #[test]
    fn banned_absorbs_everything() {
        let c = chunk(TrustStatus::Banned);
        let t = transition(&c, &pass(), day(3, 9), CAP);
        assert!(t.noop);
        assert_eq!(t.next_status, TrustStatus::Banned);
        let t = transition(&c, &fail(), day(3, 9), CAP);
        assert!(t.noop);
    }

    #[test]
    fn trust_never_regresses_short_of_ban() {
        // Candidate failing stays candidate; verified failing goes to banned,
        // never back to candidate.
        let c = chunk(TrustStatus::Candidate);
        let t = transition(&c, &fail(), day(2, 9), CAP);
        assert_eq!(t.next_status, TrustStatus::Candidate);

        let mut v = chunk(TrustStatus::Verified);
        v.qa_status = QaStatus::Pass;
        let t = transition(&v, &fail(), day(2, 9), CAP);
        assert_eq!(t.next_status, TrustStatus::Banned);
    }

    #[test]
    fn visibility_invariant_holds_across_all_transitions() {
        // Walk a realistic life: stub → candidate → fail → candidate →
        // verified → regression ban, checking I2 after every step.
        let mut c = chunk(TrustStatus::Unverified);
        let steps: [(Verdict, DateTime<Utc>); 4] = [
            (pass(), day(1, 9)),
            (fail(), day(1, 12)),
            (pass(), day(1, 15)),
            (pass(), day(2, 9)),
        ];
        for (verdict, at) in steps {
            let t = transition(&c, &verdict, at, CAP);
            c = applied(&c, &t);
            let expected = Visibility::derive(c.qa_status, c.verified_status);
            assert_eq!(c.visibility(), expected);
        }
        assert_eq!(c.verified_status, TrustStatus::Verified);

        let t = transition(&c, &fail(), day(3, 9), CAP);
        c = applied(&c, &t);
        assert_eq!(c.visibility(), Visibility::Banned);
    }
}
