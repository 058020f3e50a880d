//! Integration tests for the claim/fairness properties in spec §8, run
//! against the in-memory fakes in `repository::memory` so they need no live
//! Postgres instance.
//!
//! P5 (rate-limit cap enforcement) and P7 (OCR pool balance) are covered
//! in-crate: `ocr::pool`'s unit tests exercise `SubKindAllocation`/
//! `rebalance_tick` directly, and P5 needs a live Redis instance to
//! exercise `ocr::rate_limiter::RateLimiter` meaningfully, so it isn't
//! duplicated here as a hollow unit test. P6 (sanitizer structure) is
//! covered by `ocr::sanitizer`'s inline tests.

use std::sync::Arc;

use greffier::models::{
    BusinessRegistrySession, Credential, ExtractionJob, JobKind, JobParams, JobStatus,
    PersonalRightsSearch, SessionStatus,
};
use greffier::repository::memory::{MemoryCredentialRepository, MemoryJobRepository};
use greffier::repository::{CredentialRepository, JobRepository};

fn sample_job() -> ExtractionJob {
    let params = JobParams::new("1 234 567", "Quebec", "Cadastre du Quebec");
    ExtractionJob::new(0, JobKind::Index, params, 3)
}

/// P1: only one of many concurrent `claim_pending` callers wins a given
/// pending job; everyone else gets `None`.
#[tokio::test]
async fn claim_pending_has_exactly_one_winner() {
    let repo = Arc::new(MemoryJobRepository::new());
    let job_id = repo.seed(sample_job()).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.claim_pending(&format!("worker-{i}")).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            assert_eq!(job.id, job_id);
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one caller should have claimed the job");
}

/// P2: a job released by the reaper (simulated here as a direct
/// `release_orphaned` call from a different worker than the one that holds
/// it) is never double-processed — the stale holder's own completion call
/// fails once the row has moved on.
#[tokio::test]
async fn reaped_job_cannot_be_completed_by_its_original_holder() {
    let repo = MemoryJobRepository::new();
    let job_id = repo.seed(sample_job()).await;

    let claimed = repo.claim_pending("dead-worker").await.unwrap().unwrap();
    assert_eq!(claimed.worker_id.as_deref(), Some("dead-worker"));

    // Reaper releases the job back to pending, as if "dead-worker" missed
    // its heartbeat deadline. Unlike a driven failure this does not consume
    // a retry attempt.
    let released = repo.release_orphaned(job_id, "dead-worker", "reaped").await.unwrap();
    assert!(released);

    let after_release = repo.get(job_id).await.unwrap().unwrap();
    assert_eq!(after_release.attempts, 0, "reaping must not consume a retry attempt");

    // A live worker claims the now-pending row.
    let reclaimed = repo.claim_pending("live-worker").await.unwrap().unwrap();
    assert_eq!(reclaimed.worker_id.as_deref(), Some("live-worker"));

    // The original, now-stale holder can no longer complete it.
    let stale_completion = repo
        .complete_extraction(job_id, "dead-worker", "artifact.pdf")
        .await
        .unwrap();
    assert!(!stale_completion, "a stale worker_id must not be able to complete a reclaimed job");
}

/// P3: completion is conditional on the caller still being the row's
/// `worker_id`; a second completion call (e.g. a retried RPC) is a no-op,
/// not a double-apply.
#[tokio::test]
async fn complete_extraction_is_idempotent_per_worker() {
    let repo = MemoryJobRepository::new();
    let job_id = repo.seed(sample_job()).await;
    repo.claim_pending("worker-a").await.unwrap();

    let first = repo
        .complete_extraction(job_id, "worker-a", "artifact.pdf")
        .await
        .unwrap();
    assert!(first);

    // worker_id was cleared on completion, so a second call from the same
    // worker (e.g. a retried RPC after the response was lost) is a no-op.
    let second = repo
        .complete_extraction(job_id, "worker-a", "artifact.pdf")
        .await
        .unwrap();
    assert!(!second, "completion must not double-apply");

    let job = repo.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::ExtractionComplete);
}

/// P4: credential selection always prefers a never-used credential over a
/// previously-used one, and among used credentials prefers the
/// least-recently-used, so load fans out evenly rather than piling onto
/// whichever credential happens to sort first.
#[tokio::test]
async fn credential_selection_prefers_never_used_then_oldest() {
    let repo = MemoryCredentialRepository::new();

    let mut used = Credential::new("used", "user-used", "secret");
    used.last_used = Some(chrono::Utc::now());
    repo.seed(used).await;

    let never_used = Credential::new("never-used", "user-fresh", "secret");
    repo.seed(never_used).await;

    let chosen = repo.select_for_worker("worker-a").await.unwrap().unwrap();
    assert_eq!(chosen.id, "never-used");

    // Once every credential has been used, the least-recently-used one wins.
    repo.record_success("never-used").await.unwrap();
    let chosen = repo.select_for_worker("worker-b").await.unwrap().unwrap();
    assert_eq!(chosen.id, "used", "the credential used longest ago should win once both have history");
}

/// Credentials past the failure ceiling are excluded from selection
/// entirely, even if they would otherwise be the least-recently-used.
#[tokio::test]
async fn credential_selection_excludes_locked_out_credentials() {
    let repo = MemoryCredentialRepository::new();
    repo.seed(Credential::new("flaky", "user-flaky", "secret")).await;

    for _ in 0..3 {
        repo.record_failure("flaky").await.unwrap();
    }

    let chosen = repo.select_for_worker("worker-a").await.unwrap();
    assert!(chosen.is_none(), "a credential with 3+ failures must not be selectable");
}

/// A business-registry session only reports claimable once the
/// candidate-listing step has completed, independent of status.
#[test]
fn session_is_claimable_only_after_req_completed() {
    let mut session = BusinessRegistrySession::new("session-1");
    assert!(!session.is_claimable());

    session.req_completed = true;
    assert!(session.is_claimable());

    session.status = SessionStatus::Processing;
    assert!(!session.is_claimable(), "claimable requires PendingCompanySelection, not just req_completed");
}

/// Terminal search statuses are exactly the ones a session-closing check
/// should treat as "done" (spec §3 session invariant).
#[test]
fn search_terminal_statuses_match_session_close_invariant() {
    use greffier::models::SearchStatus;

    let mut search = PersonalRightsSearch::new("search-1", "session-1", "Jane Doe");
    assert!(!search.status.is_terminal());

    for status in [SearchStatus::Completed, SearchStatus::Failed, SearchStatus::NotFound] {
        search.status = status;
        assert!(search.status.is_terminal());
    }

    search.status = SearchStatus::InProgress;
    assert!(!search.status.is_terminal());
}
