//! Repository layer: one trait per entity (spec §3), a Diesel/Postgres-backed
//! implementation per environment, and an in-memory fake used by the test
//! suite for the race/fairness properties in spec §8.
//!
//! Grounded on `monokrome-foiacquire/src/repository/diesel_crawl/queue.rs`
//! (`claim_pending_url`'s transactional conditional-update pattern) and
//! `src/repository/pool.rs` (backend-agnostic connection pooling).

mod diesel_impl;
pub mod memory;
mod pool;
mod schema;

pub use diesel_impl::DieselRepositories;
pub use pool::PgPool;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    BusinessRegistrySession, Credential, ExtractionJob, JobStatus, OcrSubKind,
    PersonalRightsSearch, WorkerStatus,
};

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("database error: {0}")]
    Database(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type ClaimResult<T> = Result<T, ClaimError>;

impl From<pool::DbError> for ClaimError {
    fn from(e: pool::DbError) -> Self {
        ClaimError::Database(e.to_string())
    }
}

/// Atomic claim + lifecycle operations on the extraction queue (spec §4.2).
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// `UPDATE ... SET status = processing ... WHERE status = pending AND
    /// worker_id IS NULL RETURNING *` (spec §4.2). Returns `None` if no
    /// pending job existed or another worker won the race.
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<ExtractionJob>>;

    /// `extraction-complete -> ocr-in-progress` for the given sub-type
    /// (spec §4.8). Only jobs whose kind maps to `sub_kind` are considered.
    async fn claim_for_ocr(
        &self,
        worker_id: &str,
        sub_kind: OcrSubKind,
    ) -> ClaimResult<Option<ExtractionJob>>;

    /// Claims one job by ID regardless of queue order, for the
    /// `process-queue` CLI utility (spec §6). Still conditional on
    /// `worker_id IS NULL` so it can't steal a row a live worker already
    /// holds; advances `pending -> processing` or
    /// `extraction-complete -> ocr-in-progress` depending on the row's
    /// current status, mirroring `claim_pending`/`claim_for_ocr`.
    async fn claim_specific(&self, worker_id: &str, job_id: i64) -> ClaimResult<Option<ExtractionJob>>;

    /// Conditional on `worker_id = :worker_id`, so a stale caller (e.g. after
    /// a reap) cannot clobber a legitimate reclaim (spec §4.2, P3).
    async fn complete_extraction(
        &self,
        job_id: i64,
        worker_id: &str,
        artifact_path: &str,
    ) -> ClaimResult<bool>;

    /// On failure: retriable -> back to `pending` with `attempts += 1`;
    /// terminal -> `error` (spec §4.2).
    async fn fail_extraction(
        &self,
        job_id: i64,
        worker_id: &str,
        retriable: bool,
        message: &str,
        screenshot: Option<&str>,
    ) -> ClaimResult<bool>;

    /// Releases a job held by a worker the reaper has declared dead (spec
    /// §4.5 step 1): `status := pending`, `worker_id := null`,
    /// `processing_started_at := null`, plus an error-message marker. Unlike
    /// [`Self::fail_extraction`] this does not consume a retry attempt — the
    /// job was never actually driven to failure, it was simply orphaned.
    async fn release_orphaned(&self, job_id: i64, worker_id: &str, message: &str) -> ClaimResult<bool>;

    async fn complete_ocr(
        &self,
        job_id: i64,
        worker_id: &str,
        raw_content: &str,
        structured: serde_json::Value,
        flagged_incomplete: bool,
    ) -> ClaimResult<bool>;

    /// Document-level OCR failure: `ocr_attempts += 1`, back to
    /// `extraction-complete` if `ocr_attempts < ocr_max_attempts` (spec §4.9).
    async fn fail_ocr(&self, job_id: i64, worker_id: &str, message: &str) -> ClaimResult<bool>;

    async fn get(&self, job_id: i64) -> ClaimResult<Option<ExtractionJob>>;

    /// Queue depth per OCR sub-type, used by the pool rebalancer (spec §4.8, P7).
    async fn ocr_queue_depth(&self, sub_kind: OcrSubKind) -> ClaimResult<u64>;

    async fn status_of(&self, job_id: i64) -> ClaimResult<Option<JobStatus>>;
}

/// Business-registry sessions (spec §3 "Session").
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<BusinessRegistrySession>>;
    async fn complete(&self, session_id: &str, worker_id: &str) -> ClaimResult<bool>;
    async fn fail(&self, session_id: &str, worker_id: &str, message: &str) -> ClaimResult<bool>;
    async fn get(&self, session_id: &str) -> ClaimResult<Option<BusinessRegistrySession>>;
    /// Re-evaluate whether all children are terminal and, if so, close the
    /// session (spec §3 session invariant).
    async fn close_if_all_children_terminal(&self, session_id: &str) -> ClaimResult<bool>;
}

/// Personal/movable rights searches (spec §3 "PersonalRightsSearch").
#[async_trait]
pub trait PersonalRightsRepository: Send + Sync {
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<PersonalRightsSearch>>;
    async fn complete(
        &self,
        search_id: &str,
        worker_id: &str,
        artifact_path: &str,
    ) -> ClaimResult<bool>;
    async fn not_found(&self, search_id: &str, worker_id: &str) -> ClaimResult<bool>;
    async fn fail(&self, search_id: &str, worker_id: &str, message: &str) -> ClaimResult<bool>;
    async fn all_terminal_for_session(&self, session_id: &str) -> ClaimResult<bool>;
}

/// Worker liveness (spec §3 "WorkerStatus", §4.5).
#[async_trait]
pub trait WorkerStatusRepository: Send + Sync {
    async fn heartbeat(&self, status: &WorkerStatus) -> ClaimResult<()>;
    async fn mark_offline(&self, worker_id: &str) -> ClaimResult<()>;
    /// Rows with `last_heartbeat` older than `dead_threshold`.
    async fn list_dead(&self, dead_threshold: chrono::Duration) -> ClaimResult<Vec<WorkerStatus>>;
    async fn get(&self, worker_id: &str) -> ClaimResult<Option<WorkerStatus>>;
}

/// Registry login credentials (spec §3 "Credential", §4.3).
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Least-recently-used among eligible, never-used preferred (spec §4.3).
    async fn select_for_worker(&self, worker_id: &str) -> ClaimResult<Option<Credential>>;
    async fn record_success(&self, credential_id: &str) -> ClaimResult<()>;
    /// Returns the credential's failure count after incrementing.
    async fn record_failure(&self, credential_id: &str) -> ClaimResult<u32>;
}

/// Bundles one environment's repositories behind a single handle so the
/// worker doesn't need five separate `Arc`s per environment.
pub trait Repositories: Send + Sync {
    fn jobs(&self) -> &dyn JobRepository;
    fn sessions(&self) -> &dyn SessionRepository;
    fn personal_rights(&self) -> &dyn PersonalRightsRepository;
    fn worker_status(&self) -> &dyn WorkerStatusRepository;
    fn credentials(&self) -> &dyn CredentialRepository;

    /// Release a job held by a dead worker, scanning this one environment
    /// (spec §4.5 step 1). The reaper calls this across every registered
    /// environment since the dead worker's environment isn't tracked
    /// directly (spec §9 open question on the O(E) scan).
    fn jobs_for_reap(&self) -> &dyn JobRepository {
        self.jobs()
    }
}
