//! In-memory fakes for the five repository traits, used by the integration
//! tests covering the race/fairness properties in spec §8 (P1-P4) without a
//! live Postgres instance. Each fake enforces the same conditional-update
//! invariants as the Diesel implementations (claim-then-verify-owner) so a
//! test exercising the fake exercises the real contract, not a shortcut.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::models::{
    BusinessRegistrySession, Credential, ExtractionJob, JobStatus, OcrSubKind,
    PersonalRightsSearch, SearchStatus, SessionStatus, WorkerState, WorkerStatus,
};

use super::{
    ClaimError, ClaimResult, CredentialRepository, JobRepository, PersonalRightsRepository,
    Repositories, SessionRepository, WorkerStatusRepository,
};

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<HashMap<i64, ExtractionJob>>,
    next_id: AtomicI64,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a job and returns its assigned ID, for test setup.
    pub async fn seed(&self, mut job: ExtractionJob) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        job.id = id;
        self.jobs.lock().await.insert(id, job);
        id
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<ExtractionJob>> {
        let mut jobs = self.jobs.lock().await;
        let candidate = jobs
            .values_mut()
            .find(|j| j.status == JobStatus::Pending && j.worker_id.is_none());

        let Some(job) = candidate else { return Ok(None) };
        job.status = JobStatus::Processing;
        job.worker_id = Some(worker_id.to_string());
        job.processing_started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn claim_for_ocr(&self, worker_id: &str, sub_kind: OcrSubKind) -> ClaimResult<Option<ExtractionJob>> {
        let mut jobs = self.jobs.lock().await;
        let candidate = jobs.values_mut().find(|j| {
            j.status == JobStatus::ExtractionComplete
                && j.worker_id.is_none()
                && j.ocr_sub_kind() == Some(sub_kind)
        });

        let Some(job) = candidate else { return Ok(None) };
        job.status = JobStatus::OcrInProgress;
        job.worker_id = Some(worker_id.to_string());
        job.ocr_started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn claim_specific(&self, worker_id: &str, job_id: i64) -> ClaimResult<Option<ExtractionJob>> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(None) };
        if job.worker_id.is_some() {
            return Ok(None);
        }

        match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.worker_id = Some(worker_id.to_string());
                job.processing_started_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            JobStatus::ExtractionComplete => {
                job.status = JobStatus::OcrInProgress;
                job.worker_id = Some(worker_id.to_string());
                job.ocr_started_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_extraction(&self, job_id: i64, worker_id: &str, artifact_path: &str) -> ClaimResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(false) };
        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        job.status = JobStatus::ExtractionComplete;
        job.artifact_path = Some(artifact_path.to_string());
        job.completed_at = Some(Utc::now());
        job.worker_id = None;
        Ok(true)
    }

    async fn fail_extraction(
        &self,
        job_id: i64,
        worker_id: &str,
        retriable: bool,
        message: &str,
        screenshot: Option<&str>,
    ) -> ClaimResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(false) };
        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }

        job.attempts += 1;
        job.last_error = Some(message.to_string());
        job.error_screenshot = screenshot.map(|s| s.to_string());
        job.worker_id = None;

        if retriable && job.attempts < job.max_attempts {
            job.status = JobStatus::Pending;
        } else {
            job.status = JobStatus::Error;
        }
        Ok(true)
    }

    async fn release_orphaned(&self, job_id: i64, worker_id: &str, message: &str) -> ClaimResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(false) };
        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }

        job.status = JobStatus::Pending;
        job.worker_id = None;
        job.processing_started_at = None;
        job.last_error = Some(message.to_string());
        Ok(true)
    }

    async fn complete_ocr(
        &self,
        job_id: i64,
        worker_id: &str,
        raw_content: &str,
        structured: serde_json::Value,
        flagged_incomplete: bool,
    ) -> ClaimResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(false) };
        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        job.status = JobStatus::OcrComplete;
        job.raw_ocr_content = Some(raw_content.to_string());
        job.structured_content = Some(structured);
        job.ocr_flagged_incomplete = flagged_incomplete;
        job.ocr_completed_at = Some(Utc::now());
        job.worker_id = None;
        Ok(true)
    }

    async fn fail_ocr(&self, job_id: i64, worker_id: &str, message: &str) -> ClaimResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(false) };
        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }

        job.ocr_attempts += 1;
        job.last_error = Some(message.to_string());
        job.worker_id = None;

        if job.ocr_attempts < job.ocr_max_attempts {
            job.status = JobStatus::ExtractionComplete;
        } else {
            job.status = JobStatus::Error;
        }
        Ok(true)
    }

    async fn get(&self, job_id: i64) -> ClaimResult<Option<ExtractionJob>> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn ocr_queue_depth(&self, sub_kind: OcrSubKind) -> ClaimResult<u64> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::ExtractionComplete && j.ocr_sub_kind() == Some(sub_kind))
            .count() as u64)
    }

    async fn status_of(&self, job_id: i64) -> ClaimResult<Option<JobStatus>> {
        Ok(self.jobs.lock().await.get(&job_id).map(|j| j.status))
    }
}

type SearchMap = Arc<Mutex<HashMap<String, PersonalRightsSearch>>>;

pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<String, BusinessRegistrySession>>,
    searches: SearchMap,
}

impl MemorySessionRepository {
    pub fn new(searches: SearchMap) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            searches,
        }
    }

    pub async fn seed(&self, session: BusinessRegistrySession) {
        self.sessions.lock().await.insert(session.id.clone(), session);
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<BusinessRegistrySession>> {
        let mut sessions = self.sessions.lock().await;
        let candidate = sessions.values_mut().find(|s| s.is_claimable() && s.worker_id.is_none());
        let Some(session) = candidate else { return Ok(None) };
        session.status = SessionStatus::Processing;
        session.worker_id = Some(worker_id.to_string());
        Ok(Some(session.clone()))
    }

    async fn complete(&self, session_id: &str, worker_id: &str) -> ClaimResult<bool> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(session_id) else { return Ok(false) };
        if session.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        session.status = SessionStatus::Completed;
        session.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn fail(&self, session_id: &str, worker_id: &str, message: &str) -> ClaimResult<bool> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(session_id) else { return Ok(false) };
        if session.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        session.status = SessionStatus::Error;
        session.last_error = Some(message.to_string());
        session.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn get(&self, session_id: &str) -> ClaimResult<Option<BusinessRegistrySession>> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn close_if_all_children_terminal(&self, session_id: &str) -> ClaimResult<bool> {
        let all_terminal = {
            let searches = self.searches.lock().await;
            let children: Vec<_> = searches.values().filter(|s| s.session_id == session_id).collect();
            !children.is_empty() && children.iter().all(|s| s.status.is_terminal())
        };

        if !all_terminal {
            return Ok(false);
        }

        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(session_id) else { return Ok(false) };
        if session.status == SessionStatus::Completed || session.status == SessionStatus::Error {
            return Ok(false);
        }
        session.status = SessionStatus::Completed;
        session.completed_at = Some(Utc::now());
        Ok(true)
    }
}

pub struct MemoryPersonalRightsRepository {
    searches: SearchMap,
}

impl MemoryPersonalRightsRepository {
    pub fn new(searches: SearchMap) -> Self {
        Self { searches }
    }

    pub async fn seed(&self, search: PersonalRightsSearch) {
        self.searches.lock().await.insert(search.id.clone(), search);
    }
}

#[async_trait]
impl PersonalRightsRepository for MemoryPersonalRightsRepository {
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<PersonalRightsSearch>> {
        let mut searches = self.searches.lock().await;
        let candidate = searches
            .values_mut()
            .find(|s| s.status == SearchStatus::Pending && s.worker_id.is_none());
        let Some(search) = candidate else { return Ok(None) };
        search.status = SearchStatus::InProgress;
        search.worker_id = Some(worker_id.to_string());
        Ok(Some(search.clone()))
    }

    async fn complete(&self, search_id: &str, worker_id: &str, artifact_path: &str) -> ClaimResult<bool> {
        let mut searches = self.searches.lock().await;
        let Some(search) = searches.get_mut(search_id) else { return Ok(false) };
        if search.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        search.status = SearchStatus::Completed;
        search.artifact_path = Some(artifact_path.to_string());
        search.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn not_found(&self, search_id: &str, worker_id: &str) -> ClaimResult<bool> {
        let mut searches = self.searches.lock().await;
        let Some(search) = searches.get_mut(search_id) else { return Ok(false) };
        if search.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        search.status = SearchStatus::NotFound;
        search.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn fail(&self, search_id: &str, worker_id: &str, message: &str) -> ClaimResult<bool> {
        let mut searches = self.searches.lock().await;
        let Some(search) = searches.get_mut(search_id) else { return Ok(false) };
        if search.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        search.status = SearchStatus::Failed;
        search.last_error = Some(message.to_string());
        search.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn all_terminal_for_session(&self, session_id: &str) -> ClaimResult<bool> {
        let searches = self.searches.lock().await;
        let children: Vec<_> = searches.values().filter(|s| s.session_id == session_id).collect();
        Ok(!children.is_empty() && children.iter().all(|s| s.status.is_terminal()))
    }
}

#[derive(Default)]
pub struct MemoryWorkerStatusRepository {
    statuses: Mutex<HashMap<String, WorkerStatus>>,
}

impl MemoryWorkerStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerStatusRepository for MemoryWorkerStatusRepository {
    async fn heartbeat(&self, status: &WorkerStatus) -> ClaimResult<()> {
        self.statuses.lock().await.insert(status.worker_id.clone(), status.clone());
        Ok(())
    }

    async fn mark_offline(&self, worker_id: &str) -> ClaimResult<()> {
        if let Some(status) = self.statuses.lock().await.get_mut(worker_id) {
            status.state = WorkerState::Offline;
        }
        Ok(())
    }

    async fn list_dead(&self, dead_threshold: chrono::Duration) -> ClaimResult<Vec<WorkerStatus>> {
        let now = Utc::now();
        Ok(self
            .statuses
            .lock()
            .await
            .values()
            .filter(|s| s.state != WorkerState::Offline && s.is_dead(now, dead_threshold))
            .cloned()
            .collect())
    }

    async fn get(&self, worker_id: &str) -> ClaimResult<Option<WorkerStatus>> {
        Ok(self.statuses.lock().await.get(worker_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryCredentialRepository {
    credentials: Mutex<HashMap<String, Credential>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, credential: Credential) {
        self.credentials.lock().await.insert(credential.id.clone(), credential);
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn select_for_worker(&self, _worker_id: &str) -> ClaimResult<Option<Credential>> {
        let credentials = self.credentials.lock().await;
        // `None` sorts before `Some`, so never-used credentials win first;
        // among used ones, the oldest `last_used` wins (spec §4.3 LRU).
        let chosen = credentials.values().filter(|c| c.is_eligible()).min_by_key(|c| c.last_used);
        Ok(chosen.cloned())
    }

    async fn record_success(&self, credential_id: &str) -> ClaimResult<()> {
        if let Some(c) = self.credentials.lock().await.get_mut(credential_id) {
            c.last_used = Some(Utc::now());
            c.failures = 0;
        }
        Ok(())
    }

    async fn record_failure(&self, credential_id: &str) -> ClaimResult<u32> {
        let mut credentials = self.credentials.lock().await;
        let Some(c) = credentials.get_mut(credential_id) else {
            return Err(ClaimError::NotFound(credential_id.to_string()));
        };
        c.failures += 1;
        Ok(c.failures)
    }
}

/// Bundles the five in-memory fakes behind one [`Repositories`] handle, the
/// same shape [`super::DieselRepositories`] presents for a real environment.
pub struct MemoryRepositories {
    pub jobs: Arc<MemoryJobRepository>,
    pub sessions: Arc<MemorySessionRepository>,
    pub personal_rights: Arc<MemoryPersonalRightsRepository>,
    pub worker_status: Arc<MemoryWorkerStatusRepository>,
    pub credentials: Arc<MemoryCredentialRepository>,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        let searches: SearchMap = Arc::new(Mutex::new(HashMap::new()));
        Self {
            jobs: Arc::new(MemoryJobRepository::new()),
            sessions: Arc::new(MemorySessionRepository::new(searches.clone())),
            personal_rights: Arc::new(MemoryPersonalRightsRepository::new(searches)),
            worker_status: Arc::new(MemoryWorkerStatusRepository::new()),
            credentials: Arc::new(MemoryCredentialRepository::new()),
        }
    }
}

impl Default for MemoryRepositories {
    fn default() -> Self {
        Self::new()
    }
}

impl Repositories for MemoryRepositories {
    fn jobs(&self) -> &dyn JobRepository {
        self.jobs.as_ref()
    }

    fn sessions(&self) -> &dyn SessionRepository {
        self.sessions.as_ref()
    }

    fn personal_rights(&self) -> &dyn PersonalRightsRepository {
        self.personal_rights.as_ref()
    }

    fn worker_status(&self) -> &dyn WorkerStatusRepository {
        self.worker_status.as_ref()
    }

    fn credentials(&self) -> &dyn CredentialRepository {
        self.credentials.as_ref()
    }
}
