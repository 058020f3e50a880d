//! Unified worker loop (spec §4.4): single-threaded cooperative poll over
//! every environment in priority order, claiming extraction jobs first,
//! then business-registry sessions, then personal-rights searches.

pub mod heartbeat;
pub mod reaper;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::browser::BrowserSessionManager;
use crate::environment::EnvironmentRegistry;
use crate::error::ErrorKind;
use crate::models::{
    BusinessRegistrySession, Credential, EnvironmentName, ExtractionJob, JobKind, PersonalRightsSearch,
    WorkerIdentity, WorkerState,
};
use crate::site_driver::{DriverError, SearchDriver, SessionDriver, SiteDriver};

/// Credential failures at or above this count lock the credential out of
/// selection entirely (mirrors `CredentialRepository::select_for_worker`'s
/// eligibility cutoff, spec §4.3).
const CREDENTIAL_FAILURE_CEILING: u32 = 3;

/// Drivers keyed by document kind, one [`SiteDriver`] implementation per
/// registry (spec §4.7: "each registry is one implementation"). The
/// business-registry and personal-rights slots are `None` until a concrete
/// driver is registered; the worker loop only claims from a queue it has a
/// driver for, so an unpopulated slot never strands a row mid-flight.
pub struct DriverRegistry {
    pub extraction: HashMap<JobKind, Arc<dyn SiteDriver>>,
    pub business_registry: Option<Arc<dyn SessionDriver>>,
    pub personal_rights: Option<Arc<dyn SearchDriver>>,
}

pub struct Worker {
    identity: WorkerIdentity,
    environments: Arc<EnvironmentRegistry>,
    drivers: DriverRegistry,
    browser: BrowserSessionManager,
    poll_interval: Duration,
    shutdown_hard_deadline: Duration,
    state: Arc<Mutex<WorkerState>>,
    current_job_id: Arc<Mutex<Option<String>>>,
    credential: Arc<Mutex<Option<Credential>>>,
    /// Cumulative counters reported on every heartbeat (spec §3 "WorkerStatus").
    jobs_completed: Arc<std::sync::atomic::AtomicU64>,
    jobs_failed: Arc<std::sync::atomic::AtomicU64>,
    /// Set once the held credential is reported ineligible mid-run (spec
    /// §4.3: "a worker whose credential becomes ineligible mid-run MUST stop
    /// and report error"). Checked by [`Self::run`] on every iteration.
    stop_requested: AtomicBool,
}

impl Worker {
    pub fn new(
        identity: WorkerIdentity,
        environments: Arc<EnvironmentRegistry>,
        drivers: DriverRegistry,
        browser_idle_timeout: Duration,
        poll_interval: Duration,
        shutdown_hard_deadline: Duration,
    ) -> Self {
        Self {
            identity,
            environments,
            drivers,
            browser: BrowserSessionManager::new(browser_idle_timeout),
            poll_interval,
            shutdown_hard_deadline,
            state: Arc::new(Mutex::new(WorkerState::Idle)),
            current_job_id: Arc::new(Mutex::new(None)),
            credential: Arc::new(Mutex::new(None)),
            jobs_completed: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            jobs_failed: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Selects a credential per spec §4.3 from the first environment that
    /// has one available. A worker whose credential becomes ineligible
    /// mid-run stops claiming further work; see
    /// [`Self::record_login_outcome`].
    async fn ensure_credential(&self, env_name: EnvironmentName) -> anyhow::Result<()> {
        let mut slot = self.credential.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let Some(handle) = self.environments.get(env_name) else {
            return Ok(());
        };
        *slot = handle.repositories.credentials().select_for_worker(&self.identity.as_str()).await?;
        Ok(())
    }

    /// Records the outcome of a login attempt against the currently held
    /// credential. On failure, if the credential has now crossed the
    /// eligibility ceiling, the worker stops claiming further work and
    /// reports `error` (spec §4.3: "a worker whose credential becomes
    /// ineligible mid-run MUST stop and report error") rather than silently
    /// picking up a new credential on the next tick.
    async fn record_login_outcome(&self, env_name: EnvironmentName, success: bool) {
        let slot = self.credential.lock().await;
        let Some(credential) = slot.as_ref() else { return };
        let Some(handle) = self.environments.get(env_name) else { return };

        if success {
            let _ = handle.repositories.credentials().record_success(&credential.id).await;
            return;
        }

        match handle.repositories.credentials().record_failure(&credential.id).await {
            Ok(failures) if failures >= CREDENTIAL_FAILURE_CEILING => {
                tracing::error!(
                    credential_id = %credential.id,
                    failures,
                    "credential became ineligible mid-run, stopping worker"
                );
                self.stop_requested.store(true, Ordering::Release);
                *self.state.lock().await = WorkerState::Error;
            }
            Ok(_) => {}
            Err(e) => tracing::error!(credential_id = %credential.id, error = %e, "failed to record login failure"),
        }
    }

    /// Runs the loop until `shutdown` fires, honoring the hard abandon
    /// deadline (spec §4.4 "Cancellation").
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() || self.stop_requested.load(Ordering::Acquire) {
                break;
            }

            match self.tick().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "worker tick failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// One tick of the loop (spec §4.4 steps 2-6). Returns `true` if a job
    /// was claimed and processed in any environment.
    async fn tick(&self) -> anyhow::Result<bool> {
        for env_name in self.environments.list_environments() {
            let Some(handle) = self.environments.get(env_name) else { continue };

            if let Some(job) = handle.repositories.jobs().claim_pending(&self.identity.as_str()).await? {
                self.process_extraction_job(env_name, job).await;
                return Ok(true);
            }

            if let Some(driver) = self.drivers.business_registry.clone() {
                if let Some(session) = handle
                    .repositories
                    .sessions()
                    .claim_pending(&self.identity.as_str())
                    .await?
                {
                    self.process_session(env_name, session, driver).await;
                    return Ok(true);
                }
            }

            if let Some(driver) = self.drivers.personal_rights.clone() {
                if let Some(search) = handle
                    .repositories
                    .personal_rights()
                    .claim_pending(&self.identity.as_str())
                    .await?
                {
                    self.process_search(env_name, search, driver).await;
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Shared with [`heartbeat::spawn`] so the CLI can report this worker's
    /// state into every configured environment's `worker_status` table
    /// (spec §4.5 — there is no single "home" environment for a worker).
    pub fn state_handle(&self) -> Arc<Mutex<WorkerState>> {
        self.state.clone()
    }

    pub fn current_job_handle(&self) -> Arc<Mutex<Option<String>>> {
        self.current_job_id.clone()
    }

    pub fn credential_handle(&self) -> Arc<Mutex<Option<Credential>>> {
        self.credential.clone()
    }

    pub fn jobs_completed_handle(&self) -> Arc<std::sync::atomic::AtomicU64> {
        self.jobs_completed.clone()
    }

    pub fn jobs_failed_handle(&self) -> Arc<std::sync::atomic::AtomicU64> {
        self.jobs_failed.clone()
    }

    /// Processes one already-claimed extraction job end to end: credential
    /// selection, driver dispatch, and completion/failure recording. Public
    /// so the `process-queue` CLI utility can drive a single job claimed via
    /// `claim_specific` through the same path the normal loop uses.
    pub async fn process_extraction_job(&self, env_name: EnvironmentName, job: ExtractionJob) {
        *self.current_job_id.lock().await = Some(job.id.to_string());
        *self.state.lock().await = WorkerState::Busy;

        if let Err(e) = self.ensure_credential(env_name).await {
            tracing::error!(job_id = job.id, error = %e, "credential selection failed");
        }

        let Some(handle) = self.environments.get(env_name) else { return };
        let Some(driver) = self.drivers.extraction.get(&job.kind).cloned() else {
            tracing::error!(job_id = job.id, kind = ?job.kind, "no site driver registered for kind");
            *self.state.lock().await = WorkerState::Idle;
            return;
        };

        let credential = self.credential.lock().await.clone();
        let outcome = self.drive_job(driver, &job, credential.as_ref()).await;

        match outcome {
            Ok(artifact) => {
                self.record_login_outcome(env_name, true).await;
                self.jobs_completed.fetch_add(1, Ordering::Relaxed);
                let _ = handle
                    .repositories
                    .jobs()
                    .complete_extraction(job.id, &self.identity.as_str(), &artifact.filename)
                    .await;
            }
            Err(driver_err) => {
                if driver_err.penalizes_credential() {
                    self.record_login_outcome(env_name, false).await;
                }
                self.jobs_failed.fetch_add(1, Ordering::Relaxed);
                let kind = classify_driver_error(&driver_err);
                let message = kind.canonical_message(&driver_err.to_string());
                let _ = handle
                    .repositories
                    .jobs()
                    .fail_extraction(job.id, &self.identity.as_str(), kind.is_retriable(), &message, None)
                    .await;
            }
        }

        *self.current_job_id.lock().await = None;
        *self.state.lock().await = WorkerState::Idle;
    }

    async fn drive_job(
        &self,
        driver: Arc<dyn SiteDriver>,
        job: &ExtractionJob,
        credential: Option<&Credential>,
    ) -> Result<crate::site_driver::DriverArtifact, DriverError> {
        let mut session = self.browser.acquire().await.map_err(|e| DriverError::Infrastructure(e.to_string()))?;

        if session.credential_id.is_none() {
            if let Some(credential) = credential {
                if let Err(e) = driver.login(&mut session, credential).await {
                    drop(session);
                    self.browser.teardown().await;
                    return Err(e);
                }
                session.credential_id = Some(credential.id.clone());
            }
        }

        match driver.execute(&mut session, job).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                let _ = session.screenshot().await;
                drop(session);
                self.browser.teardown().await;
                Err(e)
            }
        }
    }

    /// Drives a claimed business-registry session's candidate-selection
    /// step through completion/failure and re-checks the parent session's
    /// close invariant (spec §3: terminal only once every child search is
    /// terminal, so this is mostly a no-op here and matters once the child
    /// searches it spawns complete).
    async fn process_session(
        &self,
        env_name: EnvironmentName,
        session_row: BusinessRegistrySession,
        driver: Arc<dyn SessionDriver>,
    ) {
        *self.current_job_id.lock().await = Some(session_row.id.clone());
        *self.state.lock().await = WorkerState::Busy;

        if let Err(e) = self.ensure_credential(env_name).await {
            tracing::error!(session_id = %session_row.id, error = %e, "credential selection failed");
        }

        let Some(handle) = self.environments.get(env_name) else { return };
        let credential = self.credential.lock().await.clone();
        let outcome = self.drive_session(driver, &session_row, credential.as_ref()).await;

        match outcome {
            Ok(()) => {
                self.record_login_outcome(env_name, true).await;
                self.jobs_completed.fetch_add(1, Ordering::Relaxed);
                let _ = handle
                    .repositories
                    .sessions()
                    .complete(&session_row.id, &self.identity.as_str())
                    .await;
            }
            Err(driver_err) => {
                if driver_err.penalizes_credential() {
                    self.record_login_outcome(env_name, false).await;
                }
                self.jobs_failed.fetch_add(1, Ordering::Relaxed);
                let kind = classify_driver_error(&driver_err);
                let message = kind.canonical_message(&driver_err.to_string());
                let _ = handle
                    .repositories
                    .sessions()
                    .fail(&session_row.id, &self.identity.as_str(), &message)
                    .await;
            }
        }

        let _ = handle.repositories.sessions().close_if_all_children_terminal(&session_row.id).await;

        *self.current_job_id.lock().await = None;
        *self.state.lock().await = WorkerState::Idle;
    }

    async fn drive_session(
        &self,
        driver: Arc<dyn SessionDriver>,
        session_row: &BusinessRegistrySession,
        credential: Option<&Credential>,
    ) -> Result<(), DriverError> {
        let mut session = self.browser.acquire().await.map_err(|e| DriverError::Infrastructure(e.to_string()))?;

        if session.credential_id.is_none() {
            if let Some(credential) = credential {
                if let Err(e) = driver.login(&mut session, credential).await {
                    drop(session);
                    self.browser.teardown().await;
                    return Err(e);
                }
                session.credential_id = Some(credential.id.clone());
            }
        }

        match driver.execute(&mut session, session_row).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = session.screenshot().await;
                drop(session);
                self.browser.teardown().await;
                Err(e)
            }
        }
    }

    /// Drives a claimed personal-rights search through completion,
    /// not-found, or failure, then re-checks whether the parent session can
    /// now close (spec §3, scenario S6).
    async fn process_search(&self, env_name: EnvironmentName, search: PersonalRightsSearch, driver: Arc<dyn SearchDriver>) {
        *self.current_job_id.lock().await = Some(search.id.clone());
        *self.state.lock().await = WorkerState::Busy;

        if let Err(e) = self.ensure_credential(env_name).await {
            tracing::error!(search_id = %search.id, error = %e, "credential selection failed");
        }

        let Some(handle) = self.environments.get(env_name) else { return };
        let credential = self.credential.lock().await.clone();
        let outcome = self.drive_search(driver, &search, credential.as_ref()).await;

        match outcome {
            Ok(artifact) => {
                self.record_login_outcome(env_name, true).await;
                self.jobs_completed.fetch_add(1, Ordering::Relaxed);
                let _ = handle
                    .repositories
                    .personal_rights()
                    .complete(&search.id, &self.identity.as_str(), &artifact.filename)
                    .await;
            }
            Err(DriverError::NotFound(_)) => {
                self.jobs_completed.fetch_add(1, Ordering::Relaxed);
                let _ = handle.repositories.personal_rights().not_found(&search.id, &self.identity.as_str()).await;
            }
            Err(driver_err) => {
                if driver_err.penalizes_credential() {
                    self.record_login_outcome(env_name, false).await;
                }
                self.jobs_failed.fetch_add(1, Ordering::Relaxed);
                let kind = classify_driver_error(&driver_err);
                let message = kind.canonical_message(&driver_err.to_string());
                let _ = handle
                    .repositories
                    .personal_rights()
                    .fail(&search.id, &self.identity.as_str(), &message)
                    .await;
            }
        }

        let _ = handle.repositories.sessions().close_if_all_children_terminal(&search.session_id).await;

        *self.current_job_id.lock().await = None;
        *self.state.lock().await = WorkerState::Idle;
    }

    async fn drive_search(
        &self,
        driver: Arc<dyn SearchDriver>,
        search: &PersonalRightsSearch,
        credential: Option<&Credential>,
    ) -> Result<crate::site_driver::DriverArtifact, DriverError> {
        let mut session = self.browser.acquire().await.map_err(|e| DriverError::Infrastructure(e.to_string()))?;

        if session.credential_id.is_none() {
            if let Some(credential) = credential {
                if let Err(e) = driver.login(&mut session, credential).await {
                    drop(session);
                    self.browser.teardown().await;
                    return Err(e);
                }
                session.credential_id = Some(credential.id.clone());
            }
        }

        match driver.execute(&mut session, search).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                let _ = session.screenshot().await;
                drop(session);
                self.browser.teardown().await;
                Err(e)
            }
        }
    }
}

/// Maps a [`DriverError`] to the stable [`ErrorKind`] taxonomy (spec §4.7, §7).
fn classify_driver_error(e: &DriverError) -> ErrorKind {
    match e {
        DriverError::Transient(_) => ErrorKind::TransientNetwork,
        DriverError::Infrastructure(_) => ErrorKind::Infrastructure,
        DriverError::LoginFailed(_) => ErrorKind::LoginFailed,
        DriverError::NotFound(_) => ErrorKind::NotFound,
        DriverError::Permanent(_) => ErrorKind::BadInput,
        DriverError::AccountLocked(_) => ErrorKind::LoginFailed,
    }
}
