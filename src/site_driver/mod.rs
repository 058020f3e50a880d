//! Site driver contract (spec §4.7): a capability the worker loop requires,
//! not something the core implements. One implementation per registry
//! (land registry index, land registry deed, business registry, RDPRM).
//!
//! Grounded on the teacher's `ScraperResult`/`ScrapeStream` shape in
//! `scrapers/mod.rs`, narrowed to the closed success/failure variants the
//! spec calls for instead of the teacher's open-ended metadata bag.

use async_trait::async_trait;
use thiserror::Error;

use crate::browser::BrowserSession;
use crate::models::{BusinessRegistrySession, Credential, ExtractionJob, PersonalRightsSearch};

/// Artifact returned by a successful `execute` call.
#[derive(Debug, Clone)]
pub struct DriverArtifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

/// Closed set of classified failures a driver may return (spec §4.7).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("account locked: {0}")]
    AccountLocked(String),
}

impl DriverError {
    /// Maps a driver failure to the worker's retry decision (spec §4.7):
    /// transient/infrastructure retry, everything else is terminal.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DriverError::Transient(_) | DriverError::Infrastructure(_))
    }

    /// Whether this failure should also bump the active credential's
    /// failure counter (spec §4.7, §4.3).
    pub fn penalizes_credential(&self) -> bool {
        matches!(self, DriverError::AccountLocked(_))
    }
}

/// A capability, not a core component: each registry supplies one
/// implementation. `login` and `execute` are separate so a session can be
/// reused across jobs without re-authenticating (spec §4.6).
#[async_trait]
pub trait SiteDriver: Send + Sync {
    /// Authenticate `session` with `credential`. Idempotent: calling it
    /// again on an already-authenticated session either no-ops or
    /// re-authenticates cleanly.
    async fn login(&self, session: &mut BrowserSession, credential: &Credential) -> Result<(), DriverError>;

    /// Drive the site-specific flow for `job` on an authenticated `session`.
    /// The same job parameters on a fresh session must produce the same
    /// artifact or the same classified failure (spec §4.7 idempotence).
    async fn execute(
        &self,
        session: &mut BrowserSession,
        job: &ExtractionJob,
    ) -> Result<DriverArtifact, DriverError>;
}

/// One per registry that exposes a business-registry candidate-selection
/// flow (spec §4.4 step 3). `execute` drives the selection for an already
/// `req_completed` session; there is no document artifact at this step, the
/// result is simply whether the session's selection succeeded.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    async fn login(&self, session: &mut BrowserSession, credential: &Credential) -> Result<(), DriverError>;

    async fn execute(
        &self,
        session: &mut BrowserSession,
        job: &BusinessRegistrySession,
    ) -> Result<(), DriverError>;
}

/// One per registry that exposes a personal/movable rights name search
/// (spec §4.4 step 3, §3 "PersonalRightsSearch").
#[async_trait]
pub trait SearchDriver: Send + Sync {
    async fn login(&self, session: &mut BrowserSession, credential: &Credential) -> Result<(), DriverError>;

    async fn execute(
        &self,
        session: &mut BrowserSession,
        job: &PersonalRightsSearch,
    ) -> Result<DriverArtifact, DriverError>;
}
