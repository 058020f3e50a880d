//! Data models for the job orchestration and OCR core (spec §3).
//!
//! The datastore row stays wide for the external contract; the in-memory
//! representation is the type-safe tagged variant described in spec §9
//! ("Duck-typed job payloads ... -> a tagged variant").

mod credential;
mod job;
mod ocr_page;
mod personal_rights;
mod session;
mod worker_status;

pub use credential::Credential;
pub use job::{DeedSubKind, ExtractionJob, JobKind, JobParams, JobStatus, OcrSubKind};
pub use ocr_page::{Document as OcrDocument, ExtractedLine, Page};
pub use personal_rights::{PersonalRightsSearch, SearchStatus};
pub use session::{BusinessRegistrySession, SessionStatus};
pub use worker_status::{WorkerState, WorkerStatus};

/// Identifies one running worker process. Threaded explicitly through every
/// call rather than read from ambient/global state (spec §9).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct WorkerIdentity {
    pub id: uuid::Uuid,
    pub hostname: String,
}

impl WorkerIdentity {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string()),
        }
    }

    pub fn as_str(&self) -> String {
        format!("{}@{}", self.id, self.hostname)
    }
}

impl Default for WorkerIdentity {
    fn default() -> Self {
        Self::new()
    }
}

/// Name of one of the independent deployment environments (spec §4.1, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentName {
    Prod,
    Staging,
    Dev,
}

impl EnvironmentName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentName::Prod => "prod",
            EnvironmentName::Staging => "staging",
            EnvironmentName::Dev => "dev",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prod" => Some(EnvironmentName::Prod),
            "staging" => Some(EnvironmentName::Staging),
            "dev" => Some(EnvironmentName::Dev),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
