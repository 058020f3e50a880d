//! Stable error taxonomy shared across the worker loop, OCR pipeline, and CLI.
//!
//! Every component gets its own typed error (`ClaimError`, `DriverError`, ...);
//! this module defines only the taxonomy that crosses the worker-loop boundary
//! (spec §7) plus the umbrella `GreffierError` the CLI deals in.

use thiserror::Error;

/// The stable classification a job's outcome is reduced to before it is
/// persisted. Nothing upstream of the worker loop is allowed to leak past
/// this boundary (spec §7 propagation policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    RateLimited,
    Infrastructure,
    BadInput,
    NotFound,
    LoginFailed,
    ModelOverextraction,
    AbandonedOnShutdown,
}

impl ErrorKind {
    /// Short canonical message stored on the job row (spec §7: "verbose detail
    /// goes to structured logs keyed by job ID").
    pub fn canonical_message(&self, detail: &str) -> String {
        let tag = match self {
            ErrorKind::TransientNetwork => "transient-network",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::BadInput => "bad-input",
            ErrorKind::NotFound => "not-found",
            ErrorKind::LoginFailed => "login-failed",
            ErrorKind::ModelOverextraction => "model-overextraction",
            ErrorKind::AbandonedOnShutdown => "abandoned-on-shutdown",
        };
        format!("{tag}: {detail}")
    }

    /// Whether a job in this error state should be retried (state -> pending)
    /// or treated as terminal (state -> error), per spec §4.7 and §7.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientNetwork | ErrorKind::Infrastructure | ErrorKind::RateLimited
        )
    }
}

#[derive(Debug, Error)]
pub enum GreffierError {
    #[error("claim failed: {0}")]
    Claim(#[from] crate::repository::ClaimError),

    #[error("driver failed: {0}")]
    Driver(#[from] crate::site_driver::DriverError),

    #[error("ocr pipeline failed: {0}")]
    Ocr(#[from] crate::ocr::OcrError),

    #[error("rate limiter failed: {0}")]
    RateLimit(#[from] crate::ocr::RateLimitError),

    #[error("storage failed: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("no eligible credential")]
    NoEligibleCredential,

    #[error("configuration error: {0}")]
    Config(String),
}
