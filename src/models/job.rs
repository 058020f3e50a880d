//! Extraction job (spec §3 "Job (Extraction)", §6 job states table).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document kind, driving which storage bucket and which OCR prompt/sanitizer
/// sub-type a job ultimately uses (spec §4.8, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Deed,
    Index,
    CadastralPlan,
}

impl JobKind {
    /// Object-storage bucket name for this kind (spec §6).
    pub fn bucket_name(&self) -> &'static str {
        match self {
            JobKind::Index => "index",
            JobKind::Deed => "actes",
            JobKind::CadastralPlan => "plans-cadastraux",
        }
    }
}

/// Deed sub-type (spec §3: "for deeds a sub-type {deed, address-notice, radiation, misc}").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeedSubKind {
    Deed,
    AddressNotice,
    Radiation,
    Misc,
}

/// Kind-specific parameters for one extraction request (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParams {
    pub document_number: String,
    /// Document number with whitespace removed, used for idempotent lookups.
    pub normalized_document_number: String,
    pub circumscription: String,
    pub cadastre: String,
    pub secondary_designation: Option<String>,
    pub deed_sub_kind: Option<DeedSubKind>,
}

impl JobParams {
    pub fn new(
        document_number: impl Into<String>,
        circumscription: impl Into<String>,
        cadastre: impl Into<String>,
    ) -> Self {
        let document_number = document_number.into();
        let normalized_document_number: String =
            document_number.chars().filter(|c| !c.is_whitespace()).collect();
        Self {
            document_number,
            normalized_document_number,
            circumscription: circumscription.into(),
            cadastre: cadastre.into(),
            secondary_designation: None,
            deed_sub_kind: None,
        }
    }
}

/// Lifecycle state of an extraction job. Numeric codes are a stable external
/// contract (spec §6) — do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobStatus {
    Pending = 1,
    Processing = 2,
    ExtractionComplete = 3,
    Error = 4,
    OcrComplete = 5,
    OcrInProgress = 6,
}

impl JobStatus {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Pending),
            2 => Some(Self::Processing),
            3 => Some(Self::ExtractionComplete),
            4 => Some(Self::Error),
            5 => Some(Self::OcrComplete),
            6 => Some(Self::OcrInProgress),
            _ => None,
        }
    }
}

/// One extraction job row (spec §3, §4.2).
///
/// Invariants (enforced by the repository layer, never by direct mutation):
/// `status = Processing => worker_id.is_some() && processing_started_at.is_some()`;
/// `status = ExtractionComplete => artifact_path.is_some()`;
/// `ocr_complete => structured_content.is_some()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: i64,
    pub kind: JobKind,
    pub params: JobParams,
    pub status: JobStatus,

    /// Spec §9 open question: the external column backing this field is
    /// historically named `attemtps` (typo preserved for wire compatibility,
    /// see `repository::schema`). The Rust field name stays correct.
    pub attempts: u32,
    pub max_attempts: u32,
    pub worker_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ocr_started_at: Option<DateTime<Utc>>,
    pub ocr_completed_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
    pub error_screenshot: Option<String>,
    pub artifact_path: Option<String>,

    pub raw_ocr_content: Option<String>,
    pub structured_content: Option<serde_json::Value>,
    pub ocr_attempts: u32,
    pub ocr_max_attempts: u32,
    /// Set when the coherence check (spec §4.9 step 5) never converged but
    /// the document was stored anyway.
    pub ocr_flagged_incomplete: bool,
}

impl ExtractionJob {
    pub fn new(id: i64, kind: JobKind, params: JobParams, max_attempts: u32) -> Self {
        Self {
            id,
            kind,
            params,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            worker_id: None,
            created_at: Utc::now(),
            processing_started_at: None,
            completed_at: None,
            ocr_started_at: None,
            ocr_completed_at: None,
            last_error: None,
            error_screenshot: None,
            artifact_path: None,
            raw_ocr_content: None,
            structured_content: None,
            ocr_attempts: 0,
            ocr_max_attempts: 3,
            ocr_flagged_incomplete: false,
        }
    }

    /// Whether this job kind is eligible for the downstream OCR pipeline.
    /// Spec §4.8 specializes OCR workers by sub-type ("index documents vs
    /// deed documents"); cadastral plans are images without tabular
    /// inscriptions and are not queued for OCR.
    pub fn requires_ocr(&self) -> bool {
        matches!(self.kind, JobKind::Index | JobKind::Deed)
    }

    /// Maps to the OCR pool's specialization sub-type (spec §4.8), or `None`
    /// for kinds that never reach the OCR pipeline.
    pub fn ocr_sub_kind(&self) -> Option<OcrSubKind> {
        match self.kind {
            JobKind::Index => Some(OcrSubKind::Index),
            JobKind::Deed => Some(OcrSubKind::Deed),
            JobKind::CadastralPlan => None,
        }
    }
}

/// OCR worker specialization (spec §4.8): "specialized at any moment to one
/// document sub-type (index documents vs deed documents, because prompts and
/// sanitizers differ)".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcrSubKind {
    Index,
    Deed,
}

impl OcrSubKind {
    pub const ALL: [OcrSubKind; 2] = [OcrSubKind::Index, OcrSubKind::Deed];
}
