//! Diesel row structs and their conversion to/from domain models.
//!
//! Grounded on `monokrome-foiacquire/src/repository/diesel_models.rs`
//! (`CrawlUrlRecord` and friends): the database row stays a flat, wide shape;
//! conversion into the tagged-variant domain model happens at the boundary
//! (spec §9).

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::models::{
    BusinessRegistrySession, Credential, DeedSubKind, ExtractionJob, JobKind, JobParams,
    JobStatus, PersonalRightsSearch, SearchStatus, SessionStatus, WorkerState, WorkerStatus,
};
use crate::repository::schema::*;

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = extraction_jobs)]
pub struct JobRecord {
    pub id: i64,
    pub kind: String,
    pub deed_sub_kind: Option<String>,
    pub document_number: String,
    pub normalized_document_number: String,
    pub circumscription: String,
    pub cadastre: String,
    pub secondary_designation: Option<String>,
    pub status: i16,
    pub attemtps: i32,
    pub max_attempts: i32,
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
    pub ocr_attempts: i32,
    pub ocr_max_attempts: i32,
    pub ocr_flagged_incomplete: bool,
}

fn kind_to_str(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Deed => "deed",
        JobKind::Index => "index",
        JobKind::CadastralPlan => "cadastral-plan",
    }
}

fn kind_from_str(s: &str) -> JobKind {
    match s {
        "index" => JobKind::Index,
        "cadastral-plan" => JobKind::CadastralPlan,
        _ => JobKind::Deed,
    }
}

fn deed_sub_kind_to_str(k: DeedSubKind) -> &'static str {
    match k {
        DeedSubKind::Deed => "deed",
        DeedSubKind::AddressNotice => "address-notice",
        DeedSubKind::Radiation => "radiation",
        DeedSubKind::Misc => "misc",
    }
}

fn deed_sub_kind_from_str(s: &str) -> DeedSubKind {
    match s {
        "address-notice" => DeedSubKind::AddressNotice,
        "radiation" => DeedSubKind::Radiation,
        "misc" => DeedSubKind::Misc,
        _ => DeedSubKind::Deed,
    }
}

impl From<JobRecord> for ExtractionJob {
    fn from(r: JobRecord) -> Self {
        ExtractionJob {
            id: r.id,
            kind: kind_from_str(&r.kind),
            params: JobParams {
                document_number: r.document_number,
                normalized_document_number: r.normalized_document_number,
                circumscription: r.circumscription,
                cadastre: r.cadastre,
                secondary_designation: r.secondary_designation,
                deed_sub_kind: r.deed_sub_kind.as_deref().map(deed_sub_kind_from_str),
            },
            status: JobStatus::from_code(r.status as u8).unwrap_or(JobStatus::Error),
            attempts: r.attemtps as u32,
            max_attempts: r.max_attempts as u32,
            worker_id: r.worker_id,
            created_at: r.created_at,
            processing_started_at: r.processing_started_at,
            completed_at: r.completed_at,
            ocr_started_at: r.ocr_started_at,
            ocr_completed_at: r.ocr_completed_at,
            last_error: r.last_error,
            error_screenshot: r.error_screenshot,
            artifact_path: r.artifact_path,
            raw_ocr_content: r.raw_ocr_content,
            structured_content: r.structured_content,
            ocr_attempts: r.ocr_attempts as u32,
            ocr_max_attempts: r.ocr_max_attempts as u32,
            ocr_flagged_incomplete: r.ocr_flagged_incomplete,
        }
    }
}

impl From<&ExtractionJob> for JobRecord {
    fn from(j: &ExtractionJob) -> Self {
        JobRecord {
            id: j.id,
            kind: kind_to_str(j.kind).to_string(),
            deed_sub_kind: j.params.deed_sub_kind.map(deed_sub_kind_to_str).map(str::to_string),
            document_number: j.params.document_number.clone(),
            normalized_document_number: j.params.normalized_document_number.clone(),
            circumscription: j.params.circumscription.clone(),
            cadastre: j.params.cadastre.clone(),
            secondary_designation: j.params.secondary_designation.clone(),
            status: j.status.code() as i16,
            attemtps: j.attempts as i32,
            max_attempts: j.max_attempts as i32,
            worker_id: j.worker_id.clone(),
            created_at: j.created_at,
            processing_started_at: j.processing_started_at,
            completed_at: j.completed_at,
            ocr_started_at: j.ocr_started_at,
            ocr_completed_at: j.ocr_completed_at,
            last_error: j.last_error.clone(),
            error_screenshot: j.error_screenshot.clone(),
            artifact_path: j.artifact_path.clone(),
            raw_ocr_content: j.raw_ocr_content.clone(),
            structured_content: j.structured_content.clone(),
            ocr_attempts: j.ocr_attempts as i32,
            ocr_max_attempts: j.ocr_max_attempts as i32,
            ocr_flagged_incomplete: j.ocr_flagged_incomplete,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = business_registry_sessions)]
pub struct SessionRecord {
    pub id: String,
    pub status: String,
    pub req_completed: bool,
    pub candidate_companies: serde_json::Value,
    pub selected_company: Option<String>,
    pub names_to_search: serde_json::Value,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

fn session_status_to_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::PendingCompanySelection => "pending_company_selection",
        SessionStatus::Processing => "processing",
        SessionStatus::Completed => "completed",
        SessionStatus::Error => "error",
    }
}

fn session_status_from_str(s: &str) -> SessionStatus {
    match s {
        "processing" => SessionStatus::Processing,
        "completed" => SessionStatus::Completed,
        "error" => SessionStatus::Error,
        _ => SessionStatus::PendingCompanySelection,
    }
}

impl From<SessionRecord> for BusinessRegistrySession {
    fn from(r: SessionRecord) -> Self {
        BusinessRegistrySession {
            id: r.id,
            status: session_status_from_str(&r.status),
            req_completed: r.req_completed,
            candidate_companies: serde_json::from_value(r.candidate_companies).unwrap_or_default(),
            selected_company: r.selected_company,
            names_to_search: serde_json::from_value(r.names_to_search).unwrap_or_default(),
            worker_id: r.worker_id,
            created_at: r.created_at,
            completed_at: r.completed_at,
            last_error: r.last_error,
        }
    }
}

impl From<&BusinessRegistrySession> for SessionRecord {
    fn from(s: &BusinessRegistrySession) -> Self {
        SessionRecord {
            id: s.id.clone(),
            status: session_status_to_str(s.status).to_string(),
            req_completed: s.req_completed,
            candidate_companies: serde_json::to_value(&s.candidate_companies).unwrap(),
            selected_company: s.selected_company.clone(),
            names_to_search: serde_json::to_value(&s.names_to_search).unwrap(),
            worker_id: s.worker_id.clone(),
            created_at: s.created_at,
            completed_at: s.completed_at,
            last_error: s.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = personal_rights_searches)]
pub struct SearchRecord {
    pub id: String,
    pub session_id: String,
    pub search_name: String,
    pub status: String,
    pub worker_id: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub artifact_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

fn search_status_to_str(s: SearchStatus) -> &'static str {
    match s {
        SearchStatus::Pending => "pending",
        SearchStatus::InProgress => "in_progress",
        SearchStatus::Completed => "completed",
        SearchStatus::Failed => "failed",
        SearchStatus::NotFound => "not_found",
    }
}

fn search_status_from_str(s: &str) -> SearchStatus {
    match s {
        "in_progress" => SearchStatus::InProgress,
        "completed" => SearchStatus::Completed,
        "failed" => SearchStatus::Failed,
        "not_found" => SearchStatus::NotFound,
        _ => SearchStatus::Pending,
    }
}

impl From<SearchRecord> for PersonalRightsSearch {
    fn from(r: SearchRecord) -> Self {
        PersonalRightsSearch {
            id: r.id,
            session_id: r.session_id,
            search_name: r.search_name,
            status: search_status_from_str(&r.status),
            worker_id: r.worker_id,
            attempts: r.attempts as u32,
            max_attempts: r.max_attempts as u32,
            artifact_path: r.artifact_path,
            created_at: r.created_at,
            completed_at: r.completed_at,
            last_error: r.last_error,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = worker_statuses)]
pub struct WorkerStatusRecord {
    pub worker_id: String,
    pub state: String,
    pub current_job_id: Option<String>,
    pub current_environment: Option<String>,
    pub credential_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub jobs_completed: i64,
    pub jobs_failed: i64,
}

fn worker_state_to_str(s: WorkerState) -> &'static str {
    match s {
        WorkerState::Idle => "idle",
        WorkerState::Busy => "busy",
        WorkerState::Error => "error",
        WorkerState::Offline => "offline",
    }
}

fn worker_state_from_str(s: &str) -> WorkerState {
    match s {
        "busy" => WorkerState::Busy,
        "error" => WorkerState::Error,
        "offline" => WorkerState::Offline,
        _ => WorkerState::Idle,
    }
}

impl From<WorkerStatusRecord> for WorkerStatus {
    fn from(r: WorkerStatusRecord) -> Self {
        WorkerStatus {
            worker_id: r.worker_id,
            state: worker_state_from_str(&r.state),
            current_job_id: r.current_job_id,
            current_environment: r.current_environment,
            credential_id: r.credential_id,
            last_heartbeat: r.last_heartbeat,
            jobs_completed: r.jobs_completed as u64,
            jobs_failed: r.jobs_failed as u64,
        }
    }
}

impl From<&WorkerStatus> for WorkerStatusRecord {
    fn from(s: &WorkerStatus) -> Self {
        WorkerStatusRecord {
            worker_id: s.worker_id.clone(),
            state: worker_state_to_str(s.state).to_string(),
            current_job_id: s.current_job_id.clone(),
            current_environment: s.current_environment.clone(),
            credential_id: s.credential_id.clone(),
            last_heartbeat: s.last_heartbeat,
            jobs_completed: s.jobs_completed as i64,
            jobs_failed: s.jobs_failed as i64,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = credentials)]
pub struct CredentialRecord {
    pub id: String,
    pub username: String,
    pub secret: String,
    pub active: bool,
    pub failures: i32,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<CredentialRecord> for Credential {
    fn from(r: CredentialRecord) -> Self {
        Credential {
            id: r.id,
            username: r.username,
            secret: r.secret,
            active: r.active,
            failures: r.failures as u32,
            last_used: r.last_used,
        }
    }
}
