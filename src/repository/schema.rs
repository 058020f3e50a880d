//! Diesel table definitions, generated once by hand from the external
//! contract in spec §3/§6 (mirrors the "manually corrected" style of
//! `monokrome-foiacquire/src/schema.rs`).
//!
//! `extraction_jobs.attemtps` preserves the historical column-name typo
//! called out in spec §9 as an open question; this implementation chose
//! backward compatibility over a migration (see DESIGN.md).

diesel::table! {
    extraction_jobs (id) {
        id -> BigInt,
        kind -> Text,
        deed_sub_kind -> Nullable<Text>,
        document_number -> Text,
        normalized_document_number -> Text,
        circumscription -> Text,
        cadastre -> Text,
        secondary_designation -> Nullable<Text>,
        status -> SmallInt,
        attemtps -> Integer,
        max_attempts -> Integer,
        worker_id -> Nullable<Text>,
        created_at -> Timestamptz,
        processing_started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        ocr_started_at -> Nullable<Timestamptz>,
        ocr_completed_at -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
        error_screenshot -> Nullable<Text>,
        artifact_path -> Nullable<Text>,
        raw_ocr_content -> Nullable<Text>,
        structured_content -> Nullable<Jsonb>,
        ocr_attempts -> Integer,
        ocr_max_attempts -> Integer,
        ocr_flagged_incomplete -> Bool,
    }
}

diesel::table! {
    business_registry_sessions (id) {
        id -> Text,
        status -> Text,
        req_completed -> Bool,
        candidate_companies -> Jsonb,
        selected_company -> Nullable<Text>,
        names_to_search -> Jsonb,
        worker_id -> Nullable<Text>,
        created_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
    }
}

diesel::table! {
    personal_rights_searches (id) {
        id -> Text,
        session_id -> Text,
        search_name -> Text,
        status -> Text,
        worker_id -> Nullable<Text>,
        attempts -> Integer,
        max_attempts -> Integer,
        artifact_path -> Nullable<Text>,
        created_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
    }
}

diesel::table! {
    worker_statuses (worker_id) {
        worker_id -> Text,
        state -> Text,
        current_job_id -> Nullable<Text>,
        current_environment -> Nullable<Text>,
        credential_id -> Nullable<Text>,
        last_heartbeat -> Timestamptz,
        jobs_completed -> BigInt,
        jobs_failed -> BigInt,
    }
}

diesel::table! {
    credentials (id) {
        id -> Text,
        username -> Text,
        secret -> Text,
        active -> Bool,
        failures -> Integer,
        last_used -> Nullable<Timestamptz>,
    }
}
