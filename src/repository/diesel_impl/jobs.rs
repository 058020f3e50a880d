//! Atomic claim and lifecycle transitions for the extraction queue (spec §4.2,
//! §4.8). Grounded on `claim_pending_url` in
//! `monokrome-foiacquire/src/repository/diesel_crawl/queue.rs`: a transaction
//! that selects one candidate row then conditionally updates it, relying on
//! Postgres's row-level locking to guarantee exactly one winner.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::models::{ExtractionJob, JobStatus, OcrSubKind};
use crate::repository::pool::PgPool;
use crate::repository::schema::extraction_jobs;
use crate::repository::{ClaimError, ClaimResult, JobRepository};
use crate::with_conn;

use super::records::JobRecord;

pub struct DieselJobRepository {
    pub(crate) pool: PgPool,
}

fn db_err(e: diesel::result::Error) -> ClaimError {
    ClaimError::Database(e.to_string())
}

#[async_trait]
impl JobRepository for DieselJobRepository {
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<ExtractionJob>> {
        let worker_id = worker_id.to_string();
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let worker_id = worker_id.clone();
                Box::pin(async move {
                    let candidate: Option<JobRecord> = extraction_jobs::table
                        .filter(extraction_jobs::status.eq(JobStatus::Pending.code() as i16))
                        .filter(extraction_jobs::worker_id.is_null())
                        .order(extraction_jobs::created_at.asc())
                        .limit(1)
                        .for_update()
                        .skip_locked()
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(candidate) = candidate else {
                        return Ok(None);
                    };

                    let updated = diesel::update(
                        extraction_jobs::table
                            .filter(extraction_jobs::id.eq(candidate.id))
                            .filter(extraction_jobs::status.eq(JobStatus::Pending.code() as i16))
                            .filter(extraction_jobs::worker_id.is_null()),
                    )
                    .set((
                        extraction_jobs::status.eq(JobStatus::Processing.code() as i16),
                        extraction_jobs::worker_id.eq(&worker_id),
                        extraction_jobs::processing_started_at.eq(Utc::now()),
                    ))
                    .get_result::<JobRecord>(conn)
                    .await
                    .optional()?;

                    Ok(updated.map(ExtractionJob::from))
                })
            })
            .await
            .map_err(db_err)
        })
    }

    async fn claim_for_ocr(
        &self,
        worker_id: &str,
        sub_kind: OcrSubKind,
    ) -> ClaimResult<Option<ExtractionJob>> {
        let worker_id = worker_id.to_string();
        let kind_str = match sub_kind {
            OcrSubKind::Index => "index",
            OcrSubKind::Deed => "deed",
        };
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let worker_id = worker_id.clone();
                Box::pin(async move {
                    let candidate: Option<JobRecord> = extraction_jobs::table
                        .filter(extraction_jobs::status.eq(JobStatus::ExtractionComplete.code() as i16))
                        .filter(extraction_jobs::kind.eq(kind_str))
                        .order(extraction_jobs::completed_at.asc())
                        .limit(1)
                        .for_update()
                        .skip_locked()
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(candidate) = candidate else {
                        return Ok(None);
                    };

                    let updated = diesel::update(
                        extraction_jobs::table
                            .filter(extraction_jobs::id.eq(candidate.id))
                            .filter(extraction_jobs::status.eq(JobStatus::ExtractionComplete.code() as i16)),
                    )
                    .set((
                        extraction_jobs::status.eq(JobStatus::OcrInProgress.code() as i16),
                        extraction_jobs::worker_id.eq(&worker_id),
                        extraction_jobs::ocr_started_at.eq(Utc::now()),
                    ))
                    .get_result::<JobRecord>(conn)
                    .await
                    .optional()?;

                    Ok(updated.map(ExtractionJob::from))
                })
            })
            .await
            .map_err(db_err)
        })
    }

    async fn claim_specific(&self, worker_id: &str, job_id: i64) -> ClaimResult<Option<ExtractionJob>> {
        let worker_id = worker_id.to_string();
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let worker_id = worker_id.clone();
                Box::pin(async move {
                    let candidate: Option<JobRecord> = extraction_jobs::table
                        .filter(extraction_jobs::id.eq(job_id))
                        .filter(extraction_jobs::worker_id.is_null())
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(candidate) = candidate else {
                        return Ok(None);
                    };

                    let now = Utc::now();
                    let row_filter = extraction_jobs::table
                        .filter(extraction_jobs::id.eq(candidate.id))
                        .filter(extraction_jobs::worker_id.is_null());

                    let updated = match JobStatus::from_code(candidate.status as u8) {
                        Some(JobStatus::Pending) => diesel::update(row_filter)
                            .set((
                                extraction_jobs::status.eq(JobStatus::Processing.code() as i16),
                                extraction_jobs::worker_id.eq(&worker_id),
                                extraction_jobs::processing_started_at.eq(now),
                            ))
                            .get_result::<JobRecord>(conn)
                            .await
                            .optional()?,
                        Some(JobStatus::ExtractionComplete) => diesel::update(row_filter)
                            .set((
                                extraction_jobs::status.eq(JobStatus::OcrInProgress.code() as i16),
                                extraction_jobs::worker_id.eq(&worker_id),
                                extraction_jobs::ocr_started_at.eq(now),
                            ))
                            .get_result::<JobRecord>(conn)
                            .await
                            .optional()?,
                        _ => return Ok(None),
                    };

                    Ok(updated.map(ExtractionJob::from))
                })
            })
            .await
            .map_err(db_err)
        })
    }

    async fn complete_extraction(
        &self,
        job_id: i64,
        worker_id: &str,
        artifact_path: &str,
    ) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                extraction_jobs::table
                    .filter(extraction_jobs::id.eq(job_id))
                    .filter(extraction_jobs::worker_id.eq(worker_id)),
            )
            .set((
                extraction_jobs::status.eq(JobStatus::ExtractionComplete.code() as i16),
                extraction_jobs::worker_id.eq(None::<String>),
                extraction_jobs::completed_at.eq(Utc::now()),
                extraction_jobs::artifact_path.eq(artifact_path),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
            Ok(rows > 0)
        })
    }

    async fn fail_extraction(
        &self,
        job_id: i64,
        worker_id: &str,
        retriable: bool,
        message: &str,
        screenshot: Option<&str>,
    ) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let message = message.to_string();
                let screenshot = screenshot.map(str::to_string);
                let worker_id = worker_id.to_string();
                Box::pin(async move {
                    let current: Option<JobRecord> = extraction_jobs::table
                        .filter(extraction_jobs::id.eq(job_id))
                        .filter(extraction_jobs::worker_id.eq(&worker_id))
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(current) = current else {
                        return Ok(false);
                    };

                    let next_attempts = current.attemtps + 1;
                    let terminal = !retriable || next_attempts >= current.max_attempts;
                    let next_status = if terminal {
                        JobStatus::Error.code() as i16
                    } else {
                        JobStatus::Pending.code() as i16
                    };

                    let rows = diesel::update(
                        extraction_jobs::table
                            .filter(extraction_jobs::id.eq(job_id))
                            .filter(extraction_jobs::worker_id.eq(&worker_id)),
                    )
                    .set((
                        extraction_jobs::status.eq(next_status),
                        extraction_jobs::worker_id.eq(None::<String>),
                        extraction_jobs::attemtps.eq(next_attempts),
                        extraction_jobs::last_error.eq(&message),
                        extraction_jobs::error_screenshot.eq(&screenshot),
                    ))
                    .execute(conn)
                    .await?;

                    Ok(rows > 0)
                })
            })
            .await
            .map_err(db_err)
        })
    }

    async fn release_orphaned(&self, job_id: i64, worker_id: &str, message: &str) -> ClaimResult<bool> {
        let worker_id = worker_id.to_string();
        let message = message.to_string();
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                extraction_jobs::table
                    .filter(extraction_jobs::id.eq(job_id))
                    .filter(extraction_jobs::worker_id.eq(&worker_id)),
            )
            .set((
                extraction_jobs::status.eq(JobStatus::Pending.code() as i16),
                extraction_jobs::worker_id.eq(None::<String>),
                extraction_jobs::processing_started_at.eq(None::<chrono::DateTime<Utc>>),
                extraction_jobs::last_error.eq(&message),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;

            Ok(rows > 0)
        })
    }

    async fn complete_ocr(
        &self,
        job_id: i64,
        worker_id: &str,
        raw_content: &str,
        structured: serde_json::Value,
        flagged_incomplete: bool,
    ) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                extraction_jobs::table
                    .filter(extraction_jobs::id.eq(job_id))
                    .filter(extraction_jobs::worker_id.eq(worker_id)),
            )
            .set((
                extraction_jobs::status.eq(JobStatus::OcrComplete.code() as i16),
                extraction_jobs::worker_id.eq(None::<String>),
                extraction_jobs::ocr_completed_at.eq(Utc::now()),
                extraction_jobs::raw_ocr_content.eq(raw_content),
                extraction_jobs::structured_content.eq(structured),
                extraction_jobs::ocr_flagged_incomplete.eq(flagged_incomplete),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
            Ok(rows > 0)
        })
    }

    async fn fail_ocr(&self, job_id: i64, worker_id: &str, message: &str) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let message = message.to_string();
                let worker_id = worker_id.to_string();
                Box::pin(async move {
                    let current: Option<JobRecord> = extraction_jobs::table
                        .filter(extraction_jobs::id.eq(job_id))
                        .filter(extraction_jobs::worker_id.eq(&worker_id))
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(current) = current else {
                        return Ok(false);
                    };

                    let next_ocr_attempts = current.ocr_attempts + 1;
                    // Document-level OCR failure always returns the job to
                    // extraction-complete; it becomes eligible again once
                    // below the attempt ceiling (spec §4.9 "Failure semantics").
                    let rows = diesel::update(
                        extraction_jobs::table
                            .filter(extraction_jobs::id.eq(job_id))
                            .filter(extraction_jobs::worker_id.eq(&worker_id)),
                    )
                    .set((
                        extraction_jobs::status.eq(JobStatus::ExtractionComplete.code() as i16),
                        extraction_jobs::worker_id.eq(None::<String>),
                        extraction_jobs::ocr_attempts.eq(next_ocr_attempts),
                        extraction_jobs::last_error.eq(&message),
                    ))
                    .execute(conn)
                    .await?;

                    Ok(rows > 0)
                })
            })
            .await
            .map_err(db_err)
        })
    }

    async fn get(&self, job_id: i64) -> ClaimResult<Option<ExtractionJob>> {
        with_conn!(self.pool, conn, {
            extraction_jobs::table
                .filter(extraction_jobs::id.eq(job_id))
                .first::<JobRecord>(&mut conn)
                .await
                .optional()
                .map_err(db_err)
                .map(|r| r.map(ExtractionJob::from))
        })
    }

    async fn ocr_queue_depth(&self, sub_kind: OcrSubKind) -> ClaimResult<u64> {
        let kind_str = match sub_kind {
            OcrSubKind::Index => "index",
            OcrSubKind::Deed => "deed",
        };
        with_conn!(self.pool, conn, {
            extraction_jobs::table
                .filter(extraction_jobs::status.eq(JobStatus::ExtractionComplete.code() as i16))
                .filter(extraction_jobs::kind.eq(kind_str))
                .count()
                .get_result::<i64>(&mut conn)
                .await
                .map(|n| n as u64)
                .map_err(db_err)
        })
    }

    async fn status_of(&self, job_id: i64) -> ClaimResult<Option<JobStatus>> {
        Ok(self.get(job_id).await?.map(|j| j.status))
    }
}
