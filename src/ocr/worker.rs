//! OCR worker loop (spec §4.8, §4.9): claims jobs already specialized to one
//! sub-kind, drives them through the linear pipeline, and persists the
//! result. Mirrors the shape of [`crate::worker::Worker::tick`] — a single
//! claim-or-sleep loop per process — but runs against `claim_for_ocr` instead
//! of `claim_pending`.

use std::sync::Arc;

use crate::config::{BucketNames, OcrPipelineConfig, RateLimitConfig};
use crate::models::{ExtractionJob, OcrDocument, OcrSubKind};
use crate::ocr::pipeline::{self, CoherenceVerdict, OcrError};
use crate::ocr::rate_limiter::RateLimiter;
use crate::ocr::vision::VisionClient;
use crate::repository::Repositories;
use crate::storage::StorageClient;

pub struct OcrWorker {
    worker_id: String,
    sub_kind: OcrSubKind,
    repositories: Arc<dyn Repositories>,
    storage: Arc<dyn StorageClient>,
    buckets: BucketNames,
    pipeline_config: OcrPipelineConfig,
    primary: VisionClient,
    secondary: VisionClient,
    limiter: Arc<RateLimiter>,
    rate_limit: RateLimitConfig,
}

impl OcrWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: String,
        sub_kind: OcrSubKind,
        repositories: Arc<dyn Repositories>,
        storage: Arc<dyn StorageClient>,
        buckets: BucketNames,
        pipeline_config: OcrPipelineConfig,
        primary: VisionClient,
        secondary: VisionClient,
        limiter: Arc<RateLimiter>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            worker_id,
            sub_kind,
            repositories,
            storage,
            buckets,
            pipeline_config,
            primary,
            secondary,
            limiter,
            rate_limit,
        }
    }

    /// Claims and fully processes at most one job. Returns `false` if the
    /// queue for this sub-kind was empty.
    pub async fn tick(&self) -> anyhow::Result<bool> {
        let Some(job) = self.repositories.jobs().claim_for_ocr(&self.worker_id, self.sub_kind).await? else {
            return Ok(false);
        };
        self.process_claimed(job).await
    }

    /// Runs the pipeline against a job this worker already holds (status
    /// `ocr-in-progress`, `worker_id` already set to this worker). Used by
    /// both [`Self::tick`] and the `process-queue` CLI utility, which claims
    /// the job itself via `claim_specific` (spec §6).
    pub async fn process_claimed(&self, job: ExtractionJob) -> anyhow::Result<bool> {
        tracing::info!(job_id = job.id, sub_kind = ?self.sub_kind, "claimed job for OCR");

        match self.run_pipeline(&job).await {
            Ok((raw_content, structured, flagged_incomplete)) => {
                self.repositories
                    .jobs()
                    .complete_ocr(job.id, &self.worker_id, &raw_content, structured, flagged_incomplete)
                    .await?;
            }
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "OCR pipeline failed");
                self.repositories.jobs().fail_ocr(job.id, &self.worker_id, &e.to_string()).await?;
            }
        }

        Ok(true)
    }

    async fn run_pipeline(&self, job: &ExtractionJob) -> Result<(String, serde_json::Value, bool), OcrError> {
        let artifact_path = job.artifact_path.as_deref().ok_or(OcrError::MalformedInput)?;
        let bucket = self.buckets.for_kind(job.kind);
        let bytes = self
            .storage
            .get(bucket, artifact_path)
            .await
            .map_err(|e| OcrError::Rasterize(e.to_string()))?;

        pipeline::validate_pdf(&bytes)?;
        let mut pages = pipeline::rasterize(&bytes, &self.pipeline_config)?;

        let rpm = self.rate_limit.rpm_limit;
        let tpm = self.rate_limit.tpm_limit;

        for page in &mut pages {
            if let Err(e) = pipeline::count_lines(
                page,
                &self.primary,
                &self.secondary,
                &self.limiter,
                rpm,
                tpm,
                self.pipeline_config.max_lines_per_page,
            )
            .await
            {
                tracing::warn!(page = page.page_number, error = %e, "line-count consensus failed");
                continue;
            }

            pipeline::extract_windowed(page, &self.primary, &self.limiter, rpm, tpm, self.pipeline_config.window_size)
                .await;

            if self.pipeline_config.coherence_check_enabled && !page.failed {
                self.reconcile_coherence(page, rpm, tpm).await;
            }

            if self.pipeline_config.boost_enabled && !page.failed {
                if let Err(e) = pipeline::boost(page, &self.primary, &self.limiter, rpm, tpm).await {
                    tracing::warn!(page = page.page_number, error = %e, "boost pass failed, keeping pre-boost text");
                }
            }
        }

        let document = OcrDocument::new(pages);
        let flagged_incomplete = !document.is_completed;
        let raw_content = document
            .pages
            .iter()
            .map(|p| p.lines.iter().map(|l| l.raw_text.as_str()).collect::<Vec<_>>().join("\n\n"))
            .collect::<Vec<_>>()
            .join("\n");
        let sanitized = pipeline::sanitize_document(&document);
        let structured = serde_json::to_value(&sanitized).unwrap_or(serde_json::Value::Null);

        Ok((raw_content, structured, flagged_incomplete))
    }

    /// Re-extracts up to `max_retries` times while the coherence check comes
    /// back incomplete or over-extracted (spec §4.9 step 5); an uncertain
    /// verdict or exhausted retries flags the page failed without aborting
    /// the document.
    async fn reconcile_coherence(&self, page: &mut crate::models::Page, rpm: u32, tpm: u32) {
        let mut attempt = 0;
        loop {
            let verdict = match pipeline::check_coherence(page, &self.primary, &self.limiter, rpm, tpm).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(page = page.page_number, error = %e, "coherence check failed");
                    return;
                }
            };

            match verdict {
                CoherenceVerdict::Complete => return,
                CoherenceVerdict::Incomplete | CoherenceVerdict::OverExtracted
                    if attempt < self.pipeline_config.max_retries =>
                {
                    attempt += 1;
                    pipeline::extract_windowed(
                        page,
                        &self.primary,
                        &self.limiter,
                        rpm,
                        tpm,
                        self.pipeline_config.window_size,
                    )
                    .await;
                }
                _ => {
                    page.failed = true;
                    return;
                }
            }
        }
    }

    pub async fn run_loop(self: Arc<Self>, poll_interval: std::time::Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "OCR worker tick failed");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}
