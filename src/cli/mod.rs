//! CLI entry points, grounded on `monokrome-foiacquire/src/cli/commands.rs`'s
//! `Cli`/`Commands`/`run()` shape (clap derive, a thin `match` dispatching to
//! one function per subcommand).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use crate::config::{AppConfig, EnvironmentConfig, RateLimitConfig};
use crate::environment::EnvironmentRegistry;
use crate::models::{EnvironmentName, JobKind, JobStatus, OcrSubKind, WorkerIdentity};
use crate::ocr::rate_limiter::RateLimiter;
use crate::ocr::vision::{VisionClient, VisionConfig};
use crate::ocr::worker::OcrWorker;
use crate::worker::{heartbeat, DriverRegistry, Worker};

#[derive(Parser)]
#[command(name = "greffier")]
#[command(about = "Distributed extraction and OCR pipeline for Quebec government registries")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Checked before the tracing subscriber is built, mirroring the teacher's
/// `cli::is_verbose` (which also runs ahead of `Cli::parse`).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the unified extraction worker loop (spec §4.4) until interrupted.
    WorkerDaemon,

    /// Run the OCR worker pool (spec §4.8) until interrupted.
    OcrWorkerDaemon,

    /// Claim and process one specific job by ID, bypassing queue order.
    ProcessQueue {
        /// Job ID to claim and process.
        #[arg(long)]
        queue_id: i64,
        /// Environment the job lives in.
        #[arg(long, default_value = "prod")]
        env: String,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Commands::WorkerDaemon => cmd_worker_daemon(config).await,
        Commands::OcrWorkerDaemon => cmd_ocr_worker_daemon(config).await,
        Commands::ProcessQueue { queue_id, env } => cmd_process_queue(config, queue_id, &env).await,
    }
}

fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Waits for Ctrl-C, then flips the shutdown watch so every spawned loop
/// observes it on its next `select!` (spec §4.4 "Cancellation").
async fn wait_for_shutdown(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown signal received");
    let _ = tx.send(true);
}

async fn cmd_worker_daemon(config: AppConfig) -> anyhow::Result<()> {
    let registry = Arc::new(EnvironmentRegistry::from_config(&config).await?);
    let identity = WorkerIdentity::new();

    // No concrete `SiteDriver` implementations are wired in yet (DESIGN.md:
    // "business-registry/personal-rights driver dispatch"); the loop still
    // claims and logs sessions/searches, and reports `no site driver
    // registered` for extraction jobs until drivers are registered here.
    let drivers = DriverRegistry {
        extraction: HashMap::new(),
    };

    let representative = config
        .environments
        .values()
        .next()
        .map(|e| e.worker_poll_interval_ms)
        .unwrap_or(10_000);

    let worker = Arc::new(Worker::new(
        identity.clone(),
        registry.clone(),
        drivers,
        Duration::from_millis(config.browser_idle_timeout_ms),
        Duration::from_millis(representative),
        Duration::from_millis(config.shutdown_hard_deadline_ms),
    ));

    let (tx, rx) = shutdown_channel();

    let mut tasks = Vec::new();
    for env_name in registry.list_environments() {
        let Some(handle) = registry.get(env_name) else { continue };
        let heartbeat_interval = config
            .environments
            .get(env_name.as_str())
            .map(|e| e.heartbeat_interval_ms)
            .unwrap_or(30_000);

        tasks.push(heartbeat::spawn(
            identity.clone(),
            handle.repositories.clone(),
            env_name.as_str().to_string(),
            worker.state_handle(),
            worker.current_job_handle(),
            worker.credential_handle(),
            worker.jobs_completed_handle(),
            worker.jobs_failed_handle(),
            Duration::from_millis(heartbeat_interval),
            rx.clone(),
        ));
    }

    let dead_threshold_ms = config
        .environments
        .values()
        .next()
        .map(|e| e.dead_worker_threshold_ms)
        .unwrap_or(180_000);
    tasks.push(
        crate::worker::reaper::spawn_loop(
            registry.clone(),
            chrono::Duration::milliseconds(dead_threshold_ms as i64),
            Duration::from_millis(representative),
        )
        .await,
    );

    let shutdown_task = tokio::spawn(wait_for_shutdown(tx));

    worker.run(rx).await;

    shutdown_task.abort();
    for task in tasks {
        task.abort();
    }

    Ok(())
}

fn representative_rate_limit(config: &AppConfig) -> anyhow::Result<RateLimitConfig> {
    config
        .rate_limits
        .get("primary")
        .or_else(|| config.rate_limits.values().next())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no rate_limits configured"))
}

fn vision_client(env_config: &EnvironmentConfig, key: &str, timeout: Duration) -> anyhow::Result<VisionClient> {
    let api_key = env_config
        .vision_api_keys
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("missing vision_api_keys[\"{key}\"] in environment config"))?;
    Ok(VisionClient::new(VisionConfig {
        endpoint: env_config.vision_endpoint.clone(),
        api_key: api_key.clone(),
        model: key.to_string(),
        request_timeout: timeout,
    }))
}

async fn cmd_ocr_worker_daemon(config: AppConfig) -> anyhow::Result<()> {
    let registry = Arc::new(EnvironmentRegistry::from_config(&config).await?);
    let identity = WorkerIdentity::new();
    let rate_limit = representative_rate_limit(&config)?;
    let timeout = Duration::from_millis(config.ocr.request_timeout_ms);

    let (tx, rx) = shutdown_channel();
    let mut handles = Vec::new();
    let mut worker_index = 0u32;

    for env_name in registry.list_environments() {
        let Some(handle) = registry.get(env_name) else { continue };
        let Some(env_config) = config.environments.get(env_name.as_str()) else { continue };

        let limiter = Arc::new(RateLimiter::connect(&env_config.rate_limit_endpoint).await?);

        for (sub_kind, count) in [
            (OcrSubKind::Index, env_config.ocr_min_index_workers),
            (OcrSubKind::Deed, env_config.ocr_min_deed_workers),
        ] {
            for _ in 0..count {
                worker_index += 1;
                let worker = Arc::new(OcrWorker::new(
                    format!("{}-ocr-{}", identity.as_str(), worker_index),
                    sub_kind,
                    handle.repositories.clone(),
                    handle.storage.clone(),
                    config.buckets.clone(),
                    config.ocr.clone(),
                    vision_client(env_config, "primary", timeout)?,
                    vision_client(env_config, "secondary", timeout)?,
                    limiter.clone(),
                    rate_limit.clone(),
                ));

                handles.push(tokio::spawn(worker.run_loop(
                    Duration::from_millis(env_config.worker_poll_interval_ms),
                    rx.clone(),
                )));
            }
        }
    }

    if handles.is_empty() {
        anyhow::bail!("no OCR workers configured (check ocr_min_index_workers/ocr_min_deed_workers)");
    }

    let shutdown_task = tokio::spawn(wait_for_shutdown(tx));

    for handle in handles {
        let _ = handle.await;
    }
    shutdown_task.abort();

    Ok(())
}

/// Maps a document kind to the OCR specialization that processes it. Cadastral
/// plans never reach `claim_for_ocr` (spec §4.8 only names index/deed pools),
/// so this utility has nothing to dispatch for them.
fn sub_kind_for(kind: JobKind) -> Option<OcrSubKind> {
    match kind {
        JobKind::Index => Some(OcrSubKind::Index),
        JobKind::Deed => Some(OcrSubKind::Deed),
        JobKind::CadastralPlan => None,
    }
}

async fn cmd_process_queue(config: AppConfig, queue_id: i64, env: &str) -> anyhow::Result<()> {
    let env_name = EnvironmentName::parse(env)
        .ok_or_else(|| anyhow::anyhow!("unknown environment {env:?}, expected prod/staging/dev"))?;

    let registry = Arc::new(EnvironmentRegistry::from_config(&config).await?);
    let Some(handle) = registry.get(env_name) else {
        anyhow::bail!("environment {env_name} is not configured");
    };
    let env_config = config
        .environments
        .get(env_name.as_str())
        .ok_or_else(|| anyhow::anyhow!("environment {env_name} is not configured"))?;

    let identity = WorkerIdentity::new();

    let Some(job) = handle
        .repositories
        .jobs()
        .claim_specific(&identity.as_str(), queue_id)
        .await?
    else {
        tracing::warn!(queue_id, %env_name, "job not claimable (missing, already held, or in a terminal state)");
        return Ok(());
    };

    match job.status {
        JobStatus::Processing => {
            let drivers = DriverRegistry {
                extraction: HashMap::new(),
                business_registry: None,
                personal_rights: None,
            };
            let worker = Worker::new(
                identity,
                registry.clone(),
                drivers,
                Duration::from_millis(config.browser_idle_timeout_ms),
                Duration::from_millis(env_config.worker_poll_interval_ms),
                Duration::from_millis(config.shutdown_hard_deadline_ms),
            );
            worker.process_extraction_job(env_name, job).await;
        }
        JobStatus::OcrInProgress => {
            let Some(sub_kind) = sub_kind_for(job.kind) else {
                anyhow::bail!("job {queue_id} has kind {:?}, which has no OCR pool", job.kind);
            };
            let rate_limit = representative_rate_limit(&config)?;
            let timeout = Duration::from_millis(config.ocr.request_timeout_ms);
            let limiter = Arc::new(RateLimiter::connect(&env_config.rate_limit_endpoint).await?);

            let worker = OcrWorker::new(
                identity.as_str(),
                sub_kind,
                handle.repositories.clone(),
                handle.storage.clone(),
                config.buckets.clone(),
                config.ocr.clone(),
                vision_client(env_config, "primary", timeout)?,
                vision_client(env_config, "secondary", timeout)?,
                limiter,
                rate_limit,
            );
            worker.process_claimed(job).await?;
        }
        other => {
            anyhow::bail!("claim_specific returned job {queue_id} in unexpected status {other:?}");
        }
    }

    Ok(())
}
