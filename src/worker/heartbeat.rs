//! Periodic heartbeat emission (spec §4.5: "every worker emits a heartbeat
//! update every 30 seconds").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;

use crate::models::{Credential, WorkerIdentity, WorkerState, WorkerStatus};
use crate::repository::Repositories;

/// Spawns a background task that upserts this worker's status row every
/// `interval` until `shutdown` fires. Returns the task handle so the caller
/// can await it during graceful shutdown. `credential`/`jobs_completed`/
/// `jobs_failed` are the same handles the worker loop mutates, so every
/// upsert reflects the worker's live state rather than a snapshot taken at
/// spawn time (spec §3 "WorkerStatus").
pub fn spawn(
    identity: WorkerIdentity,
    repositories: Arc<dyn Repositories>,
    environment: String,
    state: Arc<tokio::sync::Mutex<WorkerState>>,
    current_job_id: Arc<tokio::sync::Mutex<Option<String>>>,
    credential: Arc<tokio::sync::Mutex<Option<Credential>>>,
    jobs_completed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
    interval_duration: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(interval_duration);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let status = WorkerStatus {
                        worker_id: identity.as_str().to_string(),
                        state: *state.lock().await,
                        current_job_id: current_job_id.lock().await.clone(),
                        current_environment: Some(environment.clone()),
                        credential_id: credential.lock().await.as_ref().map(|c| c.id.clone()),
                        last_heartbeat: chrono::Utc::now(),
                        jobs_completed: jobs_completed.load(Ordering::Relaxed),
                        jobs_failed: jobs_failed.load(Ordering::Relaxed),
                    };
                    if let Err(e) = repositories.worker_status().heartbeat(&status).await {
                        tracing::warn!(worker_id = %identity.as_str(), error = %e, "heartbeat failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = repositories.worker_status().mark_offline(&identity.as_str()).await;
                        break;
                    }
                }
            }
        }
    })
}
