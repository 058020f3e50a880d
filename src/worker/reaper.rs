//! Dead-worker reaper (spec §4.5).
//!
//! Scans every registered environment for dead worker rows (`last_heartbeat
//! < now - dead_threshold`) and releases whatever job each held, since the
//! dead worker's environment isn't tracked directly (spec §9 open question:
//! this is an O(E) scan per dead worker, acceptable while E is small).

use std::time::Duration;

use crate::environment::EnvironmentRegistry;

pub async fn run_once(registry: &EnvironmentRegistry, dead_threshold: chrono::Duration) {
    for env_name in registry.list_environments() {
        let Some(handle) = registry.get(env_name) else { continue };

        let dead = match handle.repositories.worker_status().list_dead(dead_threshold).await {
            Ok(dead) => dead,
            Err(e) => {
                tracing::error!(environment = %env_name, error = %e, "failed to list dead workers");
                continue;
            }
        };

        for worker in dead {
            reap_worker(&worker.worker_id, registry).await;
        }
    }
}

/// Releases whatever job a dead worker held, wherever it's found, then
/// marks the worker row offline. The reaper never deletes worker rows, to
/// preserve history (spec §4.5).
async fn reap_worker(worker_id: &str, registry: &EnvironmentRegistry) {
    for scan_env in registry.list_environments() {
        let Some(handle) = registry.get(scan_env) else { continue };

        if let Ok(Some(job)) = find_job_held_by(handle.repositories.as_ref(), worker_id).await {
            let message = format!("released by reaper: worker {worker_id} missed heartbeat deadline");
            match handle
                .repositories
                .jobs_for_reap()
                .release_orphaned(job.id, worker_id, &message)
                .await
            {
                Ok(true) => tracing::info!(job_id = job.id, %worker_id, "reaped orphaned job"),
                Ok(false) => {}
                Err(e) => tracing::error!(job_id = job.id, error = %e, "failed to reap job"),
            }
        }
    }

    for env_name in registry.list_environments() {
        let Some(handle) = registry.get(env_name) else { continue };
        let _ = handle.repositories.worker_status().mark_offline(worker_id).await;
    }
}

async fn find_job_held_by(
    repositories: &dyn crate::repository::Repositories,
    worker_id: &str,
) -> crate::repository::ClaimResult<Option<crate::models::ExtractionJob>> {
    // There is no direct "jobs held by worker X" index (spec §9); the
    // worker-status row's `current_job_id`, when set, is authoritative.
    if let Some(status) = repositories.worker_status().get(worker_id).await? {
        if let Some(job_id) = status.current_job_id.and_then(|s| s.parse::<i64>().ok()) {
            return repositories.jobs().get(job_id).await;
        }
    }
    Ok(None)
}

pub async fn spawn_loop(
    registry: std::sync::Arc<EnvironmentRegistry>,
    dead_threshold: chrono::Duration,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            run_once(&registry, dead_threshold).await;
        }
    })
}
