//! Worker heartbeat and reaping queries (spec §4.5).

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::WorkerStatus;
use crate::repository::pool::PgPool;
use crate::repository::schema::worker_statuses;
use crate::repository::{ClaimError, ClaimResult, WorkerStatusRepository};
use crate::with_conn;

use super::records::WorkerStatusRecord;

pub struct DieselWorkerStatusRepository {
    pub(crate) pool: PgPool,
}

fn db_err(e: diesel::result::Error) -> ClaimError {
    ClaimError::Database(e.to_string())
}

#[async_trait]
impl WorkerStatusRepository for DieselWorkerStatusRepository {
    async fn heartbeat(&self, status: &WorkerStatus) -> ClaimResult<()> {
        let record = WorkerStatusRecord::from(status);
        with_conn!(self.pool, conn, {
            diesel::insert_into(worker_statuses::table)
                .values(&record)
                .on_conflict(worker_statuses::worker_id)
                .do_update()
                .set(&record)
                .execute(&mut conn)
                .await
                .map_err(db_err)?;
            Ok(())
        })
    }

    async fn mark_offline(&self, worker_id: &str) -> ClaimResult<()> {
        with_conn!(self.pool, conn, {
            diesel::update(worker_statuses::table.filter(worker_statuses::worker_id.eq(worker_id)))
                .set(worker_statuses::state.eq("offline"))
                .execute(&mut conn)
                .await
                .map_err(db_err)?;
            Ok(())
        })
    }

    async fn list_dead(&self, dead_threshold: chrono::Duration) -> ClaimResult<Vec<WorkerStatus>> {
        let cutoff = chrono::Utc::now() - dead_threshold;
        with_conn!(self.pool, conn, {
            worker_statuses::table
                .filter(worker_statuses::last_heartbeat.lt(cutoff))
                .filter(worker_statuses::state.ne("offline"))
                .load::<WorkerStatusRecord>(&mut conn)
                .await
                .map(|rows| rows.into_iter().map(WorkerStatus::from).collect())
                .map_err(db_err)
        })
    }

    async fn get(&self, worker_id: &str) -> ClaimResult<Option<WorkerStatus>> {
        with_conn!(self.pool, conn, {
            worker_statuses::table
                .filter(worker_statuses::worker_id.eq(worker_id))
                .first::<WorkerStatusRecord>(&mut conn)
                .await
                .optional()
                .map_err(db_err)
                .map(|r| r.map(WorkerStatus::from))
        })
    }
}
