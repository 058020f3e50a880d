//! Credential selection and failure tracking (spec §4.3, P4 fairness).
//!
//! Grounded on the same LRU-selection shape as
//! `monokrome-foiacquire/src/repository/diesel_crawl/queue.rs`, adapted from
//! "oldest pending job" to "least-recently-used eligible credential", with
//! never-used (`last_used IS NULL`) ranked first via `NULLS FIRST`.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::Credential;
use crate::repository::pool::PgPool;
use crate::repository::schema::credentials;
use crate::repository::{ClaimError, ClaimResult, CredentialRepository};
use crate::with_conn;

use super::records::CredentialRecord;

pub struct DieselCredentialRepository {
    pub(crate) pool: PgPool,
}

fn db_err(e: diesel::result::Error) -> ClaimError {
    ClaimError::Database(e.to_string())
}

const MAX_FAILURES: i32 = 3;

#[async_trait]
impl CredentialRepository for DieselCredentialRepository {
    async fn select_for_worker(&self, _worker_id: &str) -> ClaimResult<Option<Credential>> {
        with_conn!(self.pool, conn, {
            credentials::table
                .filter(credentials::active.eq(true))
                .filter(credentials::failures.lt(MAX_FAILURES))
                .order((
                    credentials::last_used.is_null().desc(),
                    credentials::last_used.asc(),
                ))
                .limit(1)
                .first::<CredentialRecord>(&mut conn)
                .await
                .optional()
                .map_err(db_err)
                .map(|r| r.map(Credential::from))
        })
    }

    async fn record_success(&self, credential_id: &str) -> ClaimResult<()> {
        with_conn!(self.pool, conn, {
            diesel::update(credentials::table.filter(credentials::id.eq(credential_id)))
                .set((
                    credentials::last_used.eq(Utc::now()),
                    credentials::failures.eq(0),
                ))
                .execute(&mut conn)
                .await
                .map_err(db_err)?;
            Ok(())
        })
    }

    async fn record_failure(&self, credential_id: &str) -> ClaimResult<u32> {
        with_conn!(self.pool, conn, {
            let record = diesel::update(credentials::table.filter(credentials::id.eq(credential_id)))
                .set(credentials::failures.eq(credentials::failures + 1))
                .get_result::<CredentialRecord>(&mut conn)
                .await
                .map_err(db_err)?;
            Ok(record.failures as u32)
        })
    }
}
