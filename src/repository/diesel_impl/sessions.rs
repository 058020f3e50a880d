//! Business-registry session claim/close logic (spec §3 "Session", §4.4 step 2).

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::models::BusinessRegistrySession;
use crate::repository::pool::PgPool;
use crate::repository::schema::{business_registry_sessions, personal_rights_searches};
use crate::repository::{ClaimError, ClaimResult, SessionRepository};
use crate::with_conn;

use super::records::SessionRecord;

pub struct DieselSessionRepository {
    pub(crate) pool: PgPool,
}

fn db_err(e: diesel::result::Error) -> ClaimError {
    ClaimError::Database(e.to_string())
}

#[async_trait]
impl SessionRepository for DieselSessionRepository {
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<BusinessRegistrySession>> {
        let worker_id = worker_id.to_string();
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let worker_id = worker_id.clone();
                Box::pin(async move {
                    let candidate: Option<SessionRecord> = business_registry_sessions::table
                        .filter(business_registry_sessions::status.eq("pending_company_selection"))
                        .filter(business_registry_sessions::req_completed.eq(true))
                        .filter(business_registry_sessions::worker_id.is_null())
                        .order(business_registry_sessions::created_at.asc())
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
                        business_registry_sessions::table
                            .filter(business_registry_sessions::id.eq(&candidate.id))
                            .filter(business_registry_sessions::worker_id.is_null()),
                    )
                    .set((
                        business_registry_sessions::status.eq("processing"),
                        business_registry_sessions::worker_id.eq(&worker_id),
                    ))
                    .get_result::<SessionRecord>(conn)
                    .await
                    .optional()?;

                    Ok(updated.map(BusinessRegistrySession::from))
                })
            })
            .await
            .map_err(db_err)
        })
    }

    async fn complete(&self, session_id: &str, worker_id: &str) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                business_registry_sessions::table
                    .filter(business_registry_sessions::id.eq(session_id))
                    .filter(business_registry_sessions::worker_id.eq(worker_id)),
            )
            .set((
                business_registry_sessions::status.eq("completed"),
                business_registry_sessions::worker_id.eq(None::<String>),
                business_registry_sessions::completed_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
            Ok(rows > 0)
        })
    }

    async fn fail(&self, session_id: &str, worker_id: &str, message: &str) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                business_registry_sessions::table
                    .filter(business_registry_sessions::id.eq(session_id))
                    .filter(business_registry_sessions::worker_id.eq(worker_id)),
            )
            .set((
                business_registry_sessions::status.eq("error"),
                business_registry_sessions::worker_id.eq(None::<String>),
                business_registry_sessions::last_error.eq(message),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
            Ok(rows > 0)
        })
    }

    async fn get(&self, session_id: &str) -> ClaimResult<Option<BusinessRegistrySession>> {
        with_conn!(self.pool, conn, {
            business_registry_sessions::table
                .filter(business_registry_sessions::id.eq(session_id))
                .first::<SessionRecord>(&mut conn)
                .await
                .optional()
                .map_err(db_err)
                .map(|r| r.map(BusinessRegistrySession::from))
        })
    }

    async fn close_if_all_children_terminal(&self, session_id: &str) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            let non_terminal: i64 = personal_rights_searches::table
                .filter(personal_rights_searches::session_id.eq(session_id))
                .filter(
                    personal_rights_searches::status
                        .eq("pending")
                        .or(personal_rights_searches::status.eq("in_progress")),
                )
                .count()
                .get_result(&mut conn)
                .await
                .map_err(db_err)?;

            if non_terminal > 0 {
                return Ok(false);
            }

            let rows = diesel::update(
                business_registry_sessions::table
                    .filter(business_registry_sessions::id.eq(session_id))
                    .filter(business_registry_sessions::status.eq("processing")),
            )
            .set((
                business_registry_sessions::status.eq("completed"),
                business_registry_sessions::completed_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;

            Ok(rows > 0)
        })
    }
}
