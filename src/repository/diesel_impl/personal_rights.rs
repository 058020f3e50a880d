//! Personal/movable rights search claim/completion (spec §3, §4.2, §6 S6).

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::models::PersonalRightsSearch;
use crate::repository::pool::PgPool;
use crate::repository::schema::personal_rights_searches;
use crate::repository::{ClaimError, ClaimResult, PersonalRightsRepository};
use crate::with_conn;

use super::records::SearchRecord;

pub struct DieselPersonalRightsRepository {
    pub(crate) pool: PgPool,
}

fn db_err(e: diesel::result::Error) -> ClaimError {
    ClaimError::Database(e.to_string())
}

#[async_trait]
impl PersonalRightsRepository for DieselPersonalRightsRepository {
    async fn claim_pending(&self, worker_id: &str) -> ClaimResult<Option<PersonalRightsSearch>> {
        let worker_id = worker_id.to_string();
        with_conn!(self.pool, conn, {
            conn.transaction(|conn| {
                let worker_id = worker_id.clone();
                Box::pin(async move {
                    let candidate: Option<SearchRecord> = personal_rights_searches::table
                        .filter(personal_rights_searches::status.eq("pending"))
                        .filter(personal_rights_searches::worker_id.is_null())
                        .order(personal_rights_searches::created_at.asc())
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
                        personal_rights_searches::table
                            .filter(personal_rights_searches::id.eq(&candidate.id))
                            .filter(personal_rights_searches::worker_id.is_null()),
                    )
                    .set((
                        personal_rights_searches::status.eq("in_progress"),
                        personal_rights_searches::worker_id.eq(&worker_id),
                    ))
                    .get_result::<SearchRecord>(conn)
                    .await
                    .optional()?;

                    Ok(updated.map(PersonalRightsSearch::from))
                })
            })
            .await
            .map_err(db_err)
        })
    }

    async fn complete(
        &self,
        search_id: &str,
        worker_id: &str,
        artifact_path: &str,
    ) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                personal_rights_searches::table
                    .filter(personal_rights_searches::id.eq(search_id))
                    .filter(personal_rights_searches::worker_id.eq(worker_id)),
            )
            .set((
                personal_rights_searches::status.eq("completed"),
                personal_rights_searches::worker_id.eq(None::<String>),
                personal_rights_searches::completed_at.eq(Utc::now()),
                personal_rights_searches::artifact_path.eq(artifact_path),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
            Ok(rows > 0)
        })
    }

    async fn not_found(&self, search_id: &str, worker_id: &str) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                personal_rights_searches::table
                    .filter(personal_rights_searches::id.eq(search_id))
                    .filter(personal_rights_searches::worker_id.eq(worker_id)),
            )
            .set((
                personal_rights_searches::status.eq("not_found"),
                personal_rights_searches::worker_id.eq(None::<String>),
                personal_rights_searches::completed_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
            Ok(rows > 0)
        })
    }

    async fn fail(&self, search_id: &str, worker_id: &str, message: &str) -> ClaimResult<bool> {
        with_conn!(self.pool, conn, {
            let rows = diesel::update(
                personal_rights_searches::table
                    .filter(personal_rights_searches::id.eq(search_id))
                    .filter(personal_rights_searches::worker_id.eq(worker_id)),
            )
            .set((
                personal_rights_searches::status.eq("failed"),
                personal_rights_searches::worker_id.eq(None::<String>),
                personal_rights_searches::completed_at.eq(Utc::now()),
                personal_rights_searches::last_error.eq(message),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
            Ok(rows > 0)
        })
    }

    async fn all_terminal_for_session(&self, session_id: &str) -> ClaimResult<bool> {
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
            Ok(non_terminal == 0)
        })
    }
}
