//! Postgres-backed implementation of the [`Repositories`] bundle, one
//! instance per configured environment (spec §4.1).

mod credentials;
mod jobs;
mod personal_rights;
mod records;
mod sessions;
mod workers;

pub use credentials::DieselCredentialRepository;
pub use jobs::DieselJobRepository;
pub use personal_rights::DieselPersonalRightsRepository;
pub use sessions::DieselSessionRepository;
pub use workers::DieselWorkerStatusRepository;

use super::pool::PgPool;
use super::{
    CredentialRepository, JobRepository, PersonalRightsRepository, Repositories,
    SessionRepository, WorkerStatusRepository,
};

pub struct DieselRepositories {
    jobs: DieselJobRepository,
    sessions: DieselSessionRepository,
    personal_rights: DieselPersonalRightsRepository,
    worker_status: DieselWorkerStatusRepository,
    credentials: DieselCredentialRepository,
}

impl DieselRepositories {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::new(database_url)?;
        Ok(Self {
            jobs: DieselJobRepository { pool: pool.clone() },
            sessions: DieselSessionRepository { pool: pool.clone() },
            personal_rights: DieselPersonalRightsRepository { pool: pool.clone() },
            worker_status: DieselWorkerStatusRepository { pool: pool.clone() },
            credentials: DieselCredentialRepository { pool },
        })
    }
}

impl Repositories for DieselRepositories {
    fn jobs(&self) -> &dyn JobRepository {
        &self.jobs
    }

    fn sessions(&self) -> &dyn SessionRepository {
        &self.sessions
    }

    fn personal_rights(&self) -> &dyn PersonalRightsRepository {
        &self.personal_rights
    }

    fn worker_status(&self) -> &dyn WorkerStatusRepository {
        &self.worker_status
    }

    fn credentials(&self) -> &dyn CredentialRepository {
        &self.credentials
    }
}
