//! Per-environment async Postgres connection pool.
//!
//! Grounded on `monokrome-foiacquire/src/repository/pool.rs`, simplified to
//! the Postgres-only case: each configured environment (spec §4.1) owns one
//! independent deadpool-backed pool, with no cross-environment sharing.

use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

/// Diesel error type alias, re-exported so callers don't need to depend on
/// `diesel` directly.
pub type DbError = diesel::result::Error;

/// A pooled async Postgres connection.
pub type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// One environment's connection pool.
#[derive(Clone)]
pub struct PgPool {
    pool: DeadPool<AsyncPgConnection>,
}

impl PgPool {
    pub fn new(database_url: &str) -> Result<Self, DbError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = DeadPool::builder(manager)
            .build()
            .map_err(|e| DbError::QueryBuilderError(Box::new(std::io::Error::other(e.to_string()))))?;
        Ok(Self { pool })
    }

    pub async fn get(&self) -> Result<PgConn, DbError> {
        self.pool
            .get()
            .await
            .map_err(|e| DbError::QueryBuilderError(Box::new(std::io::Error::other(e.to_string()))))
    }
}

/// Obtain a connection from `$pool` and run `$body` against it, mapping pool
/// acquisition failures into the surrounding `Result<_, DbError>`. Mirrors
/// the `with_conn!` convenience macro in the teacher's `diesel_crawl` module.
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident, $body:block) => {{
        let mut $conn = $pool.get().await?;
        $body
    }};
}
