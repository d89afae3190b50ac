//! [`SessionStore`] adapter backed by PostgreSQL.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use worktrack_core::session::{NewSession, Session, SessionSummary};
use worktrack_core::store::{
    SessionRange, SessionStore, StoreError, StoreResult, StoreTx, USERS_NAME_CONSTRAINT,
};
use worktrack_core::types::{DbId, Timestamp};
use worktrack_core::user::{NewUser, User};

use crate::repositories::{SessionRepo, UserRepo};
use crate::DbPool;

/// PostgreSQL unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// The session store over a shared connection pool.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: DbPool,
}

impl PgSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// An open join transaction. Dropping it without commit rolls back.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

/// Classify a sqlx error into the storage port taxonomy.
///
/// SQLSTATE `23505` becomes [`StoreError::UniqueViolation`] carrying the
/// constraint name; everything else is treated as an outage.
pub fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::UniqueViolation {
                constraint: db_err.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    tracing::error!(error = %err, "Database error");
    StoreError::Unavailable(err.to_string())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(classify)?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn ping(&self) -> StoreResult<()> {
        crate::health_check(&self.pool).await.map_err(classify)
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        let row = UserRepo::find_by_name(&self.pool, name)
            .await
            .map_err(classify)?;
        Ok(row.map(User::from))
    }

    async fn find_session_by_id(&self, id: DbId) -> StoreResult<Option<Session>> {
        let row = SessionRepo::find_by_id(&self.pool, id)
            .await
            .map_err(classify)?;
        Ok(row.map(Session::from))
    }

    async fn find_active_session_by_user(&self, user_id: DbId) -> StoreResult<Option<Session>> {
        let row = SessionRepo::find_active_by_user(&self.pool, user_id)
            .await
            .map_err(classify)?;
        Ok(row.map(Session::from))
    }

    async fn update_session_planned_end(
        &self,
        id: DbId,
        previous: Timestamp,
        planned_end: Timestamp,
    ) -> StoreResult<bool> {
        SessionRepo::update_planned_end(&self.pool, id, previous, planned_end)
            .await
            .map_err(classify)
    }

    async fn update_session_work_name(&self, id: DbId, work_name: &str) -> StoreResult<bool> {
        SessionRepo::update_work_name(&self.pool, id, work_name)
            .await
            .map_err(classify)
    }

    async fn complete_session_conditional(
        &self,
        id: DbId,
        actual_end: Timestamp,
    ) -> StoreResult<u64> {
        SessionRepo::complete_if_active(&self.pool, id, actual_end)
            .await
            .map_err(classify)
    }

    async fn expire_session_conditional(
        &self,
        id: DbId,
        planned_end: Timestamp,
        actual_end: Timestamp,
    ) -> StoreResult<u64> {
        SessionRepo::complete_if_due(&self.pool, id, planned_end, actual_end)
            .await
            .map_err(classify)
    }

    async fn list_all_active_sessions(&self) -> StoreResult<Vec<SessionSummary>> {
        let rows = SessionRepo::list_active(&self.pool)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().map(SessionSummary::from).collect())
    }

    async fn list_sessions_for_user(
        &self,
        user_id: DbId,
        range: SessionRange,
    ) -> StoreResult<Vec<Session>> {
        let rows = match range {
            SessionRange::All => SessionRepo::list_by_user(&self.pool, user_id).await,
            SessionRange::Between { from, to } => {
                SessionRepo::list_by_user_between(&self.pool, user_id, from, to).await
            }
        }
        .map_err(classify)?;
        Ok(rows.into_iter().map(Session::from).collect())
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn find_user_by_name_for_update(&mut self, name: &str) -> StoreResult<Option<User>> {
        let row = UserRepo::find_by_name_for_update(&mut *self.tx, name)
            .await
            .map_err(classify)?;
        Ok(row.map(User::from))
    }

    async fn create_user(&mut self, user: &NewUser) -> StoreResult<User> {
        match UserRepo::insert_if_absent(&mut *self.tx, user).await {
            Ok(Some(row)) => Ok(row.into()),
            Ok(None) => Err(StoreError::UniqueViolation {
                constraint: USERS_NAME_CONSTRAINT.to_string(),
            }),
            Err(e) => Err(classify(e)),
        }
    }

    async fn find_active_session_by_user_for_update(
        &mut self,
        user_id: DbId,
    ) -> StoreResult<Option<Session>> {
        let row = SessionRepo::find_active_by_user_for_update(&mut *self.tx, user_id)
            .await
            .map_err(classify)?;
        Ok(row.map(Session::from))
    }

    async fn create_session(&mut self, session: &NewSession) -> StoreResult<Session> {
        let row = SessionRepo::create(&mut *self.tx, session)
            .await
            .map_err(classify)?;
        Ok(row.into())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(classify)
    }
}
