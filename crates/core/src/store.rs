//! Storage port consumed by the lifecycle coordinators.
//!
//! The durable store is the single source of truth for users and sessions.
//! [`SessionStore`] covers autocommit reads and conditional writes;
//! [`StoreTx`] covers the row-locking operations the join path runs inside
//! one transaction. Dropping a [`StoreTx`] without committing rolls it back.

use async_trait::async_trait;

use crate::session::{NewSession, Session, SessionSummary};
use crate::types::{DbId, Timestamp};
use crate::user::{NewUser, User};

/// Errors raised by storage adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (e.g. two first-joins racing).
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// The store could not be reached or the statement failed.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Partial unique index allowing one active session per user.
pub const ACTIVE_SESSION_INDEX: &str = "uq_sessions_active_user";

/// Unique constraint on user names.
pub const USERS_NAME_CONSTRAINT: &str = "uq_users_name";

/// Time window for per-user session listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRange {
    All,
    /// Sessions whose `start_time` lies in `[from, to)`.
    Between { from: Timestamp, to: Timestamp },
}

/// Autocommit operations on the session store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a transaction for the join path.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Cheap reachability check used by the health endpoint.
    async fn ping(&self) -> StoreResult<()>;

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>>;

    async fn find_session_by_id(&self, id: DbId) -> StoreResult<Option<Session>>;

    async fn find_active_session_by_user(&self, user_id: DbId) -> StoreResult<Option<Session>>;

    /// Move `planned_end` from `previous` to `planned_end`.
    ///
    /// Applies only while the session is active and its planned end still
    /// equals `previous`. Returns whether the row was updated.
    async fn update_session_planned_end(
        &self,
        id: DbId,
        previous: Timestamp,
        planned_end: Timestamp,
    ) -> StoreResult<bool>;

    /// Overwrite the work label of an active session. Returns whether the row was updated.
    async fn update_session_work_name(&self, id: DbId, work_name: &str) -> StoreResult<bool>;

    /// Set `actual_end` only if it is still `NULL`. Returns rows affected (0 or 1).
    async fn complete_session_conditional(&self, id: DbId, actual_end: Timestamp)
        -> StoreResult<u64>;

    /// Set `actual_end` only if it is still `NULL` and the planned end still
    /// equals `planned_end`, the value the expiring caller saw as due. An
    /// extension that lands in between makes this a no-op. Returns rows
    /// affected (0 or 1).
    async fn expire_session_conditional(
        &self,
        id: DbId,
        planned_end: Timestamp,
        actual_end: Timestamp,
    ) -> StoreResult<u64>;

    /// Every active session with its owner, for startup reconciliation and listings.
    async fn list_all_active_sessions(&self) -> StoreResult<Vec<SessionSummary>>;

    async fn list_sessions_for_user(
        &self,
        user_id: DbId,
        range: SessionRange,
    ) -> StoreResult<Vec<Session>>;
}

/// Row-locking operations available inside a join transaction.
#[async_trait]
pub trait StoreTx: Send {
    /// Look up a user and lock the row until commit or rollback.
    async fn find_user_by_name_for_update(&mut self, name: &str) -> StoreResult<Option<User>>;

    /// Insert a user. A concurrent insert of the same name yields
    /// [`StoreError::UniqueViolation`] without poisoning the transaction.
    async fn create_user(&mut self, user: &NewUser) -> StoreResult<User>;

    async fn find_active_session_by_user_for_update(
        &mut self,
        user_id: DbId,
    ) -> StoreResult<Option<Session>>;

    async fn create_session(&mut self, session: &NewSession) -> StoreResult<Session>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
