//! Session creation under the one-active-session-per-user rule.
//!
//! All reads and writes for one join run in a single store transaction.
//! The user row is locked first, so concurrent joins for the same user are
//! linearized and the active-session check cannot race. Joins for
//! different users lock different rows and proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use worktrack_core::error::CoreError;
use worktrack_core::session::{NewSession, Session};
use worktrack_core::store::{SessionStore, StoreError, StoreTx, ACTIVE_SESSION_INDEX};
use worktrack_core::tier::Tier;
use worktrack_core::types::{DbId, Timestamp};
use worktrack_core::user::{normalize_user_name, NewUser, User};
use worktrack_events::{EventPublisher, SessionEvent};

use crate::deadline::{bounded, detached, elapsed, settle_later, Settled};
use crate::ports::ExpirationScheduler;

const COMMIT_OP: &str = "commit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub user_name: String,
    pub work_name: String,
    /// Tier for a user created by this join. Ignored for existing users.
    pub tier: Option<Tier>,
}

impl JoinRequest {
    pub fn new(user_name: impl Into<String>, work_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            work_name: work_name.into(),
            tier: None,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinOutcome {
    pub session_id: DbId,
    pub user_id: DbId,
    pub work_name: String,
    pub start_time: Timestamp,
    pub planned_end: Timestamp,
    pub is_new_user: bool,
}

pub struct JoinCoordinator {
    store: Arc<dyn SessionStore>,
    scheduler: Arc<dyn ExpirationScheduler>,
    publisher: Arc<dyn EventPublisher>,
    default_duration: chrono::Duration,
    storage_timeout: Duration,
}

impl JoinCoordinator {
    /// Fails with [`CoreError::InvalidDuration`] if `default_duration` is not positive.
    pub fn new(
        store: Arc<dyn SessionStore>,
        scheduler: Arc<dyn ExpirationScheduler>,
        publisher: Arc<dyn EventPublisher>,
        default_duration: chrono::Duration,
        storage_timeout: Duration,
    ) -> Result<Self, CoreError> {
        if default_duration <= chrono::Duration::zero() {
            return Err(CoreError::InvalidDuration);
        }
        Ok(Self {
            store,
            scheduler,
            publisher,
            default_duration,
            storage_timeout,
        })
    }

    pub fn default_duration(&self) -> chrono::Duration {
        self.default_duration
    }

    /// Start a session for `request.user_name`, creating the user on first join.
    pub async fn join(&self, request: &JoinRequest) -> Result<JoinOutcome, CoreError> {
        let user_name = normalize_user_name(&request.user_name)?;
        let tier = request.tier.unwrap_or_default();

        let mut tx = bounded(self.storage_timeout, "begin", self.store.begin()).await?;

        let (user, session, is_new_user) =
            match self.join_in_tx(tx.as_mut(), &user_name, &request.work_name, tier).await {
                Ok(created) => created,
                Err(e) => {
                    if let Err(rollback_err) =
                        bounded(self.storage_timeout, "rollback", tx.rollback()).await
                    {
                        tracing::warn!(error = %rollback_err, user_name, "Join rollback failed");
                    }
                    return Err(e);
                }
            };

        let started = Started {
            scheduler: Arc::clone(&self.scheduler),
            publisher: Arc::clone(&self.publisher),
            user,
            session: session.clone(),
            is_new_user,
        };

        // Timers and events only follow a durable commit.
        match detached(self.storage_timeout, COMMIT_OP, async move { tx.commit().await }).await {
            Settled::Done(committed) => {
                committed.map_err(|e| self.map_session_insert_error(e, &user_name))?
            }
            Settled::Pending(handle) => {
                // The commit may still land; the session must not be left
                // without a timer or a start event.
                settle_later(COMMIT_OP, handle, move |()| started.apply(true));
                return Err(elapsed(self.storage_timeout, COMMIT_OP).into());
            }
        }
        let user_id = started.user.id;
        started.apply(false);

        Ok(JoinOutcome {
            session_id: session.id,
            user_id,
            work_name: session.work_name,
            start_time: session.start_time,
            planned_end: session.planned_end,
            is_new_user,
        })
    }

    async fn join_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        user_name: &str,
        work_name: &str,
        tier: Tier,
    ) -> Result<(User, Session, bool), CoreError> {
        let (user, is_new_user) = self.lock_or_create_user(tx, user_name, tier).await?;

        let active = bounded(
            self.storage_timeout,
            "find_active_session_by_user_for_update",
            tx.find_active_session_by_user_for_update(user.id),
        )
        .await?;
        if let Some(active) = active {
            tracing::debug!(
                user_id = user.id,
                session_id = active.id,
                "Join rejected, session already active"
            );
            return Err(CoreError::UserAlreadyInSession(user.name));
        }

        let new_session = NewSession::new(user.id, work_name, self.default_duration, Utc::now())?;
        let session = bounded(
            self.storage_timeout,
            "create_session",
            tx.create_session(&new_session),
        )
        .await
        .map_err(|e| self.map_session_insert_error(e, user_name))?;

        Ok((user, session, is_new_user))
    }

    /// Lock the user row, inserting the user if it does not exist yet.
    ///
    /// Two first-joins for the same name race on the insert; the loser sees
    /// a unique violation and re-reads the winner's row once.
    async fn lock_or_create_user(
        &self,
        tx: &mut dyn StoreTx,
        user_name: &str,
        tier: Tier,
    ) -> Result<(User, bool), CoreError> {
        let existing = bounded(
            self.storage_timeout,
            "find_user_by_name_for_update",
            tx.find_user_by_name_for_update(user_name),
        )
        .await?;
        if let Some(user) = existing {
            return Ok((user, false));
        }

        let new_user = NewUser::new(user_name, tier)?;
        match bounded(self.storage_timeout, "create_user", tx.create_user(&new_user)).await {
            Ok(user) => Ok((user, true)),
            Err(StoreError::UniqueViolation { constraint }) => {
                tracing::debug!(user_name, constraint, "Concurrent first join, re-reading user");
                let winner = bounded(
                    self.storage_timeout,
                    "find_user_by_name_for_update",
                    tx.find_user_by_name_for_update(user_name),
                )
                .await?;
                winner.map(|user| (user, false)).ok_or_else(|| {
                    CoreError::StorageUnavailable(format!(
                        "user {user_name} not visible after conflicting insert"
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn map_session_insert_error(&self, err: StoreError, user_name: &str) -> CoreError {
        match err {
            StoreError::UniqueViolation { constraint } if constraint == ACTIVE_SESSION_INDEX => {
                CoreError::UserAlreadyInSession(user_name.to_string())
            }
            other => other.into(),
        }
    }
}

/// Follow-up of a committed join.
struct Started {
    scheduler: Arc<dyn ExpirationScheduler>,
    publisher: Arc<dyn EventPublisher>,
    user: User,
    session: Session,
    is_new_user: bool,
}

impl Started {
    /// `late` marks a commit acknowledged after the caller gave up.
    fn apply(self, late: bool) {
        let Self {
            scheduler,
            publisher,
            user,
            session,
            is_new_user,
        } = self;

        if late {
            // Arms even if the planned end passed while the commit was in flight.
            scheduler.reschedule(session.id, user.id, session.planned_end);
        } else {
            scheduler.schedule(session.id, user.id, session.planned_end);
        }
        publisher.publish(SessionEvent::started(&user, &session));

        tracing::info!(
            session_id = session.id,
            user_id = user.id,
            user_name = %user.name,
            is_new_user,
            planned_end = %session.planned_end,
            "Session started"
        );
    }
}
