//! `out`, `more` and `change` commands on a user's active session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use worktrack_core::error::CoreError;
use worktrack_core::session::{validate_extension, Session};
use worktrack_core::store::SessionStore;
use worktrack_core::types::{DbId, Timestamp};
use worktrack_core::user::{normalize_user_name, User};
use worktrack_events::{EventPublisher, SessionEvent};

use crate::completion::{CompletionCoordinator, CompletionOutcome};
use crate::deadline::{bounded, detached, elapsed, settle_later, Settled};
use crate::ports::ExpirationScheduler;

/// Attempts at the planned-end compare-and-set before giving up.
const MAX_EXTEND_ATTEMPTS: usize = 5;

const EXTEND_OP: &str = "update_session_planned_end";
const LABEL_OP: &str = "update_session_work_name";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutOutcome {
    pub session_id: DbId,
    pub user_id: DbId,
    pub actual_end: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtendOutcome {
    pub session_id: DbId,
    pub user_id: DbId,
    pub previous_planned_end: Timestamp,
    pub planned_end: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeLabelOutcome {
    pub session_id: DbId,
    pub user_id: DbId,
    pub work_name: String,
}

pub struct CommandCoordinator {
    store: Arc<dyn SessionStore>,
    completion: Arc<CompletionCoordinator>,
    scheduler: Arc<dyn ExpirationScheduler>,
    publisher: Arc<dyn EventPublisher>,
    storage_timeout: Duration,
}

impl CommandCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        completion: Arc<CompletionCoordinator>,
        scheduler: Arc<dyn ExpirationScheduler>,
        publisher: Arc<dyn EventPublisher>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            completion,
            scheduler,
            publisher,
            storage_timeout,
        }
    }

    /// End the user's active session now.
    ///
    /// If an expiration timer wins the race, the session's recorded end is
    /// returned and no second `session_end` is published.
    pub async fn out(&self, user_name: &str) -> Result<OutOutcome, CoreError> {
        let (user, session) = self.load_active(user_name).await?;
        let session_id = session.id;

        let actual_end = match self.completion.complete(session, user.id).await? {
            CompletionOutcome::Applied { actual_end } => actual_end,
            CompletionOutcome::AlreadyCompleted => {
                let current = bounded(
                    self.storage_timeout,
                    "find_session_by_id",
                    self.store.find_session_by_id(session_id),
                )
                .await?;
                let actual_end = current.and_then(|s| s.actual_end).ok_or_else(|| {
                    CoreError::StorageUnavailable(format!(
                        "session {session_id} reported completed without an end time"
                    ))
                })?;
                tracing::info!(session_id, user_id = user.id, "Out raced with expiration");
                actual_end
            }
        };

        Ok(OutOutcome {
            session_id,
            user_id: user.id,
            actual_end,
        })
    }

    /// Push the active session's planned end forward by `minutes`.
    ///
    /// The store update is a compare-and-set on the planned end that was
    /// read, so concurrent extensions add up instead of overwriting each other.
    pub async fn extend(&self, user_name: &str, minutes: i64) -> Result<ExtendOutcome, CoreError> {
        validate_extension(minutes)?;
        let user = self.load_user(user_name).await?;

        for attempt in 1..=MAX_EXTEND_ATTEMPTS {
            let mut session = self.load_active_for(&user).await?;
            let previous_planned_end = session.planned_end;
            let planned_end = session.extend(minutes, Utc::now())?;

            let store = Arc::clone(&self.store);
            let session_id = session.id;
            let write = async move {
                store
                    .update_session_planned_end(session_id, previous_planned_end, planned_end)
                    .await
            };
            let effects = Extension {
                scheduler: Arc::clone(&self.scheduler),
                publisher: Arc::clone(&self.publisher),
                session_id,
                user_id: user.id,
                minutes,
                planned_end,
            };

            let applied = match detached(self.storage_timeout, EXTEND_OP, write).await {
                Settled::Done(applied) => applied?,
                Settled::Pending(handle) => {
                    settle_later(EXTEND_OP, handle, move |applied| {
                        if applied {
                            effects.apply();
                        }
                    });
                    return Err(elapsed(self.storage_timeout, EXTEND_OP).into());
                }
            };

            if applied {
                effects.apply();
                return Ok(ExtendOutcome {
                    session_id,
                    user_id: user.id,
                    previous_planned_end,
                    planned_end,
                });
            }

            tracing::debug!(session_id = session.id, attempt, "Planned end moved, retrying extension");
        }

        Err(CoreError::StorageConflict(format!(
            "planned end for {} kept changing",
            user.name
        )))
    }

    /// Replace the active session's work label. Empty labels are allowed.
    pub async fn change_label(
        &self,
        user_name: &str,
        work_name: &str,
    ) -> Result<ChangeLabelOutcome, CoreError> {
        let (user, mut session) = self.load_active(user_name).await?;
        session.change_work_name(work_name, Utc::now())?;

        let store = Arc::clone(&self.store);
        let session_id = session.id;
        let label = session.work_name.clone();
        let write = async move { store.update_session_work_name(session_id, &label).await };
        let effects = LabelChange {
            publisher: Arc::clone(&self.publisher),
            session_id,
            user_id: user.id,
            work_name: session.work_name.clone(),
        };

        let applied = match detached(self.storage_timeout, LABEL_OP, write).await {
            Settled::Done(applied) => applied?,
            Settled::Pending(handle) => {
                settle_later(LABEL_OP, handle, move |applied| {
                    if applied {
                        effects.apply();
                    }
                });
                return Err(elapsed(self.storage_timeout, LABEL_OP).into());
            }
        };
        if !applied {
            // Completed between the read and the write.
            return Err(CoreError::SessionNotFound { user_id: user.id });
        }
        effects.apply();

        Ok(ChangeLabelOutcome {
            session_id: session.id,
            user_id: user.id,
            work_name: session.work_name,
        })
    }

    async fn load_user(&self, user_name: &str) -> Result<User, CoreError> {
        let name = normalize_user_name(user_name)?;
        bounded(
            self.storage_timeout,
            "find_user_by_name",
            self.store.find_user_by_name(&name),
        )
        .await?
        .ok_or(CoreError::UserNotFound(name))
    }

    async fn load_active_for(&self, user: &User) -> Result<Session, CoreError> {
        bounded(
            self.storage_timeout,
            "find_active_session_by_user",
            self.store.find_active_session_by_user(user.id),
        )
        .await?
        .ok_or(CoreError::SessionNotFound { user_id: user.id })
    }

    async fn load_active(&self, user_name: &str) -> Result<(User, Session), CoreError> {
        let user = self.load_user(user_name).await?;
        let session = self.load_active_for(&user).await?;
        Ok((user, session))
    }
}

/// Follow-up of an applied planned-end update.
struct Extension {
    scheduler: Arc<dyn ExpirationScheduler>,
    publisher: Arc<dyn EventPublisher>,
    session_id: DbId,
    user_id: DbId,
    minutes: i64,
    planned_end: Timestamp,
}

impl Extension {
    fn apply(self) {
        self.scheduler
            .reschedule(self.session_id, self.user_id, self.planned_end);
        self.publisher.publish(SessionEvent::Extended {
            id: self.session_id,
            user_id: self.user_id,
            new_planned_end: self.planned_end,
        });
        tracing::info!(
            session_id = self.session_id,
            user_id = self.user_id,
            minutes = self.minutes,
            planned_end = %self.planned_end,
            "Session extended"
        );
    }
}

/// Follow-up of an applied work-name update.
struct LabelChange {
    publisher: Arc<dyn EventPublisher>,
    session_id: DbId,
    user_id: DbId,
    work_name: String,
}

impl LabelChange {
    fn apply(self) {
        tracing::info!(session_id = self.session_id, user_id = self.user_id, "Work name changed");
        self.publisher.publish(SessionEvent::LabelChanged {
            id: self.session_id,
            user_id: self.user_id,
            work_name: self.work_name,
        });
    }
}
