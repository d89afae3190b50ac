//! The single path that ends a session.
//!
//! Manual `out` and timer expiry both call [`CompletionCoordinator::complete`].
//! They may run at the same moment on different workers, so the store write
//! is conditional on the row still being active; the loser sees zero rows
//! affected and reports [`CompletionOutcome::AlreadyCompleted`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use worktrack_core::error::CoreError;
use worktrack_core::session::Session;
use worktrack_core::store::SessionStore;
use worktrack_core::types::{DbId, Timestamp};
use worktrack_events::{EventPublisher, SessionEvent};

use crate::deadline::{detached, elapsed, settle_later, Settled};
use crate::ports::ExpirationCanceller;

/// Result of a completion attempt that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// This call ended the session and published `session_end`.
    Applied { actual_end: Timestamp },
    /// Another caller ended the session first. Nothing was written or published.
    AlreadyCompleted,
}

pub struct CompletionCoordinator {
    store: Arc<dyn SessionStore>,
    publisher: Arc<dyn EventPublisher>,
    canceller: Arc<dyn ExpirationCanceller>,
    storage_timeout: Duration,
}

impl CompletionCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        publisher: Arc<dyn EventPublisher>,
        canceller: Arc<dyn ExpirationCanceller>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            canceller,
            storage_timeout,
        }
    }

    /// End `session` now.
    ///
    /// Fails with [`CoreError::SessionAlreadyCompleted`] when the given
    /// snapshot is already completed. A snapshot that was active when read
    /// but completed by someone else before the write yields
    /// [`CompletionOutcome::AlreadyCompleted`].
    pub async fn complete(
        &self,
        session: Session,
        user_id: DbId,
    ) -> Result<CompletionOutcome, CoreError> {
        self.finish(session, user_id, Guard::Active).await
    }

    /// End `session` because its planned end arrived.
    ///
    /// The write only applies while the stored planned end is still the one
    /// in `session`, so an extension committed after the read wins. Both an
    /// extension and an earlier completion yield
    /// [`CompletionOutcome::AlreadyCompleted`] and leave the timer alone;
    /// the caller re-reads to tell them apart.
    pub async fn expire(
        &self,
        session: Session,
        user_id: DbId,
    ) -> Result<CompletionOutcome, CoreError> {
        let planned_end = session.planned_end;
        self.finish(session, user_id, Guard::PlannedEnd(planned_end)).await
    }

    async fn finish(
        &self,
        mut session: Session,
        user_id: DbId,
        guard: Guard,
    ) -> Result<CompletionOutcome, CoreError> {
        let actual_end = session.complete(Utc::now())?;
        let session_id = session.id;

        let store = Arc::clone(&self.store);
        let write = async move {
            match guard {
                Guard::Active => store.complete_session_conditional(session_id, actual_end).await,
                Guard::PlannedEnd(planned_end) => {
                    store
                        .expire_session_conditional(session_id, planned_end, actual_end)
                        .await
                }
            }
        };

        let effects = Effects {
            publisher: Arc::clone(&self.publisher),
            canceller: Arc::clone(&self.canceller),
            session_id,
            user_id,
            actual_end,
            guard,
        };

        match detached(self.storage_timeout, WRITE_OP, write).await {
            Settled::Done(rows) => Ok(effects.apply(rows?)),
            Settled::Pending(handle) => {
                // The write may still land; whoever sees its result publishes.
                settle_later(WRITE_OP, handle, move |rows| {
                    effects.apply(rows);
                });
                Err(elapsed(self.storage_timeout, WRITE_OP).into())
            }
        }
    }
}

const WRITE_OP: &str = "complete_session_conditional";

#[derive(Debug, Clone, Copy)]
enum Guard {
    Active,
    PlannedEnd(Timestamp),
}

/// Side effects of a completion write, run once its row count is known.
struct Effects {
    publisher: Arc<dyn EventPublisher>,
    canceller: Arc<dyn ExpirationCanceller>,
    session_id: DbId,
    user_id: DbId,
    actual_end: Timestamp,
    guard: Guard,
}

impl Effects {
    fn apply(self, rows: u64) -> CompletionOutcome {
        let Self {
            publisher,
            canceller,
            session_id,
            user_id,
            actual_end,
            guard,
        } = self;

        if rows == 0 {
            // A manual end disarms either way; an expiry that lost to an
            // extension must keep the rescheduled timer.
            if matches!(guard, Guard::Active) {
                canceller.cancel(session_id);
            }
            tracing::debug!(session_id, user_id, "Session already completed or extended");
            return CompletionOutcome::AlreadyCompleted;
        }

        canceller.cancel(session_id);
        publisher.publish(SessionEvent::Ended {
            id: session_id,
            user_id,
            actual_end,
        });
        tracing::info!(session_id, user_id, %actual_end, "Session completed");

        CompletionOutcome::Applied { actual_end }
    }
}
