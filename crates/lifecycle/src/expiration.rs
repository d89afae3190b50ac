//! Automatic expiration of sessions at their planned end.
//!
//! [`ExpirationManager`] arms one Tokio timer task per active session and
//! records it in the shared [`TimerRegistry`]. When a timer fires, the
//! session is re-read and handed to the [`CompletionCoordinator`]. The store
//! write is conditional on the session still being active with the planned
//! end that was read, so neither a manual `out` nor a last-second extension
//! can be overridden.
//!
//! Timers are process-local. On startup [`ExpirationManager::initialize_from_database`]
//! rebuilds them from the active sessions in the store and completes any
//! session whose planned end passed while the process was down.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use worktrack_core::error::CoreError;
use worktrack_core::store::SessionStore;
use worktrack_core::types::{DbId, Timestamp};

use crate::completion::{CompletionCoordinator, CompletionOutcome};
use crate::deadline::bounded;
use crate::ports::ExpirationScheduler;
use crate::timers::{Armed, TimerRegistry};

/// A timer waking up this early relative to the stored planned end is
/// still treated as due.
const FIRE_TOLERANCE_MS: i64 = 1_000;

/// Delay before retrying an expiration that failed on a storage error.
const RETRY_DELAY_SECS: i64 = 5;

fn retry_at() -> Timestamp {
    Utc::now() + chrono::Duration::seconds(RETRY_DELAY_SECS)
}

/// What happened when an expiration was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationOutcome {
    Completed { actual_end: Timestamp },
    /// Ended manually (or by an earlier firing) before the timer got to it.
    AlreadyCompleted,
    /// The session no longer exists in the store.
    Missing,
    /// The planned end moved past now; the session is not due yet.
    Postponed { planned_end: Timestamp },
}

/// Counts from one startup reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub completed: usize,
    pub already_completed: usize,
    /// Overdue sessions that could not be completed; each has a retry armed.
    pub failed: usize,
}

pub struct ExpirationManager {
    registry: Arc<TimerRegistry>,
    store: Arc<dyn SessionStore>,
    completion: Arc<CompletionCoordinator>,
    storage_timeout: Duration,
    this: Weak<ExpirationManager>,
}

impl ExpirationManager {
    pub fn new(
        registry: Arc<TimerRegistry>,
        store: Arc<dyn SessionStore>,
        completion: Arc<CompletionCoordinator>,
        storage_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            store,
            completion,
            storage_timeout,
            this: this.clone(),
        })
    }

    pub fn registry(&self) -> &Arc<TimerRegistry> {
        &self.registry
    }

    /// Complete the session if it is still active and due.
    pub async fn handle_expiration(
        &self,
        session_id: DbId,
        user_id: DbId,
    ) -> Result<ExpirationOutcome, CoreError> {
        let session = bounded(
            self.storage_timeout,
            "find_session_by_id",
            self.store.find_session_by_id(session_id),
        )
        .await?;

        let Some(session) = session else {
            tracing::warn!(session_id, "Expired session no longer exists");
            return Ok(ExpirationOutcome::Missing);
        };
        if !session.is_active() {
            tracing::debug!(session_id, "Expired session was already completed");
            return Ok(ExpirationOutcome::AlreadyCompleted);
        }
        if session.planned_end > Utc::now() + chrono::Duration::milliseconds(FIRE_TOLERANCE_MS) {
            return Ok(ExpirationOutcome::Postponed {
                planned_end: session.planned_end,
            });
        }

        match self.completion.expire(session, user_id).await? {
            CompletionOutcome::Applied { actual_end } => {
                tracing::info!(session_id, user_id, "Session expired");
                Ok(ExpirationOutcome::Completed { actual_end })
            }
            CompletionOutcome::AlreadyCompleted => {
                // Ended elsewhere, or extended after the read above.
                let current = bounded(
                    self.storage_timeout,
                    "find_session_by_id",
                    self.store.find_session_by_id(session_id),
                )
                .await?;
                Ok(match current {
                    Some(s) if s.is_active() => {
                        tracing::debug!(session_id, planned_end = %s.planned_end, "Extended while expiring");
                        ExpirationOutcome::Postponed {
                            planned_end: s.planned_end,
                        }
                    }
                    Some(_) => ExpirationOutcome::AlreadyCompleted,
                    None => ExpirationOutcome::Missing,
                })
            }
        }
    }

    /// Rebuild timers from the store and complete overdue sessions.
    pub async fn initialize_from_database(&self) -> Result<ReconcileReport, CoreError> {
        let active = bounded(
            self.storage_timeout,
            "list_all_active_sessions",
            self.store.list_all_active_sessions(),
        )
        .await?;

        let now = Utc::now();
        let mut report = ReconcileReport::default();

        for summary in active {
            if summary.planned_end > now {
                self.arm(summary.session_id, summary.user_id, summary.planned_end);
                report.scheduled += 1;
                continue;
            }

            match self
                .handle_expiration(summary.session_id, summary.user_id)
                .await
            {
                Ok(ExpirationOutcome::Completed { .. }) => report.completed += 1,
                Ok(ExpirationOutcome::AlreadyCompleted | ExpirationOutcome::Missing) => {
                    report.already_completed += 1
                }
                Ok(ExpirationOutcome::Postponed { planned_end }) => {
                    self.arm(summary.session_id, summary.user_id, planned_end);
                    report.scheduled += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = summary.session_id,
                        error = %e,
                        "Failed to complete overdue session, retry armed"
                    );
                    self.arm(summary.session_id, summary.user_id, retry_at());
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            scheduled = report.scheduled,
            completed = report.completed,
            already_completed = report.already_completed,
            failed = report.failed,
            "Expiration timers reconciled"
        );
        Ok(report)
    }

    /// Cancel every pending timer. Returns how many were pending.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        tracing::info!(cancelled, "Expiration timers cancelled");
        cancelled
    }

    fn arm(&self, session_id: DbId, user_id: DbId, deadline: Timestamp) {
        let armed = self.registry.arm(session_id, deadline);
        self.spawn_timer(session_id, user_id, deadline, armed);
        tracing::debug!(session_id, %deadline, "Expiration timer armed");
    }

    fn spawn_timer(&self, session_id: DbId, user_id: DbId, deadline: Timestamp, armed: Armed) {
        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let manager = self.this.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = armed.token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Some(manager) = manager.upgrade() {
                manager.fire(session_id, user_id, armed.generation).await;
            }
        });
    }

    async fn fire(&self, session_id: DbId, user_id: DbId, generation: u64) {
        match self.handle_expiration(session_id, user_id).await {
            Ok(ExpirationOutcome::Postponed { planned_end }) => {
                // An extension moved the deadline; keep watching unless a
                // newer timer already took over.
                if let Some(armed) = self.registry.rearm_if_current(session_id, generation, planned_end) {
                    self.spawn_timer(session_id, user_id, planned_end, armed);
                }
            }
            Ok(_) => {
                self.registry.release(session_id, generation);
            }
            Err(e) if e.is_retryable() => {
                let next = retry_at();
                tracing::warn!(session_id, error = %e, retry_at = %next, "Expiration failed, retrying");
                if let Some(armed) = self.registry.rearm_if_current(session_id, generation, next) {
                    self.spawn_timer(session_id, user_id, next, armed);
                }
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "Expiration failed");
                self.registry.release(session_id, generation);
            }
        }
    }
}

impl ExpirationScheduler for ExpirationManager {
    fn schedule(&self, session_id: DbId, user_id: DbId, planned_end: Timestamp) {
        if planned_end <= Utc::now() {
            tracing::debug!(session_id, %planned_end, "Planned end already passed, no timer armed");
            return;
        }
        self.arm(session_id, user_id, planned_end);
    }

    /// An overdue `planned_end` arms a timer that fires immediately, so the
    /// session is never left without one.
    fn reschedule(&self, session_id: DbId, user_id: DbId, planned_end: Timestamp) {
        self.arm(session_id, user_id, planned_end);
    }
}
