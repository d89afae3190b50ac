//! Work session entity and its state transitions.
//!
//! A session is *active* while `actual_end` is `None`. The only transitions
//! are extension (advances `planned_end`), label change, and completion
//! (sets `actual_end` once, irreversibly).

use chrono::Duration;
use serde::Serialize;

use crate::error::CoreError;
use crate::tier::Tier;
use crate::types::{DbId, Timestamp};

/// Default length of a freshly joined session.
pub const DEFAULT_SESSION_MINUTES: i64 = 60;

/// Inclusive lower bound for a single extension.
pub const MIN_EXTENSION_MINUTES: i64 = 1;

/// Inclusive upper bound for a single extension.
pub const MAX_EXTENSION_MINUTES: i64 = 360;

/// A persisted work session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: DbId,
    pub user_id: DbId,
    pub work_name: String,
    pub start_time: Timestamp,
    pub planned_end: Timestamp,
    pub actual_end: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.actual_end.is_none()
    }

    /// Mark the session completed at `now`.
    ///
    /// Fails with [`CoreError::SessionAlreadyCompleted`] if `actual_end` was
    /// already set; the first completion is never overwritten.
    pub fn complete(&mut self, now: Timestamp) -> Result<Timestamp, CoreError> {
        if !self.is_active() {
            return Err(CoreError::SessionAlreadyCompleted(self.id));
        }
        self.actual_end = Some(now);
        self.updated_at = now;
        Ok(now)
    }

    /// Push `planned_end` forward by `minutes`. Returns the new planned end.
    pub fn extend(&mut self, minutes: i64, now: Timestamp) -> Result<Timestamp, CoreError> {
        let by = validate_extension(minutes)?;
        if !self.is_active() {
            return Err(CoreError::SessionAlreadyCompleted(self.id));
        }
        self.planned_end += by;
        self.updated_at = now;
        Ok(self.planned_end)
    }

    /// Replace the work label. Empty labels are allowed.
    pub fn change_work_name(&mut self, work_name: &str, now: Timestamp) -> Result<(), CoreError> {
        if !self.is_active() {
            return Err(CoreError::SessionAlreadyCompleted(self.id));
        }
        self.work_name = work_name.to_string();
        self.updated_at = now;
        Ok(())
    }

    /// Time worked so far: up to `actual_end` if completed, else up to `now`.
    pub fn worked(&self, now: Timestamp) -> Duration {
        let end = self.actual_end.unwrap_or(now);
        (end - self.start_time).max(Duration::zero())
    }
}

/// A session that has passed validation but has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub user_id: DbId,
    pub work_name: String,
    pub start_time: Timestamp,
    pub planned_end: Timestamp,
}

impl NewSession {
    /// Build an active session starting at `now` and planned to last `duration`.
    pub fn new(
        user_id: DbId,
        work_name: &str,
        duration: Duration,
        now: Timestamp,
    ) -> Result<Self, CoreError> {
        if duration <= Duration::zero() {
            return Err(CoreError::InvalidDuration);
        }
        Ok(Self {
            user_id,
            work_name: work_name.to_string(),
            start_time: now,
            planned_end: now + duration,
        })
    }
}

/// An active session joined with its owner, as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: DbId,
    pub user_id: DbId,
    pub user_name: String,
    pub work_name: String,
    pub tier: Tier,
    pub start_time: Timestamp,
    pub planned_end: Timestamp,
}

/// Check an extension request against `[MIN_EXTENSION_MINUTES, MAX_EXTENSION_MINUTES]`.
pub fn validate_extension(minutes: i64) -> Result<Duration, CoreError> {
    if !(MIN_EXTENSION_MINUTES..=MAX_EXTENSION_MINUTES).contains(&minutes) {
        return Err(CoreError::InvalidExtension {
            minutes,
            min: MIN_EXTENSION_MINUTES,
            max: MAX_EXTENSION_MINUTES,
        });
    }
    Ok(Duration::minutes(minutes))
}
