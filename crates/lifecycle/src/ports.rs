//! Timer capabilities injected into the coordinators.
//!
//! Join and extension only need to *arm* timers; completion only needs to
//! *disarm* them. Splitting the two keeps the completion path free of any
//! reference back to the scheduler that calls it.

use worktrack_core::types::{DbId, Timestamp};

/// Arms expiration timers for active sessions.
pub trait ExpirationScheduler: Send + Sync {
    /// Arm a one-shot timer at `planned_end`. A deadline already in the
    /// past arms nothing; the caller completes such sessions itself.
    fn schedule(&self, session_id: DbId, user_id: DbId, planned_end: Timestamp);

    /// Replace any timer for `session_id` with one at `planned_end`.
    fn reschedule(&self, session_id: DbId, user_id: DbId, planned_end: Timestamp);
}

/// Disarms expiration timers.
pub trait ExpirationCanceller: Send + Sync {
    /// Disarm and forget the timer for `session_id`. Absent ids are ignored.
    fn cancel(&self, session_id: DbId);
}

/// Scheduler and canceller that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTimers;

impl ExpirationScheduler for NoopTimers {
    fn schedule(&self, _session_id: DbId, _user_id: DbId, _planned_end: Timestamp) {}

    fn reschedule(&self, _session_id: DbId, _user_id: DbId, _planned_end: Timestamp) {}
}

impl ExpirationCanceller for NoopTimers {
    fn cancel(&self, _session_id: DbId) {}
}
