//! Process-local registry of armed expiration timers.
//!
//! The registry is a rebuildable cache over the store: it records which
//! sessions have a pending wake-up and lets any worker disarm one by id.
//! Each registration carries a generation so that a timer task finishing
//! late never removes a newer registration for the same session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use worktrack_core::types::{DbId, Timestamp};

use crate::ports::ExpirationCanceller;

/// Handle given to the task that waits on a registration.
#[derive(Debug, Clone)]
pub struct Armed {
    pub generation: u64,
    pub token: CancellationToken,
}

struct Registration {
    generation: u64,
    deadline: Timestamp,
    token: CancellationToken,
}

pub struct TimerRegistry {
    entries: Mutex<HashMap<DbId, Registration>>,
    next_generation: AtomicU64,
    /// Parent of every registration token; cancelled on shutdown.
    root: CancellationToken,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            root: CancellationToken::new(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<DbId, Registration>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a timer for `session_id`, cancelling any previous one.
    pub fn arm(&self, session_id: DbId, deadline: Timestamp) -> Armed {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let previous = self.entries().insert(
            session_id,
            Registration {
                generation,
                deadline,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        Armed { generation, token }
    }

    /// Replace the registration only if `generation` still owns it.
    pub fn rearm_if_current(
        &self,
        session_id: DbId,
        generation: u64,
        deadline: Timestamp,
    ) -> Option<Armed> {
        let mut entries = self.entries();
        match entries.get(&session_id) {
            Some(entry) if entry.generation == generation => {}
            _ => return None,
        }
        let next = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        entries.insert(
            session_id,
            Registration {
                generation: next,
                deadline,
                token: token.clone(),
            },
        );
        Some(Armed {
            generation: next,
            token,
        })
    }

    /// Cancel and remove the registration. Returns whether one existed.
    pub fn disarm(&self, session_id: DbId) -> bool {
        match self.entries().remove(&session_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the registration after its timer fired, unless it was replaced.
    pub fn release(&self, session_id: DbId, generation: u64) -> bool {
        let mut entries = self.entries();
        match entries.get(&session_id) {
            Some(entry) if entry.generation == generation => {
                entries.remove(&session_id);
                true
            }
            _ => false,
        }
    }

    /// Deadline of the pending timer, if any.
    pub fn deadline(&self, session_id: DbId) -> Option<Timestamp> {
        self.entries().get(&session_id).map(|e| e.deadline)
    }

    pub fn is_armed(&self, session_id: DbId) -> bool {
        self.entries().contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many registrations were ever created.
    pub fn total_armed(&self) -> u64 {
        self.next_generation.load(Ordering::Relaxed) - 1
    }

    /// Cancel every pending timer. Returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        self.root.cancel();
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpirationCanceller for TimerRegistry {
    fn cancel(&self, session_id: DbId) {
        if self.disarm(session_id) {
            tracing::debug!(session_id, "Expiration timer cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    #[test]
    fn arming_twice_cancels_the_first_token() {
        let registry = TimerRegistry::new();
        let now = Utc::now();
        let first = registry.arm(1, now + Duration::minutes(60));
        let second = registry.arm(1, now + Duration::minutes(90));

        assert!(first.token.is_cancelled());
        assert!(!second.token.is_cancelled());
        assert_eq!(registry.deadline(1), Some(now + Duration::minutes(90)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_release_keeps_newer_registration() {
        let registry = TimerRegistry::new();
        let now = Utc::now();
        let old = registry.arm(1, now);
        let new = registry.arm(1, now + Duration::minutes(5));

        assert!(!registry.release(1, old.generation));
        assert!(registry.is_armed(1));
        assert!(registry.release(1, new.generation));
        assert!(registry.is_empty());
    }

    #[test]
    fn rearm_requires_current_generation() {
        let registry = TimerRegistry::new();
        let now = Utc::now();
        let armed = registry.arm(3, now);

        let rearmed = registry
            .rearm_if_current(3, armed.generation, now + Duration::minutes(1))
            .expect("current generation may rearm");
        assert!(registry
            .rearm_if_current(3, armed.generation, now + Duration::minutes(2))
            .is_none());
        assert_eq!(registry.deadline(3), Some(now + Duration::minutes(1)));
        assert!(!rearmed.token.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let registry = TimerRegistry::new();
        let armed = registry.arm(9, Utc::now());

        ExpirationCanceller::cancel(&registry, 9);
        ExpirationCanceller::cancel(&registry, 9);
        ExpirationCanceller::cancel(&registry, 404);

        assert!(armed.token.is_cancelled());
        assert!(!registry.is_armed(9));
    }

    #[test]
    fn cancel_all_cancels_every_token() {
        let registry = TimerRegistry::new();
        let a = registry.arm(1, Utc::now());
        let b = registry.arm(2, Utc::now());

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.token.is_cancelled());
        assert!(b.token.is_cancelled());
        assert!(registry.is_empty());
        assert_eq!(registry.total_armed(), 2);
    }
}
