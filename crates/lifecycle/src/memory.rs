//! In-memory store and publisher for tests.
//!
//! [`MemoryStore`] mimics the PostgreSQL adapter closely enough for the
//! coordinator tests: transactions buffer their writes until commit, user
//! rows are locked per name with Tokio mutexes, the one-active-session
//! index is checked on insert and on commit, and conflicting first-joins
//! block on each other exactly like `INSERT ... ON CONFLICT DO NOTHING`.
//! Outages, latency, late acknowledgements and insert races can be injected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use worktrack_core::session::{NewSession, Session, SessionSummary};
use worktrack_core::store::{
    SessionRange, SessionStore, StoreError, StoreResult, StoreTx, ACTIVE_SESSION_INDEX,
    USERS_NAME_CONSTRAINT,
};
use worktrack_core::tier::Tier;
use worktrack_core::types::{DbId, Timestamp};
use worktrack_core::user::{NewUser, User};
use worktrack_events::{EventPublisher, SessionEvent};

#[derive(Default)]
struct State {
    last_user_id: DbId,
    last_session_id: DbId,
    users: BTreeMap<DbId, User>,
    sessions: BTreeMap<DbId, Session>,
    /// Names whose next insert loses to a simulated concurrent winner.
    conflicts: HashSet<String>,
}

impl State {
    fn user_by_name(&self, name: &str) -> Option<&User> {
        self.users.values().find(|u| u.name == name)
    }

    fn active_for(&self, user_id: DbId) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.user_id == user_id && s.is_active())
    }

    fn insert_user(&mut self, name: &str, tier: Tier) -> User {
        self.last_user_id += 1;
        let now = Utc::now();
        let user = User {
            id: self.last_user_id,
            name: name.to_string(),
            tier,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        user
    }

    fn next_session_id(&mut self) -> DbId {
        self.last_session_id += 1;
        self.last_session_id
    }
}

struct Inner {
    state: Mutex<State>,
    row_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    ack_delay_ms: AtomicU64,
    completions_applied: AtomicUsize,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Simulated round trip: optional latency, then the outage check.
    async fn io(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    /// Delay between a write becoming visible and its caller hearing about it.
    async fn ack(&self) {
        let delay = self.ack_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn complete_where(&self, id: DbId, actual_end: Timestamp, guard: impl Fn(&Session) -> bool) -> u64 {
        let mut state = self.state();
        match state.sessions.get_mut(&id) {
            Some(s) if s.is_active() && guard(s) => {
                s.actual_end = Some(actual_end);
                s.updated_at = actual_end;
                self.completions_applied.fetch_add(1, Ordering::Relaxed);
                1
            }
            _ => 0,
        }
    }
}

/// Shared in-memory store. Clones see the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                row_locks: Mutex::new(HashMap::new()),
                unavailable: AtomicBool::new(false),
                latency_ms: AtomicU64::new(0),
                ack_delay_ms: AtomicU64::new(0),
                completions_applied: AtomicUsize::new(0),
            }),
        }
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Apply writes and commits immediately but hold back their
    /// acknowledgement by `delay`, like a reply lost in a slow network.
    pub fn set_ack_delay(&self, delay: Duration) {
        self.inner
            .ack_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// The next insert of `name` finds that a concurrent join created it first.
    pub fn inject_user_conflict(&self, name: &str) {
        self.inner.state().conflicts.insert(name.to_string());
    }

    pub fn insert_user(&self, name: &str, tier: Tier) -> User {
        let mut state = self.inner.state();
        match state.user_by_name(name) {
            Some(user) => user.clone(),
            None => state.insert_user(name, tier),
        }
    }

    /// Seed an active session directly, bypassing the coordinators.
    pub fn insert_session(
        &self,
        user_name: &str,
        work_name: &str,
        start_time: Timestamp,
        planned_end: Timestamp,
    ) -> Session {
        let user = self.insert_user(user_name, Tier::default());
        let mut state = self.inner.state();
        let session = Session {
            id: state.next_session_id(),
            user_id: user.id,
            work_name: work_name.to_string(),
            start_time,
            planned_end,
            actual_end: None,
            created_at: start_time,
            updated_at: start_time,
        };
        state.sessions.insert(session.id, session.clone());
        session
    }

    pub fn user(&self, name: &str) -> Option<User> {
        self.inner.state().user_by_name(name).cloned()
    }

    pub fn session(&self, id: DbId) -> Option<Session> {
        self.inner.state().sessions.get(&id).cloned()
    }

    pub fn sessions_for(&self, user_id: DbId) -> Vec<Session> {
        self.inner
            .state()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn active_session_count(&self, user_id: DbId) -> usize {
        self.sessions_for(user_id)
            .iter()
            .filter(|s| s.is_active())
            .count()
    }

    /// Conditional completions that actually changed a row.
    pub fn completions_applied(&self) -> usize {
        self.inner.completions_applied.load(Ordering::Relaxed)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        self.inner.io().await?;
        Ok(Box::new(MemoryTx {
            inner: Arc::clone(&self.inner),
            locks: HashMap::new(),
            pending_users: Vec::new(),
            pending_sessions: Vec::new(),
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.io().await
    }

    async fn find_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        self.inner.io().await?;
        Ok(self.inner.state().user_by_name(name).cloned())
    }

    async fn find_session_by_id(&self, id: DbId) -> StoreResult<Option<Session>> {
        self.inner.io().await?;
        Ok(self.inner.state().sessions.get(&id).cloned())
    }

    async fn find_active_session_by_user(&self, user_id: DbId) -> StoreResult<Option<Session>> {
        self.inner.io().await?;
        Ok(self.inner.state().active_for(user_id).cloned())
    }

    async fn update_session_planned_end(
        &self,
        id: DbId,
        previous: Timestamp,
        planned_end: Timestamp,
    ) -> StoreResult<bool> {
        self.inner.io().await?;
        let applied = {
            let mut state = self.inner.state();
            match state.sessions.get_mut(&id) {
                Some(s) if s.is_active() && s.planned_end == previous => {
                    s.planned_end = planned_end;
                    s.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        };
        self.inner.ack().await;
        Ok(applied)
    }

    async fn update_session_work_name(&self, id: DbId, work_name: &str) -> StoreResult<bool> {
        self.inner.io().await?;
        let applied = {
            let mut state = self.inner.state();
            match state.sessions.get_mut(&id) {
                Some(s) if s.is_active() => {
                    s.work_name = work_name.to_string();
                    s.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        };
        self.inner.ack().await;
        Ok(applied)
    }

    async fn complete_session_conditional(
        &self,
        id: DbId,
        actual_end: Timestamp,
    ) -> StoreResult<u64> {
        self.inner.io().await?;
        let rows = self.inner.complete_where(id, actual_end, |_| true);
        self.inner.ack().await;
        Ok(rows)
    }

    async fn expire_session_conditional(
        &self,
        id: DbId,
        planned_end: Timestamp,
        actual_end: Timestamp,
    ) -> StoreResult<u64> {
        self.inner.io().await?;
        let rows = self
            .inner
            .complete_where(id, actual_end, |s| s.planned_end == planned_end);
        self.inner.ack().await;
        Ok(rows)
    }

    async fn list_all_active_sessions(&self) -> StoreResult<Vec<SessionSummary>> {
        self.inner.io().await?;
        let state = self.inner.state();
        let mut active: Vec<SessionSummary> = state
            .sessions
            .values()
            .filter(|s| s.is_active())
            .filter_map(|s| {
                let user = state.users.get(&s.user_id)?;
                Some(SessionSummary {
                    session_id: s.id,
                    user_id: user.id,
                    user_name: user.name.clone(),
                    work_name: s.work_name.clone(),
                    tier: user.tier,
                    start_time: s.start_time,
                    planned_end: s.planned_end,
                })
            })
            .collect();
        active.sort_by_key(|s| (s.start_time, s.session_id));
        Ok(active)
    }

    async fn list_sessions_for_user(
        &self,
        user_id: DbId,
        range: SessionRange,
    ) -> StoreResult<Vec<Session>> {
        self.inner.io().await?;
        let state = self.inner.state();
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .filter(|s| match range {
                SessionRange::All => true,
                SessionRange::Between { from, to } => s.start_time >= from && s.start_time < to,
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.start_time, s.id));
        Ok(sessions)
    }
}

/// A buffered transaction holding per-name row locks until it ends.
struct MemoryTx {
    inner: Arc<Inner>,
    locks: HashMap<String, OwnedMutexGuard<()>>,
    pending_users: Vec<User>,
    pending_sessions: Vec<Session>,
}

impl MemoryTx {
    async fn lock(&mut self, name: &str) {
        if self.locks.contains_key(name) {
            return;
        }
        let guard = self.inner.row_lock(name).lock_owned().await;
        self.locks.insert(name.to_string(), guard);
    }

    fn visible_user(&self, name: &str) -> Option<User> {
        self.pending_users
            .iter()
            .find(|u| u.name == name)
            .cloned()
            .or_else(|| self.inner.state().user_by_name(name).cloned())
    }

    fn visible_active(&self, user_id: DbId) -> Option<Session> {
        self.pending_sessions
            .iter()
            .find(|s| s.user_id == user_id && s.is_active())
            .cloned()
            .or_else(|| self.inner.state().active_for(user_id).cloned())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_user_by_name_for_update(&mut self, name: &str) -> StoreResult<Option<User>> {
        self.inner.io().await?;
        // Like FOR UPDATE, only rows that exist are locked.
        if self.visible_user(name).is_none() {
            return Ok(None);
        }
        self.lock(name).await;
        Ok(self.visible_user(name))
    }

    async fn create_user(&mut self, user: &NewUser) -> StoreResult<User> {
        self.inner.io().await?;
        // Waits for a concurrent uncommitted insert of the same name.
        self.lock(&user.name).await;

        let conflict = StoreError::UniqueViolation {
            constraint: USERS_NAME_CONSTRAINT.to_string(),
        };
        {
            let mut state = self.inner.state();
            if state.conflicts.remove(&user.name) {
                state.insert_user(&user.name, Tier::default());
                return Err(conflict);
            }
            if state.user_by_name(&user.name).is_some() {
                return Err(conflict);
            }
        }
        if self.pending_users.iter().any(|u| u.name == user.name) {
            return Err(conflict);
        }

        let mut state = self.inner.state();
        state.last_user_id += 1;
        let now = Utc::now();
        let created = User {
            id: state.last_user_id,
            name: user.name.clone(),
            tier: user.tier,
            created_at: now,
            updated_at: now,
        };
        drop(state);
        self.pending_users.push(created.clone());
        Ok(created)
    }

    async fn find_active_session_by_user_for_update(
        &mut self,
        user_id: DbId,
    ) -> StoreResult<Option<Session>> {
        self.inner.io().await?;
        Ok(self.visible_active(user_id))
    }

    async fn create_session(&mut self, session: &NewSession) -> StoreResult<Session> {
        self.inner.io().await?;
        if self.visible_active(session.user_id).is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: ACTIVE_SESSION_INDEX.to_string(),
            });
        }
        let id = self.inner.state().next_session_id();
        let created = Session {
            id,
            user_id: session.user_id,
            work_name: session.work_name.clone(),
            start_time: session.start_time,
            planned_end: session.planned_end,
            actual_end: None,
            created_at: session.start_time,
            updated_at: session.start_time,
        };
        self.pending_sessions.push(created.clone());
        Ok(created)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            inner,
            locks,
            pending_users,
            pending_sessions,
        } = *self;
        inner.io().await?;
        {
            let mut state = inner.state();

            for user in &pending_users {
                if state.user_by_name(&user.name).is_some() {
                    return Err(StoreError::UniqueViolation {
                        constraint: USERS_NAME_CONSTRAINT.to_string(),
                    });
                }
            }
            for session in &pending_sessions {
                if state.active_for(session.user_id).is_some() {
                    return Err(StoreError::UniqueViolation {
                        constraint: ACTIVE_SESSION_INDEX.to_string(),
                    });
                }
            }

            for user in pending_users {
                state.users.insert(user.id, user);
            }
            for session in pending_sessions {
                state.sessions.insert(session.id, session);
            }
        }
        // Row locks are released only once the writes are visible.
        drop(locks);
        inner.ack().await;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

/// Publisher that keeps every event for later inspection.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }

    /// `session_end` events published for `session_id`.
    pub fn ended_count(&self, session_id: DbId) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Ended { id, .. } if *id == session_id))
            .count()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
