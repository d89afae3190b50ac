//! Read-side views over the session store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use serde::Serialize;
use worktrack_core::error::CoreError;
use worktrack_core::session::{Session, SessionSummary};
use worktrack_core::store::{SessionRange, SessionStore};
use worktrack_core::tier::Tier;
use worktrack_core::types::{DbId, Timestamp};
use worktrack_core::user::normalize_user_name;

use crate::deadline::bounded;

/// Work statistics for a user with an active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub user_id: DbId,
    pub user_name: String,
    pub tier: Tier,
    pub session_id: DbId,
    pub work_name: String,
    pub planned_end: Timestamp,
    /// Whole minutes until the planned end, never negative.
    pub remaining_minutes: i64,
    /// Minutes worked in sessions started today (UTC).
    pub today_total_minutes: i64,
    pub lifetime_total_minutes: i64,
}

pub struct QueryService {
    store: Arc<dyn SessionStore>,
    storage_timeout: Duration,
}

impl QueryService {
    pub fn new(store: Arc<dyn SessionStore>, storage_timeout: Duration) -> Self {
        Self {
            store,
            storage_timeout,
        }
    }

    pub async fn active_sessions(&self) -> Result<Vec<SessionSummary>, CoreError> {
        Ok(bounded(
            self.storage_timeout,
            "list_all_active_sessions",
            self.store.list_all_active_sessions(),
        )
        .await?)
    }

    /// Fails with [`CoreError::SessionNotFound`] unless the user has an active session.
    pub async fn user_info(&self, user_name: &str) -> Result<UserInfo, CoreError> {
        let name = normalize_user_name(user_name)?;
        let user = bounded(
            self.storage_timeout,
            "find_user_by_name",
            self.store.find_user_by_name(&name),
        )
        .await?
        .ok_or(CoreError::UserNotFound(name))?;

        let active = bounded(
            self.storage_timeout,
            "find_active_session_by_user",
            self.store.find_active_session_by_user(user.id),
        )
        .await?
        .ok_or(CoreError::SessionNotFound { user_id: user.id })?;

        let now = Utc::now();
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let today = bounded(
            self.storage_timeout,
            "list_sessions_for_user",
            self.store.list_sessions_for_user(
                user.id,
                SessionRange::Between {
                    from: day_start,
                    to: day_start + chrono::Duration::days(1),
                },
            ),
        )
        .await?;
        let all = bounded(
            self.storage_timeout,
            "list_sessions_for_user",
            self.store.list_sessions_for_user(user.id, SessionRange::All),
        )
        .await?;

        Ok(UserInfo {
            user_id: user.id,
            user_name: user.name,
            tier: user.tier,
            session_id: active.id,
            remaining_minutes: (active.planned_end - now).num_minutes().max(0),
            planned_end: active.planned_end,
            work_name: active.work_name,
            today_total_minutes: total_minutes(&today, now),
            lifetime_total_minutes: total_minutes(&all, now),
        })
    }
}

/// Sum of whole minutes per session; active sessions count up to `now`.
fn total_minutes(sessions: &[Session], now: Timestamp) -> i64 {
    sessions.iter().map(|s| s.worked(now).num_minutes()).sum()
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn session(start: Timestamp, end: Option<Timestamp>) -> Session {
        Session {
            id: 1,
            user_id: 1,
            work_name: String::new(),
            start_time: start,
            planned_end: start + ChronoDuration::minutes(60),
            actual_end: end,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn totals_truncate_each_session() {
        let now = Utc::now();
        let start = now - ChronoDuration::minutes(100);
        let sessions = vec![
            session(start, Some(start + ChronoDuration::seconds(90))),
            session(start, Some(start + ChronoDuration::seconds(150))),
            session(now - ChronoDuration::minutes(10), None),
        ];
        assert_eq!(total_minutes(&sessions, now), 1 + 2 + 10);
    }
}
