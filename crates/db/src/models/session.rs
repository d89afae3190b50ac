//! Session row models.

use sqlx::FromRow;
use worktrack_core::session::{Session, SessionSummary};
use worktrack_core::tier::Tier;
use worktrack_core::types::{DbId, Timestamp};

/// A row from the `sessions` table.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: DbId,
    pub user_id: DbId,
    pub work_name: String,
    pub start_time: Timestamp,
    pub planned_end: Timestamp,
    pub actual_end: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            work_name: row.work_name,
            start_time: row.start_time,
            planned_end: row.planned_end,
            actual_end: row.actual_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// An active session joined with its owner.
#[derive(Debug, Clone, FromRow)]
pub struct ActiveSessionRow {
    pub session_id: DbId,
    pub user_id: DbId,
    pub user_name: String,
    pub tier: i16,
    pub work_name: String,
    pub start_time: Timestamp,
    pub planned_end: Timestamp,
}

impl From<ActiveSessionRow> for SessionSummary {
    fn from(row: ActiveSessionRow) -> Self {
        SessionSummary {
            session_id: row.session_id,
            user_id: row.user_id,
            user_name: row.user_name,
            work_name: row.work_name,
            tier: Tier::try_from(row.tier).unwrap_or_default(),
            start_time: row.start_time,
            planned_end: row.planned_end,
        }
    }
}
