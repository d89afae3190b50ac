//! Wire payloads for session lifecycle events.

use serde::{Deserialize, Serialize};
use worktrack_core::session::Session;
use worktrack_core::tier::Tier;
use worktrack_core::types::{DbId, Timestamp};
use worktrack_core::user::User;

/// A lifecycle transition, serialized as JSON with a `type` tag.
///
/// ```json
/// {"type":"session_end","id":12,"user_id":3,"actual_end":"2025-10-09T15:30:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "session_start")]
    Started {
        id: DbId,
        user_id: DbId,
        user_name: String,
        work_name: String,
        tier: Tier,
        start_time: Timestamp,
        planned_end: Timestamp,
    },
    #[serde(rename = "session_end")]
    Ended {
        id: DbId,
        user_id: DbId,
        actual_end: Timestamp,
    },
    #[serde(rename = "session_extend")]
    Extended {
        id: DbId,
        user_id: DbId,
        new_planned_end: Timestamp,
    },
    #[serde(rename = "work_name_change")]
    LabelChanged {
        id: DbId,
        user_id: DbId,
        work_name: String,
    },
}

impl SessionEvent {
    pub fn started(user: &User, session: &Session) -> Self {
        SessionEvent::Started {
            id: session.id,
            user_id: user.id,
            user_name: user.name.clone(),
            work_name: session.work_name.clone(),
            tier: user.tier,
            start_time: session.start_time,
            planned_end: session.planned_end,
        }
    }

    /// Session the event refers to.
    pub fn session_id(&self) -> DbId {
        match self {
            SessionEvent::Started { id, .. }
            | SessionEvent::Ended { id, .. }
            | SessionEvent::Extended { id, .. }
            | SessionEvent::LabelChanged { id, .. } => *id,
        }
    }

    /// Wire name of the event kind, as found in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Started { .. } => "session_start",
            SessionEvent::Ended { .. } => "session_end",
            SessionEvent::Extended { .. } => "session_extend",
            SessionEvent::LabelChanged { .. } => "work_name_change",
        }
    }
}
