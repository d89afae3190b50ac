use crate::store::StoreError;
use crate::types::DbId;

/// Errors surfaced by the session lifecycle coordinators.
///
/// Each variant maps to exactly one stable outcome at the presentation
/// layer (absence, conflict, bad input, retryable outage).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("No active session found for user {user_id}")]
    SessionNotFound { user_id: DbId },

    #[error("User {0} already has an active session")]
    UserAlreadyInSession(String),

    #[error("Session {0} is already completed")]
    SessionAlreadyCompleted(DbId),

    #[error("Invalid duration: must be positive")]
    InvalidDuration,

    #[error("Invalid extension: {minutes} minutes is outside {min}..={max}")]
    InvalidExtension { minutes: i64, min: i64, max: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Transient; the caller may retry the whole command.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Unique-constraint race that survived the coordinator's own retry.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { constraint } => CoreError::StorageConflict(constraint),
            StoreError::Unavailable(msg) => CoreError::StorageUnavailable(msg),
        }
    }
}

impl CoreError {
    /// Whether retrying the whole command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StorageUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn unique_violation_becomes_storage_conflict() {
        let err: CoreError = StoreError::UniqueViolation {
            constraint: "uq_users_name".into(),
        }
        .into();
        assert_matches!(err, CoreError::StorageConflict(c) if c == "uq_users_name");
    }

    #[test]
    fn only_storage_outages_are_retryable() {
        assert!(CoreError::StorageUnavailable("timeout".into()).is_retryable());
        assert!(!CoreError::UserAlreadyInSession("alice".into()).is_retryable());
        assert!(!CoreError::StorageConflict("uq".into()).is_retryable());
    }
}
