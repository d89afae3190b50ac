//! Repository for the `sessions` table.

use sqlx::PgExecutor;
use worktrack_core::session::NewSession;
use worktrack_core::types::{DbId, Timestamp};

use crate::models::session::{ActiveSessionRow, SessionRow};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, user_id, work_name, start_time, planned_end, actual_end, \
                        created_at, updated_at";

/// Provides CRUD and conditional updates for work sessions.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new active session, returning the created row.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &NewSession,
    ) -> Result<SessionRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO sessions (user_id, work_name, start_time, planned_end, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $3, $3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(input.user_id)
            .bind(&input.work_name)
            .bind(input.start_time)
            .bind(input.planned_end)
            .fetch_one(executor)
            .await
    }

    /// Find a session by ID, active or not.
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<SessionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sessions WHERE id = $1");
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find the active session (`actual_end IS NULL`) of a user.
    pub async fn find_active_by_user<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: DbId,
    ) -> Result<Option<SessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sessions
             WHERE user_id = $1 AND actual_end IS NULL"
        );
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(user_id)
            .fetch_optional(executor)
            .await
    }

    /// Same as [`find_active_by_user`](Self::find_active_by_user) but locks the row.
    pub async fn find_active_by_user_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: DbId,
    ) -> Result<Option<SessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sessions
             WHERE user_id = $1 AND actual_end IS NULL
             FOR UPDATE"
        );
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(user_id)
            .fetch_optional(executor)
            .await
    }

    /// Compare-and-set the planned end of an active session.
    ///
    /// Returns `true` only if the session was still active and its planned
    /// end was still `previous` at write time.
    pub async fn update_planned_end<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        previous: Timestamp,
        planned_end: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET planned_end = $3, updated_at = NOW()
             WHERE id = $1 AND planned_end = $2 AND actual_end IS NULL",
        )
        .bind(id)
        .bind(previous)
        .bind(planned_end)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the work label of an active session. Returns `true` if updated.
    pub async fn update_work_name<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        work_name: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET work_name = $2, updated_at = NOW()
             WHERE id = $1 AND actual_end IS NULL",
        )
        .bind(id)
        .bind(work_name)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set `actual_end` if and only if the session is still active.
    ///
    /// Returns the number of rows affected; `0` means another caller
    /// completed the session first.
    pub async fn complete_if_active<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        actual_end: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET actual_end = $2, updated_at = $2
             WHERE id = $1 AND actual_end IS NULL",
        )
        .bind(id)
        .bind(actual_end)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Like [`complete_if_active`](Self::complete_if_active), but also
    /// requires the planned end to still be `planned_end`.
    pub async fn complete_if_due<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        planned_end: Timestamp,
        actual_end: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET actual_end = $3, updated_at = $3
             WHERE id = $1 AND planned_end = $2 AND actual_end IS NULL",
        )
        .bind(id)
        .bind(planned_end)
        .bind(actual_end)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// List every active session joined with its owner, oldest first.
    pub async fn list_active<'e, E: PgExecutor<'e>>(
        executor: E,
    ) -> Result<Vec<ActiveSessionRow>, sqlx::Error> {
        sqlx::query_as::<_, ActiveSessionRow>(
            "SELECT s.id AS session_id, s.user_id, u.name AS user_name, u.tier,
                    s.work_name, s.start_time, s.planned_end
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.actual_end IS NULL
             ORDER BY s.start_time ASC",
        )
        .fetch_all(executor)
        .await
    }

    /// List all sessions of a user, most recent first.
    pub async fn list_by_user<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: DbId,
    ) -> Result<Vec<SessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sessions
             WHERE user_id = $1
             ORDER BY start_time DESC"
        );
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(user_id)
            .fetch_all(executor)
            .await
    }

    /// List a user's sessions that started in `[from, to)`.
    pub async fn list_by_user_between<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: DbId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<SessionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sessions
             WHERE user_id = $1 AND start_time >= $2 AND start_time < $3
             ORDER BY start_time DESC"
        );
        sqlx::query_as::<_, SessionRow>(&query)
            .bind(user_id)
            .bind(from)
            .bind(to)
            .fetch_all(executor)
            .await
    }
}
