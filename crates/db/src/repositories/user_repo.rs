//! Repository for the `users` table.

use sqlx::PgExecutor;
use worktrack_core::user::NewUser;

use crate::models::user::UserRow;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, name, tier, created_at, updated_at";

/// Provides lookups and inserts for users.
pub struct UserRepo;

impl UserRepo {
    /// Insert a user unless the name is already taken.
    ///
    /// Returns `None` when a row with the same name exists (or is being
    /// inserted by a concurrent transaction that then commits). Uses
    /// `ON CONFLICT DO NOTHING` so the surrounding transaction stays usable.
    pub async fn insert_if_absent<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &NewUser,
    ) -> Result<Option<UserRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (name, tier)
             VALUES ($1, $2)
             ON CONFLICT (name) DO NOTHING
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserRow>(&query)
            .bind(&input.name)
            .bind(input.tier.as_i16())
            .fetch_optional(executor)
            .await
    }

    /// Find a user by name (case-sensitive).
    pub async fn find_by_name<'e, E: PgExecutor<'e>>(
        executor: E,
        name: &str,
    ) -> Result<Option<UserRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE name = $1");
        sqlx::query_as::<_, UserRow>(&query)
            .bind(name)
            .fetch_optional(executor)
            .await
    }

    /// Find a user by name and hold a row lock until the transaction ends.
    pub async fn find_by_name_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        name: &str,
    ) -> Result<Option<UserRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE name = $1 FOR UPDATE");
        sqlx::query_as::<_, UserRow>(&query)
            .bind(name)
            .fetch_optional(executor)
            .await
    }
}
