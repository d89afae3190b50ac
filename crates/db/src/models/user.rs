//! User row model.

use sqlx::FromRow;
use worktrack_core::tier::Tier;
use worktrack_core::types::{DbId, Timestamp};
use worktrack_core::user::User;

/// A row from the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: DbId,
    pub name: String,
    pub tier: i16,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        // The CHECK constraint keeps tiers in range; fall back rather than fail a read.
        let tier = Tier::try_from(row.tier).unwrap_or_else(|_| {
            tracing::warn!(user_id = row.id, tier = row.tier, "Out-of-range tier, using Tier1");
            Tier::Tier1
        });
        User {
            id: row.id,
            name: row.name,
            tier,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
