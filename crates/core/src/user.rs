//! User entity.

use serde::Serialize;

use crate::error::CoreError;
use crate::tier::Tier;
use crate::types::{DbId, Timestamp};

/// A persisted user. The tier is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: DbId,
    pub name: String,
    pub tier: Tier,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A user that has passed validation but has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub tier: Tier,
}

impl NewUser {
    /// Trim the name and reject it if nothing is left.
    pub fn new(name: &str, tier: Tier) -> Result<Self, CoreError> {
        Ok(Self {
            name: normalize_user_name(name)?,
            tier,
        })
    }
}

/// Canonical form of a user name as stored in the `users.name` column.
pub fn normalize_user_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("user name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}
