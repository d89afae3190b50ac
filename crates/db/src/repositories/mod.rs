//! Query repositories, one per table.
//!
//! Every method is generic over [`sqlx::PgExecutor`] so the same query runs
//! against the pool (autocommit) or inside an open transaction.

pub mod session_repo;
pub mod user_repo;

pub use session_repo::SessionRepo;
pub use user_repo::UserRepo;
