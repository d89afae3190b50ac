//! Domain model for work-session tracking.
//!
//! Holds the pure, I/O-free parts of the system: the [`user::User`] and
//! [`session::Session`] entities with their state transitions, the
//! [`error::CoreError`] taxonomy shared by every coordinator, and the
//! [`store::SessionStore`] port implemented by the persistence layer.

pub mod error;
pub mod session;
pub mod store;
pub mod tier;
pub mod types;
pub mod user;
