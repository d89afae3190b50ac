//! Session lifecycle coordination.
//!
//! The coordinators in this crate are the only writers of session state:
//!
//! - [`join::JoinCoordinator`] creates sessions and enforces one active
//!   session per user.
//! - [`completion::CompletionCoordinator`] is the single path that ends a
//!   session, shared by manual `out` and automatic expiration.
//! - [`commands::CommandCoordinator`] handles `out`, extension and label
//!   changes.
//! - [`expiration::ExpirationManager`] keeps one timer per active session
//!   and rebuilds them from the store on startup.
//!
//! [`service::SessionService`] wires them together for the presentation layer.

pub mod commands;
pub mod completion;
mod deadline;
pub mod expiration;
pub mod join;
pub mod ports;
pub mod queries;
pub mod service;
pub mod timers;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use service::{ServiceSettings, SessionService};
