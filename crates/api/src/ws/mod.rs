//! WebSocket endpoint that streams session lifecycle events.
//!
//! Each connection is one [`worktrack_events::Subscription`] on the event
//! hub. Events are forwarded as JSON text frames, a Ping is sent every
//! [`HEARTBEAT_INTERVAL_SECS`] seconds, and a Close frame follows when the
//! hub evicts the subscriber or shuts down.

mod handler;

pub use handler::{ws_handler, HEARTBEAT_INTERVAL_SECS};
