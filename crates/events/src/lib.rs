//! Session lifecycle events and the real-time fan-out hub.
//!
//! - [`SessionEvent`]: the wire payload delivered to subscribers.
//! - [`EventPublisher`]: the capability coordinators use to emit events.
//! - [`EventHub`]: a single serialized loop that owns the subscriber set and
//!   delivers every published event to each bounded subscriber queue,
//!   evicting subscribers that fall behind.

pub mod event;
pub mod hub;
pub mod publisher;

pub use event::SessionEvent;
pub use hub::{EventHub, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use publisher::{EventPublisher, NoopPublisher};
