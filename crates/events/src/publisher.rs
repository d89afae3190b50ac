//! Capability through which coordinators emit lifecycle events.

use crate::event::SessionEvent;

/// Sink for lifecycle events.
///
/// Implementations must not block the caller: publishing happens after a
/// storage commit, on request and timer workers alike.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: SessionEvent);
}

/// Discards every event. Useful when no real-time transport is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: SessionEvent) {}
}
