//! Serialized fan-out hub for session events.
//!
//! One background task owns the subscriber set. Subscribing, unsubscribing
//! and publishing are all requests queued to that task, so the set is never
//! mutated concurrently with a broadcast. Each subscriber gets a bounded
//! queue; a subscriber whose queue is full is evicted instead of slowing
//! delivery to everyone else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::SessionEvent;
use crate::publisher::EventPublisher;

/// Default per-subscriber queue capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Opaque subscriber handle id.
pub type SubscriberId = u64;

/// A serialized event, shared between all subscriber queues.
pub type Payload = Arc<str>;

struct Registration {
    id: SubscriberId,
    queue: mpsc::Sender<Payload>,
    /// Answered once the subscriber is in the set.
    ack: oneshot::Sender<()>,
}

/// Handle to the hub loop. Share it as `Arc<EventHub>`.
pub struct EventHub {
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<SubscriberId>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    next_id: AtomicU64,
    subscriber_capacity: usize,
    subscriber_count: Arc<AtomicUsize>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventHub {
    /// Spawn the hub loop on the current Tokio runtime.
    ///
    /// `subscriber_capacity` bounds every subscriber's outbound queue and
    /// is clamped to at least 1.
    pub fn start(subscriber_capacity: usize) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscriber_count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let hub_loop = HubLoop {
            subscribers: HashMap::new(),
            subscriber_count: Arc::clone(&subscriber_count),
        };
        let task = tokio::spawn(hub_loop.run(
            register_rx,
            unregister_rx,
            events_rx,
            cancel.clone(),
        ));

        tracing::info!(subscriber_capacity, "Event hub started");

        Arc::new(Self {
            register_tx,
            unregister_tx,
            events_tx,
            next_id: AtomicU64::new(1),
            subscriber_capacity: subscriber_capacity.max(1),
            subscriber_count,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Register a new subscriber with a bounded outbound queue.
    ///
    /// Resolves once the hub loop holds the subscriber, so every event
    /// published after this returns is delivered to it. Dropping the
    /// [`Subscription`] unsubscribes it.
    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = mpsc::channel(self.subscriber_capacity);
        let (ack, acked) = oneshot::channel();

        // If the loop has stopped, the queue sender is dropped with the
        // registration and the subscription reads as closed straight away.
        if self.register_tx.send(Registration { id, queue, ack }).is_err() || acked.await.is_err() {
            tracing::debug!(subscriber_id = id, "Subscribe after hub shutdown");
        }
        Subscription {
            id,
            receiver: rx,
            unregister_tx: self.unregister_tx.clone(),
        }
    }

    /// Remove a subscriber and close its queue. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.unregister_tx.send(id);
    }

    /// Number of subscribers currently held by the loop.
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Acquire)
    }

    /// Stop the loop and close every subscriber queue.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Event hub task ended abnormally");
            }
        }
        tracing::info!("Event hub shut down");
    }
}

impl EventPublisher for EventHub {
    /// Queue `event` for broadcast. Never blocks.
    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.events_tx.send(event) {
            tracing::debug!(kind = e.0.kind(), "Event dropped, hub is stopped");
        }
    }
}

/// A subscriber's receiving end.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Payload>,
    unregister_tx: mpsc::UnboundedSender<SubscriberId>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next serialized event, or `None` once the hub has evicted this
    /// subscriber or shut down.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.unregister_tx.send(self.id);
    }
}

/// State owned exclusively by the hub task.
struct HubLoop {
    subscribers: HashMap<SubscriberId, mpsc::Sender<Payload>>,
    subscriber_count: Arc<AtomicUsize>,
}

impl HubLoop {
    async fn run(
        mut self,
        mut register_rx: mpsc::UnboundedReceiver<Registration>,
        mut unregister_rx: mpsc::UnboundedReceiver<SubscriberId>,
        mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(Registration { id, queue, ack }) = register_rx.recv() => {
                    self.subscribers.insert(id, queue);
                    self.sync_count();
                    let _ = ack.send(());
                    tracing::debug!(subscriber_id = id, total = self.subscribers.len(), "Subscriber registered");
                }
                Some(id) = unregister_rx.recv() => {
                    if self.subscribers.remove(&id).is_some() {
                        self.sync_count();
                        tracing::debug!(subscriber_id = id, total = self.subscribers.len(), "Subscriber unregistered");
                    }
                }
                Some(event) = events_rx.recv() => self.broadcast(&event),
                else => break,
            }
        }

        let count = self.subscribers.len();
        self.subscribers.clear();
        self.sync_count();
        tracing::info!(count, "Closed all subscriber queues");
    }

    fn broadcast(&mut self, event: &SessionEvent) {
        let payload: Payload = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, kind = event.kind(), "Failed to serialize event");
                return;
            }
        };

        let before = self.subscribers.len();
        self.subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&payload)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscriber_id = *id, "Subscriber queue full, evicting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(subscriber_id = *id, "Subscriber gone, removing");
                false
            }
        });

        if self.subscribers.len() != before {
            self.sync_count();
        }
        tracing::trace!(
            kind = event.kind(),
            session_id = event.session_id(),
            delivered = self.subscribers.len(),
            "Event broadcast"
        );
    }

    fn sync_count(&self) {
        self.subscriber_count
            .store(self.subscribers.len(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn ended(id: i64) -> SessionEvent {
        SessionEvent::Ended {
            id,
            user_id: 1,
            actual_end: Utc::now(),
        }
    }

    fn session_id_of(payload: &str) -> i64 {
        let json: serde_json::Value = serde_json::from_str(payload).unwrap();
        json["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let hub = EventHub::start(DEFAULT_SUBSCRIBER_CAPACITY);
        let mut a = hub.subscribe().await;
        let mut b = hub.subscribe().await;

        hub.publish(ended(7));

        let from_a = a.recv().await.expect("a should receive");
        let from_b = b.recv().await.expect("b should receive");
        assert_eq!(session_id_of(&from_a), 7);
        assert_eq!(session_id_of(&from_b), 7);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let hub = EventHub::start(DEFAULT_SUBSCRIBER_CAPACITY);
        let mut sub = hub.subscribe().await;

        for id in 1..=20 {
            hub.publish(ended(id));
        }

        for expected in 1..=20 {
            let payload = sub.recv().await.unwrap();
            assert_eq!(session_id_of(&payload), expected);
        }
    }

    #[tokio::test]
    async fn full_subscriber_is_evicted_without_blocking_others() {
        let hub = EventHub::start(1);
        let mut stalled = hub.subscribe().await;
        let mut healthy = hub.subscribe().await;

        hub.publish(ended(1));
        assert_eq!(session_id_of(&healthy.recv().await.unwrap()), 1);
        hub.publish(ended(2));
        assert_eq!(session_id_of(&healthy.recv().await.unwrap()), 2);
        hub.publish(ended(3));
        assert_eq!(session_id_of(&healthy.recv().await.unwrap()), 3);

        // The stalled queue held the first event, then overflowed.
        assert_eq!(session_id_of(&stalled.recv().await.unwrap()), 1);
        assert!(stalled.recv().await.is_none(), "evicted queue must be closed");
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_it() {
        let hub = EventHub::start(DEFAULT_SUBSCRIBER_CAPACITY);
        let dropped = hub.subscribe().await;
        let mut kept = hub.subscribe().await;
        drop(dropped);

        hub.publish(ended(1));
        kept.recv().await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while hub.subscriber_count() != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("dropped subscription is unregistered");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscriber_sees_events_published_right_after_subscribing() {
        let hub = EventHub::start(1_024);
        let mut tasks = Vec::new();
        for id in 0..64 {
            let hub = Arc::clone(&hub);
            tasks.push(tokio::spawn(async move {
                let mut sub = hub.subscribe().await;
                hub.publish(ended(id));
                loop {
                    let payload = sub.recv().await.expect("own event delivered");
                    if session_id_of(&payload) == id {
                        break;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn subscribe_after_shutdown_is_closed() {
        let hub = EventHub::start(DEFAULT_SUBSCRIBER_CAPACITY);
        hub.shutdown().await;

        let mut sub = hub.subscribe().await;
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_is_noop() {
        let hub = EventHub::start(DEFAULT_SUBSCRIBER_CAPACITY);
        let mut sub = hub.subscribe().await;
        hub.unsubscribe(9_999);

        hub.publish(ended(4));
        assert_eq!(session_id_of(&sub.recv().await.unwrap()), 4);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_subscriber_queues() {
        let hub = EventHub::start(DEFAULT_SUBSCRIBER_CAPACITY);
        let mut sub = hub.subscribe().await;
        hub.publish(ended(1));
        sub.recv().await.unwrap();

        hub.shutdown().await;

        assert!(sub.recv().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);

        // Publishing after shutdown must not panic.
        hub.publish(ended(2));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let hub = EventHub::start(DEFAULT_SUBSCRIBER_CAPACITY);
            hub.publish(ended(1));
            hub.shutdown().await;
        });
    }
}
