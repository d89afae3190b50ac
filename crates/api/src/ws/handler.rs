use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, StreamExt};
use worktrack_events::{EventHub, Subscription};

use crate::state::AppState;

/// Interval between heartbeat pings.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Subscribes to the hub, spawns a sender task that forwards events and
/// heartbeats, and reads inbound frames until the client goes away.
async fn handle_socket(socket: WebSocket, hub: Arc<EventHub>) {
    let conn_id = uuid::Uuid::new_v4();
    let subscription = hub.subscribe().await;
    let subscriber_id = subscription.id();
    tracing::info!(%conn_id, subscriber_id, "WebSocket connected");

    let (sink, mut stream) = socket.split();
    let mut send_task = tokio::spawn(forward_events(sink, subscription));

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(%conn_id, "Pong received");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    // Dropping the subscription inside the task unregisters it from the hub.
    send_task.abort();
    tracing::info!(%conn_id, subscriber_id, "WebSocket disconnected");
}

/// Forward hub events to the socket until either side closes.
async fn forward_events<S>(mut sink: S, mut subscription: Subscription)
where
    S: Sink<Message> + Unpin,
{
    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    // The first tick completes immediately.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(payload) = event else {
                    tracing::debug!(subscriber_id = subscription.id(), "Subscription closed by hub");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if sink.send(Message::Text(payload.to_string().into())).await.is_err() {
                    tracing::debug!(subscriber_id = subscription.id(), "WebSocket sink closed");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures::channel::mpsc;
    use worktrack_events::{EventPublisher, SessionEvent};

    use super::*;

    fn ended(id: i64) -> SessionEvent {
        SessionEvent::Ended {
            id,
            user_id: 1,
            actual_end: Utc::now(),
        }
    }

    async fn wait_for_subscribers(hub: &EventHub, expected: usize) {
        while hub.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn events_are_forwarded_as_text_then_close_on_shutdown() {
        let hub = EventHub::start(8);
        let subscription = hub.subscribe().await;

        let (sink, mut frames) = mpsc::unbounded();
        let task = tokio::spawn(forward_events(sink, subscription));

        hub.publish(ended(7));
        match frames.next().await {
            Some(Message::Text(text)) => {
                let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(json["type"], "session_end");
                assert_eq!(json["id"], 7);
            }
            other => panic!("expected text frame, got {other:?}"),
        }

        hub.shutdown().await;
        assert!(matches!(frames.next().await, Some(Message::Close(None))));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn evicted_subscriber_gets_close_after_queued_events() {
        let hub = EventHub::start(1);
        let subscription = hub.subscribe().await;

        // Nobody drains the queue yet: the second event overflows it.
        hub.publish(ended(1));
        hub.publish(ended(2));
        wait_for_subscribers(&hub, 0).await;

        let (sink, mut frames) = mpsc::unbounded();
        tokio::spawn(forward_events(sink, subscription));

        assert!(matches!(frames.next().await, Some(Message::Text(_))));
        assert!(matches!(frames.next().await, Some(Message::Close(None))));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_pinged() {
        let hub = EventHub::start(8);
        let subscription = hub.subscribe().await;

        let (sink, mut frames) = mpsc::unbounded();
        tokio::spawn(forward_events(sink, subscription));

        assert!(matches!(frames.next().await, Some(Message::Ping(_))));
    }
}
