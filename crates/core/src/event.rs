//! In-process broadcast hub.
//!
//! A `Transport` implementation over `tokio::sync::broadcast` for tests and
//! embedded deployments. Subscribers receive every envelope and filter by
//! group; there is no per-group channel bookkeeping.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use crate::transport::{ClientEvent, Transport};

/// A broadcast envelope: the target group plus the event.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub group: String,
    pub event: ClientEvent,
}

/// An in-process event hub implementing `Transport`.
pub struct BroadcastHub {
    sender: broadcast::Sender<Arc<Envelope>>,
}

impl BroadcastHub {
    /// Create a new hub with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive every broadcast envelope.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Transport for BroadcastHub {
    async fn broadcast(&self, group: &str, event: ClientEvent) {
        let event_type = event.event_type();
        // No subscribers is fine; the turn never blocks on delivery.
        let envelope = Envelope {
            group: group.to_string(),
            event,
        };
        if self.sender.send(Arc::new(envelope)).is_err() {
            trace!(group, event_type, "Broadcast dropped, no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        hub.broadcast(
            "chat-1",
            ClientEvent::StatusUpdate {
                status: "working".into(),
            },
        )
        .await;

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.group, "chat-1");
        assert_eq!(envelope.event.event_type(), "status-update");
    }

    #[tokio::test]
    async fn no_subscribers_does_not_panic() {
        let hub = BroadcastHub::new(16);
        hub.broadcast(
            "chat-1",
            ClientEvent::StatusUpdate {
                status: "nobody listening".into(),
            },
        )
        .await;
    }

    #[tokio::test]
    async fn subscribers_filter_by_group() {
        let hub = BroadcastHub::new(16);
        let mut rx = hub.subscribe();

        hub.broadcast(
            "chat-a",
            ClientEvent::StatusUpdate { status: "a".into() },
        )
        .await;
        hub.broadcast(
            "chat-b",
            ClientEvent::StatusUpdate { status: "b".into() },
        )
        .await;

        let mut for_b = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if envelope.group == "chat-b" {
                for_b.push(envelope);
            }
        }
        assert_eq!(for_b.len(), 1);
    }
}
