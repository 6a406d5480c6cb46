//! In-memory message bus, for tests and the in-process default. Grounded on
//! the same `Arc<RwLock<HashMap<..>>>` fan-out style used for tracking
//! per-key state elsewhere in this workspace, applied here to subject
//! subscriber lists instead of instance status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::{BusResult, MessageBus};

#[derive(Default)]
pub struct InMemoryBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: &[u8]) -> BusResult<()> {
        let subs = self.subscribers.read().await;
        if let Some(senders) = subs.get(subject) {
            for sender in senders {
                // Best-effort fan-out; a full or closed receiver does not
                // fail the publish (at-least-once with idempotent receivers
                // is the delivery model, not exactly-once).
                let _ = sender.try_send(payload.to_vec());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> BusResult<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.write().await.entry(subject.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_subscribers() {
        let bus = InMemoryBus::new();
        let mut rx = bus.subscribe("dea.heartbeat").await.unwrap();
        bus.publish("dea.heartbeat", b"hello").await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, b"hello");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let bus = InMemoryBus::new();
        bus.publish("nobody.listening", b"x").await.unwrap();
    }

    #[tokio::test]
    async fn subjects_are_isolated() {
        let bus = InMemoryBus::new();
        let mut rx_a = bus.subscribe("subject.a").await.unwrap();
        let mut rx_b = bus.subscribe("subject.b").await.unwrap();
        bus.publish("subject.a", b"for-a").await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap(), b"for-a");
        assert!(rx_b.try_recv().is_err());
    }
}
