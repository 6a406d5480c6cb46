//! Message bus abstraction: a trait the Sender publishes through and the
//! heartbeat listener subscribes through, plus a NATS-backed implementation
//! and an in-memory one for tests and the in-process default.

#![forbid(unsafe_code)]

pub mod error;
pub mod memory;
pub mod nats;

pub use error::{BusError, BusResult};
pub use memory::InMemoryBus;
pub use nats::NatsBus;

use async_trait::async_trait;

/// Transport-agnostic publish/subscribe seam. The Sender only ever calls
/// `publish`; the heartbeat listener only ever calls `subscribe`.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: &[u8]) -> BusResult<()>;

    /// Subscribe to a subject, returning a queue of raw payloads. Messages
    /// published before the subscription was registered are not replayed.
    async fn subscribe(&self, subject: &str) -> BusResult<tokio::sync::mpsc::Receiver<Vec<u8>>>;

    /// Request-reply: publish `payload` on `subject` and wait for a single
    /// reply. Transports without a responder concept return `RequestFailed`.
    async fn request(&self, subject: &str, payload: &[u8]) -> BusResult<Vec<u8>> {
        let _ = (subject, payload);
        Err(BusError::RequestFailed("this transport does not support request-reply".to_string()))
    }
}

/// Serialize `value` to JSON and publish it on `subject`.
pub async fn publish_json<T: serde::Serialize + Sync>(bus: &dyn MessageBus, subject: &str, value: &T) -> BusResult<()> {
    let payload = serde_json::to_vec(value).map_err(|e| BusError::PublishFailed(e.to_string()))?;
    bus.publish(subject, &payload).await
}
