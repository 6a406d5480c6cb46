//! NATS-backed `MessageBus` implementation.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{BusError, BusResult, MessageBus};

pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = async_nats::connect(url).await.map_err(|e| BusError::ConnectFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: &[u8]) -> BusResult<()> {
        self.client
            .publish(subject.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| BusError::PublishFailed(e.to_string()))
    }

    async fn request(&self, subject: &str, payload: &[u8]) -> BusResult<Vec<u8>> {
        let message = self
            .client
            .request(subject.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| BusError::RequestFailed(e.to_string()))?;
        Ok(message.payload.to_vec())
    }

    async fn subscribe(&self, subject: &str) -> BusResult<mpsc::Receiver<Vec<u8>>> {
        let mut subscription = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::SubscribeFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                if tx.send(message.payload.to_vec()).await.is_err() {
                    break;
                }
            }
            warn!("nats subscription stream ended");
        });
        Ok(rx)
    }
}
